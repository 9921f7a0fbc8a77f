#![no_main]

use dockroute_router::sniff::scan_http_host;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // 크래시나 패닉 없이 Incomplete, Found, Rejected 중 하나를 반환해야 한다
    let _ = scan_http_host(data);
});
