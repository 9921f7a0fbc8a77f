#![no_main]

use dockroute_router::sniff::scan_tls_sni;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // 길이 필드가 실제 버퍼보다 커도 패닉 없이 처리해야 한다
    let _ = scan_tls_sni(data);
});
