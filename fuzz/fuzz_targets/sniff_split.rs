#![no_main]

use arbitrary::Arbitrary;
use dockroute_router::sniff::{Scan, scan};
use libfuzzer_sys::fuzz_target;

/// 한 번에 받은 버퍼와 두 번에 나눠 받은 버퍼
#[derive(Arbitrary, Debug)]
struct SplitInput {
    data: Vec<u8>,
    split: usize,
}

fuzz_target!(|input: SplitInput| {
    let split = input.split % (input.data.len() + 1);
    let (_, partial) = scan(&input.data[..split]);

    // 앞부분만으로 키를 찾았다면 뒤에 바이트가 더 와도 같은 키여야 한다
    if let Scan::Found(host) = partial {
        let (_, full) = scan(&input.data);
        assert_eq!(full, Scan::Found(host));
    }
});
