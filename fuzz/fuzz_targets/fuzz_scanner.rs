#![no_main]

use harx::scanner::{Scanner, SliceSource, TokenScanner};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Tokenize to the end, then replay with skip and navigate from the start
    let mut scanner = Scanner::new(SliceSource::new(data));
    while let Ok(Some(_)) = scanner.next_token() {}

    if scanner.reposition(0).is_ok() {
        while let Ok(true) = scanner.more() {
            if scanner.skip().is_err() {
                break;
            }
        }
    }

    let mut scanner = Scanner::new(SliceSource::new(data));
    let _ = scanner.navigate(&["log", "entries", "0", "response", "content"]);
    let mut raw = Vec::new();
    let _ = scanner.capture(&mut raw);
});
