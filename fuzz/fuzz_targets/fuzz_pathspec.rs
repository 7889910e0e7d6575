//! Fuzz target for pathspec parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(spec) = std::str::from_utf8(data) {
        let _ = bough_tree::Pathspec::parse(spec.split('\n'));
    }
});
