//! Fuzz target for ref advertisements, smart and dumb.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = bough_git::PktLineReader::new(Cursor::new(data));
    let _ = bough_git::parse_smart(&mut reader);
    let _ = bough_git::parse_dumb(data);
});
