//! Fuzz target for pkt-line and side-band reading.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::{Cursor, Read};

fuzz_target!(|data: &[u8]| {
    let mut reader = bough_git::PktLineReader::new(Cursor::new(data));
    for _ in 0..100 {
        match reader.read() {
            Ok(Some(_)) => continue,
            _ => break,
        }
    }

    let mut sideband = bough_git::SidebandReader::new(Cursor::new(data), std::io::sink());
    let mut out = Vec::new();
    let _ = sideband.read_to_end(&mut out);
});
