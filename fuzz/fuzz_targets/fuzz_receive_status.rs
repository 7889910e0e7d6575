//! Fuzz target for receive-pack status reports.

#![no_main]

use bough_git::{PktLineReader, PushOutcome, RefList};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = PktLineReader::new(Cursor::new(data));
    let mut refs = RefList::new();
    let mut outcome = PushOutcome::default();
    let _ = bough_git::receive_status(&mut reader, &mut refs, &mut outcome);
});
