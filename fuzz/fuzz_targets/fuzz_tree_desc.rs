//! Fuzz target for tree object decoding.
//!
//! Every entry handed out must lie inside the buffer, and decoding must
//! stop with an error rather than panic on malformed trees.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for entry in bough_tree::TreeIter::new(data) {
        match entry {
            Ok(entry) => {
                assert!(!entry.is_empty());
                assert!(!entry.path.contains(&0));
                assert!(entry.len() < data.len());
            }
            Err(_) => break,
        }
    }

    if let Ok(desc) = bough_tree::TreeDesc::new(data) {
        let _ = desc.verify_order();
    }
});
