//! Tree entry ordering.
//!
//! Stored trees are sorted by [`base_name_compare`]: byte order, where a
//! directory compares as if its name ended in `/` and a file as if it ended
//! in NUL. So a file `a.txt` sorts before a directory `a`, but after a file
//! `a`.
//!
//! The walker synchronizes on plain [`name_compare`] and uses look-ahead to
//! cover the cases where the two orders disagree.

use std::cmp::Ordering;

#[inline]
const fn terminator(is_dir: bool) -> u8 {
    if is_dir {
        b'/'
    } else {
        0
    }
}

/// Compares two entry names the way trees are stored.
pub fn base_name_compare(a: &[u8], a_is_dir: bool, b: &[u8], b_is_dir: bool) -> Ordering {
    let len = a.len().min(b.len());
    match a[..len].cmp(&b[..len]) {
        Ordering::Equal => {}
        other => return other,
    }
    let a_next = a.get(len).copied().unwrap_or(terminator(a_is_dir));
    let b_next = b.get(len).copied().unwrap_or(terminator(b_is_dir));
    a_next.cmp(&b_next)
}

/// Compares two names as plain bytes, shorter first on a common prefix.
pub fn name_compare(a: &[u8], b: &[u8]) -> Ordering {
    let len = a.len().min(b.len());
    match a[..len].cmp(&b[..len]) {
        Ordering::Equal => a.len().cmp(&b.len()),
        other => other,
    }
}
