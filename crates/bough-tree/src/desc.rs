//! Tree descriptors: cursors decoding a tree buffer one entry at a time.

use crate::entry::{canonical_mode, TreeEntry};
use crate::order::base_name_compare;
use crate::{Result, TreeError};
use bough_storage::ObjectId;
use std::cmp::Ordering;

/// Shortest possible entry: one mode digit, space, one name byte, NUL, id.
const MIN_ENTRY_LEN: usize = 1 + 1 + 1 + 1 + ObjectId::LEN;

fn corrupt(offset: usize, reason: &'static str) -> TreeError {
    TreeError::Corrupt { offset, reason }
}

/// Decodes the entry starting at `offset`, returning it with its encoded
/// length.
fn decode_entry(buf: &[u8], offset: usize) -> Result<(TreeEntry<'_>, usize)> {
    let rest = &buf[offset..];
    let size = rest.len();
    if size < MIN_ENTRY_LEN || rest[size - ObjectId::LEN - 1] != 0 {
        return Err(corrupt(offset, "too-short tree object"));
    }

    if rest[0] == b' ' {
        return Err(corrupt(offset, "malformed mode in tree entry"));
    }
    let mut mode: u32 = 0;
    let mut pos = 0;
    loop {
        let c = rest[pos];
        pos += 1;
        if c == b' ' {
            break;
        }
        if !(b'0'..=b'7').contains(&c) {
            return Err(corrupt(offset, "malformed mode in tree entry"));
        }
        mode = mode
            .checked_mul(8)
            .and_then(|m| m.checked_add(u32::from(c - b'0')))
            .ok_or_else(|| corrupt(offset, "malformed mode in tree entry"))?;
    }

    // The NUL checked above bounds this search, so the id always fits.
    let name_len = rest[pos..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| corrupt(offset, "too-short tree object"))?;
    if name_len == 0 {
        return Err(corrupt(offset, "empty filename in tree entry"));
    }
    let path = &rest[pos..pos + name_len];
    let id_start = pos + name_len + 1;
    let id = ObjectId::from_slice(&rest[id_start..id_start + ObjectId::LEN])
        .ok_or_else(|| corrupt(offset, "too-short tree object"))?;

    let entry = TreeEntry {
        mode: canonical_mode(mode),
        path,
        id,
    };
    Ok((entry, id_start + ObjectId::LEN))
}

/// A cursor over a serialized tree.
///
/// The current entry is decoded eagerly, so a descriptor that exists always
/// holds either a valid entry or nothing at all. Descriptors only move
/// forward; clone one to look ahead.
#[derive(Debug, Clone)]
pub struct TreeDesc<'a> {
    buf: &'a [u8],
    offset: usize,
    current: Option<(TreeEntry<'a>, usize)>,
}

impl<'a> TreeDesc<'a> {
    /// Creates a descriptor and decodes its first entry.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let current = if buf.is_empty() {
            None
        } else {
            Some(decode_entry(buf, 0)?)
        };
        Ok(Self {
            buf,
            offset: 0,
            current,
        })
    }

    /// A descriptor with no entries.
    pub fn empty() -> Self {
        Self {
            buf: &[],
            offset: 0,
            current: None,
        }
    }

    /// The current entry, `None` once the tree is exhausted.
    pub fn entry(&self) -> Option<&TreeEntry<'a>> {
        self.current.as_ref().map(|(entry, _)| entry)
    }

    /// Byte offset of the current entry within the tree buffer.
    ///
    /// Offsets identify entries within one buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left, counting the current entry.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// True once every entry has been consumed.
    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Moves to the next entry, decoding it.
    pub fn advance(&mut self) -> Result<()> {
        if let Some((_, len)) = self.current.take() {
            self.offset += len;
            if self.offset < self.buf.len() {
                self.current = Some(decode_entry(self.buf, self.offset)?);
            }
        }
        Ok(())
    }

    /// Returns the current entry and advances past it.
    pub fn next_entry(&mut self) -> Result<Option<TreeEntry<'a>>> {
        let entry = self.entry().copied();
        self.advance()?;
        Ok(entry)
    }

    /// Iterates the entries from the current one on, without moving this
    /// descriptor.
    pub fn iter(&self) -> TreeIter<'a> {
        TreeIter {
            buf: self.buf,
            offset: self.offset,
            failed: false,
        }
    }

    /// Checks that the remaining entries are strictly increasing in tree
    /// order. Decoding alone does not enforce this.
    pub fn verify_order(&self) -> Result<()> {
        let mut prev: Option<TreeEntry<'a>> = None;
        for entry in self.iter() {
            let entry = entry?;
            if let Some(p) = prev {
                if base_name_compare(p.path, p.is_dir(), entry.path, entry.is_dir())
                    != Ordering::Less
                {
                    return Err(TreeError::OutOfOrder {
                        before: p.name_lossy().into_owned(),
                        after: entry.name_lossy().into_owned(),
                    });
                }
            }
            prev = Some(entry);
        }
        Ok(())
    }
}

/// Iterator over tree entries. Stops after the first error.
#[derive(Debug, Clone)]
pub struct TreeIter<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> TreeIter<'a> {
    /// Iterates a whole tree buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for TreeIter<'a> {
    type Item = Result<TreeEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match decode_entry(self.buf, self.offset) {
            Ok((entry, len)) => {
                self.offset += len;
                Some(Ok(entry))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for TreeIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{write_entry, TreeBuf, MODE_EXEC, MODE_FILE, MODE_TREE};

    fn id(n: u8) -> ObjectId {
        ObjectId::from_bytes([n; 20])
    }

    /// A well-framed entry whose mode is not octal.
    fn bad_mode_entry() -> Vec<u8> {
        let mut buf = b"10x644 b\0".to_vec();
        buf.extend_from_slice(&[2u8; 20]);
        buf
    }

    #[test]
    fn test_decode_sequence() {
        let buf = TreeBuf::new()
            .file("a.txt", id(1))
            .dir("a", id(2))
            .entry(MODE_EXEC, "run.sh", id(3))
            .into_bytes();
        let mut desc = TreeDesc::new(&buf).unwrap();

        let first = desc.next_entry().unwrap().unwrap();
        assert_eq!(first.path, b"a.txt");
        assert_eq!(first.mode, MODE_FILE);
        assert_eq!(first.id, id(1));

        let second = desc.next_entry().unwrap().unwrap();
        assert_eq!(second.path, b"a");
        assert!(second.is_dir());

        assert_eq!(desc.entry().unwrap().mode, MODE_EXEC);
        desc.advance().unwrap();
        assert!(desc.is_empty());
        assert_eq!(desc.remaining(), 0);
        assert!(desc.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_empty_tree() {
        let desc = TreeDesc::new(&[]).unwrap();
        assert!(desc.is_empty());
        assert_eq!(desc.iter().count(), 0);
    }

    #[test]
    fn test_offsets_track_entries() {
        let buf = TreeBuf::new().file("x", id(1)).file("y", id(2)).into_bytes();
        let mut desc = TreeDesc::new(&buf).unwrap();
        assert_eq!(desc.offset(), 0);
        desc.advance().unwrap();
        assert_eq!(desc.offset(), b"100644 x\0".len() + 20);
    }

    #[test]
    fn test_too_short() {
        let err = TreeDesc::new(b"100644 a\0short").unwrap_err();
        assert!(matches!(
            err,
            TreeError::Corrupt {
                reason: "too-short tree object",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_nul_before_id() {
        let mut buf = b"100644 abc".to_vec();
        buf.extend_from_slice(&[1u8; 21]);
        assert!(TreeDesc::new(&buf).is_err());
    }

    #[test]
    fn test_malformed_mode() {
        let mut buf = Vec::new();
        write_entry(&mut buf, MODE_FILE, b"a", &id(1));
        buf[1] = b'9';
        let err = TreeDesc::new(&buf).unwrap_err();
        assert!(matches!(
            err,
            TreeError::Corrupt {
                reason: "malformed mode in tree entry",
                ..
            }
        ));

        let mut buf = b" a\0".to_vec();
        buf.extend_from_slice(&[1u8; 20]);
        buf.extend_from_slice(&[b'x'; 4]);
        assert!(TreeDesc::new(&buf).is_err());
    }

    #[test]
    fn test_empty_filename() {
        let mut buf = b"100644 \0".to_vec();
        buf.extend_from_slice(&[1u8; 20]);
        let err = TreeDesc::new(&buf).unwrap_err();
        assert!(matches!(
            err,
            TreeError::Corrupt {
                reason: "empty filename in tree entry",
                ..
            }
        ));
    }

    #[test]
    fn test_corruption_in_later_entry() {
        let mut buf = TreeBuf::new().file("ok", id(1)).into_bytes().to_vec();
        buf.extend_from_slice(&bad_mode_entry());
        let mut desc = TreeDesc::new(&buf).unwrap();
        assert_eq!(desc.entry().unwrap().path, b"ok");

        let err = desc.advance().unwrap_err();
        assert!(matches!(
            err,
            TreeError::Corrupt {
                offset: 30,
                reason: "malformed mode in tree entry",
            }
        ));
        assert!(desc.is_empty());
    }

    #[test]
    fn test_trailing_garbage_fails_first_entry() {
        // The id of the first entry is located from the end of the buffer,
        // so junk after it spoils the very first decode.
        let mut buf = TreeBuf::new().file("ok", id(1)).into_bytes().to_vec();
        buf.extend_from_slice(b"garbage");
        let err = TreeDesc::new(&buf).unwrap_err();
        assert!(matches!(err, TreeError::Corrupt { offset: 0, .. }));
    }

    #[test]
    fn test_iter_fuses_on_error() {
        let mut buf = TreeBuf::new().file("ok", id(1)).into_bytes().to_vec();
        buf.extend_from_slice(&bad_mode_entry());
        buf.extend_from_slice(&TreeBuf::new().file("z", id(2)).into_bytes());
        let results: Vec<_> = TreeIter::new(&buf).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn test_verify_order() {
        let sorted = TreeBuf::new()
            .file("a.txt", id(1))
            .dir("a", id(2))
            .file("b", id(3))
            .into_bytes();
        TreeDesc::new(&sorted).unwrap().verify_order().unwrap();

        let unsorted = TreeBuf::new()
            .dir("a", id(2))
            .file("a.txt", id(1))
            .into_bytes();
        let err = TreeDesc::new(&unsorted).unwrap().verify_order().unwrap_err();
        assert!(matches!(err, TreeError::OutOfOrder { .. }));

        let duplicate = TreeBuf::new().file("a", id(1)).file("a", id(2)).into_bytes();
        assert!(TreeDesc::new(&duplicate).unwrap().verify_order().is_err());
    }

    #[test]
    fn test_canonicalizes_mode() {
        let mut buf = Vec::new();
        write_entry(&mut buf, 0o100664, b"f", &id(1));
        write_entry(&mut buf, 0o40000, b"g", &id(2));
        let desc = TreeDesc::new(&buf).unwrap();
        let modes: Vec<u32> = desc.iter().map(|e| e.unwrap().mode).collect();
        assert_eq!(modes, vec![MODE_FILE, MODE_TREE]);
    }
}
