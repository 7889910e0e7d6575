//! Tree entries and their serialized form.
//!
//! A tree object is a flat run of entries, each laid out as
//!
//! ```text
//! <octal mode> SP <name> NUL <20-byte id>
//! ```
//!
//! with no other framing; the length comes from the enclosing object.

use crate::desc::TreeDesc;
use bough_storage::{GitObject, ObjectId};
use bytes::Bytes;

/// Mode of a subtree entry.
pub const MODE_TREE: u32 = 0o040000;
/// Mode of a regular file.
pub const MODE_FILE: u32 = 0o100644;
/// Mode of an executable file.
pub const MODE_EXEC: u32 = 0o100755;
/// Mode of a symbolic link.
pub const MODE_SYMLINK: u32 = 0o120000;
/// Mode of a submodule commit.
pub const MODE_GITLINK: u32 = 0o160000;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;

/// Normalizes a stored mode to one of the five modes git writes.
///
/// Regular files keep only the owner execute bit; anything that is not a
/// file, symlink or directory is treated as a gitlink.
pub fn canonical_mode(mode: u32) -> u32 {
    match mode & S_IFMT {
        S_IFREG => {
            if mode & 0o100 != 0 {
                MODE_EXEC
            } else {
                MODE_FILE
            }
        }
        MODE_SYMLINK => MODE_SYMLINK,
        MODE_TREE => MODE_TREE,
        _ => MODE_GITLINK,
    }
}

/// One decoded tree entry, borrowing its name from the tree buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEntry<'a> {
    /// Canonical mode.
    pub mode: u32,
    /// Entry name, never empty and never containing NUL.
    pub path: &'a [u8],
    /// Object the entry points at.
    pub id: ObjectId,
}

impl<'a> TreeEntry<'a> {
    /// Length of the name in bytes.
    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// Always false for decoded entries; names are never empty.
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// True for subtrees.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == MODE_TREE
    }

    /// True for submodule commits.
    pub fn is_gitlink(&self) -> bool {
        self.mode & S_IFMT == MODE_GITLINK
    }

    /// Name as UTF-8, replacing invalid sequences.
    pub fn name_lossy(&self) -> std::borrow::Cow<'a, str> {
        String::from_utf8_lossy(self.path)
    }

    /// Number of bytes this entry occupies when serialized.
    pub fn encoded_len(&self) -> usize {
        format!("{:o}", self.mode).len() + 1 + self.path.len() + 1 + ObjectId::LEN
    }
}

/// Appends one serialized entry to `out`.
pub fn write_entry(out: &mut Vec<u8>, mode: u32, name: &[u8], id: &ObjectId) {
    out.extend_from_slice(format!("{:o}", mode).as_bytes());
    out.push(b' ');
    out.extend_from_slice(name);
    out.push(0);
    out.extend_from_slice(id.as_bytes());
}

/// Builder for tree buffers.
///
/// Entries are written in the order they are added; callers that want a
/// well-formed tree add them in tree order.
#[derive(Debug, Default, Clone)]
pub struct TreeBuf {
    buf: Vec<u8>,
}

impl TreeBuf {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    pub fn entry(mut self, mode: u32, name: impl AsRef<[u8]>, id: ObjectId) -> Self {
        write_entry(&mut self.buf, mode, name.as_ref(), &id);
        self
    }

    /// Adds a regular file entry.
    pub fn file(self, name: impl AsRef<[u8]>, id: ObjectId) -> Self {
        self.entry(MODE_FILE, name, id)
    }

    /// Adds a subtree entry.
    pub fn dir(self, name: impl AsRef<[u8]>, id: ObjectId) -> Self {
        self.entry(MODE_TREE, name, id)
    }

    /// Returns the raw buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Finishes into a raw buffer.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }

    /// Finishes into a tree object. Debug builds check that entries were
    /// added in tree order; use [`Self::into_bytes`] for deliberately
    /// malformed trees.
    pub fn into_object(self) -> GitObject {
        debug_assert!(
            TreeDesc::new(&self.buf)
                .and_then(|desc| desc.verify_order())
                .is_ok(),
            "tree entries added out of order"
        );
        GitObject::tree(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_mode() {
        assert_eq!(canonical_mode(0o100644), MODE_FILE);
        assert_eq!(canonical_mode(0o100664), MODE_FILE);
        assert_eq!(canonical_mode(0o100775), MODE_EXEC);
        assert_eq!(canonical_mode(0o120000), MODE_SYMLINK);
        assert_eq!(canonical_mode(0o40000), MODE_TREE);
        assert_eq!(canonical_mode(0o160000), MODE_GITLINK);
        assert_eq!(canonical_mode(0o777), MODE_GITLINK);
    }

    #[test]
    fn test_write_entry_layout() {
        let id = ObjectId::from_bytes([0xaa; 20]);
        let mut out = Vec::new();
        write_entry(&mut out, MODE_TREE, b"src", &id);
        assert_eq!(&out[..10], b"40000 src\0");
        assert_eq!(&out[10..], &[0xaa; 20]);

        let entry = TreeEntry {
            mode: MODE_TREE,
            path: b"src",
            id,
        };
        assert_eq!(entry.encoded_len(), out.len());
        assert!(entry.is_dir());
        assert!(!entry.is_gitlink());
    }

    #[test]
    fn test_tree_buf_matches_manual_layout() {
        let blob = GitObject::blob(b"hello\n".to_vec());
        let built = TreeBuf::new().file("hello.txt", blob.id).dir("src", blob.id);

        let mut manual = b"100644 hello.txt\0".to_vec();
        manual.extend_from_slice(blob.id.as_bytes());
        manual.extend_from_slice(b"40000 src\0");
        manual.extend_from_slice(blob.id.as_bytes());

        assert_eq!(built.as_bytes(), manual.as_slice());
        assert_eq!(built.into_object().id, GitObject::tree(manual).id);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "tree entries added out of order")]
    fn test_unsorted_object_is_caught() {
        let id = ObjectId::from_bytes([1; 20]);
        let _ = TreeBuf::new().file("top", id).dir("src", id).into_object();
    }
}
