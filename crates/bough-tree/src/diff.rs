//! Two-tree diff built on the N-way walker.

use crate::desc::TreeDesc;
use crate::entry::TreeEntry;
use crate::pathspec::Pathspec;
use crate::traverse::{traverse_trees, TraverseInfo, TraverseOptions, Visitor};
use crate::{Result, TreeError};
use bough_storage::{ObjectId, ObjectSource};
use bytes::Bytes;

/// One path that differs between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeChange {
    /// Present only in the new tree.
    Added {
        /// Full path.
        path: Vec<u8>,
        /// Mode in the new tree.
        mode: u32,
        /// Id in the new tree.
        id: ObjectId,
    },
    /// Present only in the old tree.
    Deleted {
        /// Full path.
        path: Vec<u8>,
        /// Mode in the old tree.
        mode: u32,
        /// Id in the old tree.
        id: ObjectId,
    },
    /// Present in both with a different id or mode.
    Modified {
        /// Full path.
        path: Vec<u8>,
        /// Mode in the old tree.
        old_mode: u32,
        /// Id in the old tree.
        old_id: ObjectId,
        /// Mode in the new tree.
        new_mode: u32,
        /// Id in the new tree.
        new_id: ObjectId,
    },
}

impl TreeChange {
    /// Full path of the changed entry.
    pub fn path(&self) -> &[u8] {
        match self {
            Self::Added { path, .. } | Self::Deleted { path, .. } | Self::Modified { path, .. } => {
                path
            }
        }
    }
}

struct DiffVisitor<'s, S: ?Sized> {
    source: &'s S,
    changes: Vec<TreeChange>,
}

impl<S: ObjectSource + ?Sized> DiffVisitor<'_, S> {
    fn load(&self, entry: Option<&TreeEntry<'_>>) -> Result<Bytes> {
        match entry {
            Some(entry) if entry.is_dir() => Ok(self.source.read_tree(&entry.id)?),
            _ => Ok(Bytes::new()),
        }
    }

    fn descend(
        &mut self,
        info: &TraverseInfo<'_>,
        name: &[u8],
        old: Option<&TreeEntry<'_>>,
        new: Option<&TreeEntry<'_>>,
    ) -> Result<()> {
        let old_buf = self.load(old)?;
        let new_buf = self.load(new)?;
        let trees = [TreeDesc::new(&old_buf)?, TreeDesc::new(&new_buf)?];
        let child = info.child(name);
        traverse_trees(&trees, &child, self)
    }
}

impl<S: ObjectSource + ?Sized> Visitor for DiffVisitor<'_, S> {
    type Error = TreeError;

    fn visit(
        &mut self,
        info: &TraverseInfo<'_>,
        mask: u64,
        _dirmask: u64,
        entries: &[Option<TreeEntry<'_>>],
    ) -> Result<u64> {
        let old = entries[0];
        let new = entries[1];

        if let (Some(o), Some(n)) = (&old, &new) {
            if o.id == n.id && o.mode == n.mode {
                return Ok(mask);
            }
        }

        let old_dir = old.filter(TreeEntry::is_dir);
        let new_dir = new.filter(TreeEntry::is_dir);
        if let Some(name) = old_dir.or(new_dir).map(|e| e.path) {
            self.descend(info, name, old_dir.as_ref(), new_dir.as_ref())?;
        }

        let old_leaf = old.filter(|e| !e.is_dir());
        let new_leaf = new.filter(|e| !e.is_dir());
        let change = match (old_leaf, new_leaf) {
            (Some(o), Some(n)) => Some(TreeChange::Modified {
                path: info.path_of(&o),
                old_mode: o.mode,
                old_id: o.id,
                new_mode: n.mode,
                new_id: n.id,
            }),
            (Some(o), None) => Some(TreeChange::Deleted {
                path: info.path_of(&o),
                mode: o.mode,
                id: o.id,
            }),
            (None, Some(n)) => Some(TreeChange::Added {
                path: info.path_of(&n),
                mode: n.mode,
                id: n.id,
            }),
            (None, None) => None,
        };
        self.changes.extend(change);
        Ok(mask)
    }
}

/// Compares two trees recursively, limited to `pathspec` when given.
///
/// `None` stands for an empty tree. Wildcard pathspecs only reach into
/// subdirectories when they are recursive. Changes come out in walk order; a
/// path that turns from a file into a directory is reported as the file's
/// deletion plus the additions inside the directory.
pub fn diff_trees<S>(
    source: &S,
    old: Option<&ObjectId>,
    new: Option<&ObjectId>,
    pathspec: Option<&Pathspec>,
) -> Result<Vec<TreeChange>>
where
    S: ObjectSource + ?Sized,
{
    let old_buf = match old {
        Some(id) => source.read_tree(id)?,
        None => Bytes::new(),
    };
    let new_buf = match new {
        Some(id) => source.read_tree(id)?,
        None => Bytes::new(),
    };
    let trees = [TreeDesc::new(&old_buf)?, TreeDesc::new(&new_buf)?];
    let info = TraverseInfo::new(pathspec, TraverseOptions::default());
    let mut visitor = DiffVisitor {
        source,
        changes: Vec::new(),
    };
    traverse_trees(&trees, &info, &mut visitor)?;
    Ok(visitor.changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{TreeBuf, MODE_EXEC, MODE_FILE};
    use bough_storage::ObjectStore;

    fn paths(changes: &[TreeChange]) -> Vec<String> {
        changes
            .iter()
            .map(|c| String::from_utf8_lossy(c.path()).into_owned())
            .collect()
    }

    #[test]
    fn test_identical_trees() {
        let store = ObjectStore::new();
        let blob = store.put_blob(b"a".to_vec());
        let tree = store.put(TreeBuf::new().file("a", blob).into_object());
        assert!(diff_trees(&store, Some(&tree), Some(&tree), None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_nested_changes() {
        let store = ObjectStore::new();
        let one = store.put_blob(b"1".to_vec());
        let two = store.put_blob(b"2".to_vec());

        let old_src = store.put(
            TreeBuf::new()
                .file("lib.rs", one)
                .file("old.rs", one)
                .into_object(),
        );
        let new_src = store.put(
            TreeBuf::new()
                .file("lib.rs", two)
                .file("new.rs", one)
                .into_object(),
        );
        let docs = store.put(TreeBuf::new().file("guide.md", one).into_object());

        let old = store.put(
            TreeBuf::new()
                .file("README", one)
                .dir("docs", docs)
                .dir("src", old_src)
                .into_object(),
        );
        let new = store.put(
            TreeBuf::new()
                .entry(MODE_EXEC, "README", one)
                .dir("docs", docs)
                .dir("src", new_src)
                .into_object(),
        );

        let changes = diff_trees(&store, Some(&old), Some(&new), None).unwrap();
        assert_eq!(
            paths(&changes),
            vec!["README", "src/lib.rs", "src/new.rs", "src/old.rs"]
        );
        assert_eq!(
            changes[0],
            TreeChange::Modified {
                path: b"README".to_vec(),
                old_mode: MODE_FILE,
                old_id: one,
                new_mode: MODE_EXEC,
                new_id: one,
            }
        );
        assert!(matches!(changes[2], TreeChange::Added { .. }));
        assert!(matches!(changes[3], TreeChange::Deleted { .. }));
    }

    #[test]
    fn test_against_empty_tree() {
        let store = ObjectStore::new();
        let blob = store.put_blob(b"x".to_vec());
        let sub = store.put(TreeBuf::new().file("inner", blob).into_object());
        let tree = store.put(TreeBuf::new().file("a", blob).dir("d", sub).into_object());

        let added = diff_trees(&store, None, Some(&tree), None).unwrap();
        assert_eq!(paths(&added), vec!["a", "d/inner"]);
        assert!(added.iter().all(|c| matches!(c, TreeChange::Added { .. })));

        let deleted = diff_trees(&store, Some(&tree), None, None).unwrap();
        assert!(deleted.iter().all(|c| matches!(c, TreeChange::Deleted { .. })));
    }

    #[test]
    fn test_file_becomes_directory() {
        let store = ObjectStore::new();
        let blob = store.put_blob(b"x".to_vec());
        let sub = store.put(TreeBuf::new().file("f", blob).into_object());
        let old = store.put(TreeBuf::new().file("t", blob).file("t-2", blob).into_object());
        let new = store.put(TreeBuf::new().file("t-2", blob).dir("t", sub).into_object());

        let changes = diff_trees(&store, Some(&old), Some(&new), None).unwrap();
        assert_eq!(paths(&changes), vec!["t/f", "t"]);
        assert!(matches!(changes[0], TreeChange::Added { .. }));
        assert!(matches!(changes[1], TreeChange::Deleted { .. }));
    }

    #[test]
    fn test_pathspec_limits_diff() {
        let store = ObjectStore::new();
        let one = store.put_blob(b"1".to_vec());
        let two = store.put_blob(b"2".to_vec());
        let old_src = store.put(
            TreeBuf::new()
                .file("a.rs", one)
                .file("b.rs", one)
                .into_object(),
        );
        let new_src = store.put(
            TreeBuf::new()
                .file("a.rs", two)
                .file("b.rs", two)
                .into_object(),
        );
        let old = store.put(
            TreeBuf::new()
                .dir("src", old_src)
                .file("top", one)
                .into_object(),
        );
        let new = store.put(
            TreeBuf::new()
                .dir("src", new_src)
                .file("top", two)
                .into_object(),
        );

        let spec = Pathspec::parse(["src/b.rs"]).unwrap();
        let changes = diff_trees(&store, Some(&old), Some(&new), Some(&spec)).unwrap();
        assert_eq!(paths(&changes), vec!["src/b.rs"]);

        let spec = Pathspec::parse(["*.rs"]).unwrap().recursive(true);
        let changes = diff_trees(&store, Some(&old), Some(&new), Some(&spec)).unwrap();
        assert_eq!(paths(&changes), vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn test_missing_subtree_is_an_error() {
        let store = ObjectStore::new();
        let blob = store.put_blob(b"x".to_vec());
        let dangling = ObjectId::from_bytes([5u8; 20]);
        let old = store.put(TreeBuf::new().file("a", blob).into_object());
        let new = store.put(TreeBuf::new().dir("a", dangling).into_object());
        assert!(diff_trees(&store, Some(&old), Some(&new), None).is_err());
    }
}
