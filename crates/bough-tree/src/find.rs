//! Path lookup through nested trees.

use crate::desc::TreeDesc;
use crate::entry::{TreeEntry, MODE_TREE};
use crate::Result;
use bough_storage::{ObjectId, ObjectSource};
use std::cmp::Ordering;

/// Finds the entry named exactly `name` in one tree.
///
/// Stops scanning as soon as the sorted order rules the name out.
pub fn find_entry<'a>(tree: &TreeDesc<'a>, name: &[u8]) -> Result<Option<TreeEntry<'a>>> {
    for entry in tree.iter() {
        let entry = entry?;
        if entry.len() > name.len() {
            continue;
        }
        match name[..entry.len()].cmp(entry.path) {
            Ordering::Greater => continue,
            Ordering::Less => break,
            Ordering::Equal if entry.len() == name.len() => return Ok(Some(entry)),
            Ordering::Equal => continue,
        }
    }
    Ok(None)
}

/// Resolves a slash-separated `path` below the tree `tree_id`, returning the
/// id and mode it names. An empty path names the tree itself.
pub fn get_tree_entry<S>(
    source: &S,
    tree_id: &ObjectId,
    path: &[u8],
) -> Result<Option<(ObjectId, u32)>>
where
    S: ObjectSource + ?Sized,
{
    if path.is_empty() {
        return Ok(Some((*tree_id, MODE_TREE)));
    }
    let buf = source.read_tree(tree_id)?;
    let desc = TreeDesc::new(&buf)?;

    for entry in desc.iter() {
        let entry = entry?;
        let entrylen = entry.len();
        if entrylen > path.len() {
            continue;
        }
        match path[..entrylen].cmp(entry.path) {
            Ordering::Greater => continue,
            Ordering::Less => break,
            Ordering::Equal => {}
        }
        if entrylen == path.len() {
            return Ok(Some((entry.id, entry.mode)));
        }
        if path[entrylen] != b'/' {
            continue;
        }
        if !entry.is_dir() {
            break;
        }
        let rest = &path[entrylen + 1..];
        if rest.is_empty() {
            return Ok(Some((entry.id, entry.mode)));
        }
        return get_tree_entry(source, &entry.id, rest);
    }
    Ok(None)
}
