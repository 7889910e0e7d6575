//! N-way tree traversal.
//!
//! [`traverse_trees`] walks up to [`MAX_TRAVERSE_TREES`] trees in lock-step.
//! Each round it picks the smallest entry name across all trees, gathers
//! the entry with that name from every tree that has one, and hands the
//! group to a [`Visitor`]. Descending into subtrees is left to the visitor,
//! which calls `traverse_trees` again with [`TraverseInfo::child`].
//!
//! Trees are sorted with directories compared as if they ended in `/`, so
//! the entry a round wants can sit behind other entries: one tree may list
//! a file `t-2` before a directory `t` that another tree shows first. The
//! walker looks ahead for such entries, returns them early and remembers
//! their offsets so they are not returned a second time.

use crate::desc::TreeDesc;
use crate::entry::TreeEntry;
use crate::order::name_compare;
use crate::pathspec::{Interest, Pathspec};
use crate::{Result, TreeError};
use smallvec::SmallVec;
use std::cmp::Ordering;
use tracing::{debug, trace};

/// Most trees a single traversal can walk; one bit of a `u64` mask each.
pub const MAX_TRAVERSE_TREES: usize = 64;

/// Knobs for a traversal.
#[derive(Debug, Clone, Copy)]
pub struct TraverseOptions {
    /// Deepest [`TraverseInfo::depth`] accepted before failing.
    pub max_depth: usize,
    /// Keep walking after a visitor error and report the first one at the
    /// end.
    pub show_all_errors: bool,
}

impl Default for TraverseOptions {
    fn default() -> Self {
        Self {
            max_depth: 2048,
            show_all_errors: false,
        }
    }
}

/// Where a traversal is: the chain of directory names from the root.
///
/// Frames only borrow their names; each child points at its parent.
#[derive(Debug, Clone)]
pub struct TraverseInfo<'p> {
    prev: Option<&'p TraverseInfo<'p>>,
    name: &'p [u8],
    pathlen: usize,
    depth: usize,
    pathspec: Option<&'p Pathspec>,
    options: TraverseOptions,
}

impl<'p> TraverseInfo<'p> {
    /// Creates the root frame.
    pub fn new(pathspec: Option<&'p Pathspec>, options: TraverseOptions) -> Self {
        Self {
            prev: None,
            name: &[],
            pathlen: 0,
            depth: 0,
            pathspec,
            options,
        }
    }

    /// Creates the frame for descending into the directory `name`.
    pub fn child<'c>(&'c self, name: &'c [u8]) -> TraverseInfo<'c> {
        let pathlen = if self.pathlen == 0 {
            name.len()
        } else {
            self.pathlen + 1 + name.len()
        };
        TraverseInfo {
            prev: Some(self),
            name,
            pathlen,
            depth: self.depth + 1,
            pathspec: self.pathspec,
            options: self.options,
        }
    }

    /// Number of directories between the root and this frame.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The pathspec limiting this traversal, if any.
    pub fn pathspec(&self) -> Option<&'p Pathspec> {
        self.pathspec
    }

    /// Traversal options.
    pub fn options(&self) -> &TraverseOptions {
        &self.options
    }

    /// Path of this directory, without a trailing slash.
    pub fn path(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.pathlen];
        let mut end = self.pathlen;
        let mut frame = Some(self);
        while let Some(info) = frame {
            if info.name.is_empty() {
                break;
            }
            let start = end - info.name.len();
            out[start..end].copy_from_slice(info.name);
            if start == 0 {
                break;
            }
            out[start - 1] = b'/';
            end = start - 1;
            frame = info.prev;
        }
        out
    }

    /// Path of this directory with a trailing slash; empty at the root.
    pub fn base(&self) -> Vec<u8> {
        let mut base = self.path();
        if !base.is_empty() {
            base.push(b'/');
        }
        base
    }

    /// Full path of an entry in this directory.
    pub fn path_of(&self, entry: &TreeEntry<'_>) -> Vec<u8> {
        let mut path = self.base();
        path.extend_from_slice(entry.path);
        path
    }
}

/// Receives one group of same-named entries per traversal round.
pub trait Visitor {
    /// Error type; tree errors met while walking are converted into it.
    type Error: From<TreeError>;

    /// Handles one round.
    ///
    /// `entries[i]` is tree `i`'s entry, `mask` has bit `i` set when it is
    /// present and `dirmask` when it is a directory. Returns the trees
    /// whose entry was consumed; those not returned are offered again.
    fn visit(
        &mut self,
        info: &TraverseInfo<'_>,
        mask: u64,
        dirmask: u64,
        entries: &[Option<TreeEntry<'_>>],
    ) -> std::result::Result<u64, Self::Error>;
}

#[derive(Debug, Clone, Copy)]
struct Slot<'a> {
    entry: TreeEntry<'a>,
    offset: usize,
}

enum Lookahead {
    Found,
    KeepLooking,
    Absent,
}

/// We want `first` from a tree and are looking at `path`.
fn check_entry_match(first: &[u8], path: &[u8]) -> Lookahead {
    match name_compare(first, path) {
        Ordering::Equal => Lookahead::Found,
        Ordering::Greater => Lookahead::KeepLooking,
        // `first` may still be a directory stored after `path`, as "t"
        // after "t-2".
        Ordering::Less
            if first.len() < path.len()
                && path.starts_with(first)
                && path[first.len()] < b'/' =>
        {
            Lookahead::KeepLooking
        }
        Ordering::Less => Lookahead::Absent,
    }
}

/// A descriptor plus the offsets of entries already returned early.
struct ExtendedDesc<'a> {
    desc: TreeDesc<'a>,
    skip: SmallVec<[usize; 4]>,
}

impl<'a> ExtendedDesc<'a> {
    fn new(desc: TreeDesc<'a>) -> Self {
        Self {
            desc,
            skip: SmallVec::new(),
        }
    }

    /// Returns the current entry, or with `first` the entry named `first`
    /// found by looking ahead, or nothing.
    fn extract(&mut self, first: Option<&[u8]>) -> Result<Option<Slot<'a>>> {
        let slot = loop {
            let Some(entry) = self.desc.entry().copied() else {
                return Ok(None);
            };
            let offset = self.desc.offset();
            match self.skip.iter().position(|&o| o == offset) {
                Some(pos) => {
                    self.skip.swap_remove(pos);
                    self.desc.advance()?;
                }
                None => break Slot { entry, offset },
            }
        };

        let Some(first) = first else {
            return Ok(Some(slot));
        };
        match check_entry_match(first, slot.entry.path) {
            Lookahead::Found => return Ok(Some(slot)),
            Lookahead::Absent => return Ok(None),
            Lookahead::KeepLooking => {}
        }

        let mut ahead = self.desc.clone();
        while let Some(entry) = ahead.entry().copied() {
            let offset = ahead.offset();
            match check_entry_match(first, entry.path) {
                Lookahead::Found => return Ok(Some(Slot { entry, offset })),
                Lookahead::Absent => return Ok(None),
                Lookahead::KeepLooking => ahead.advance()?,
            }
        }
        Ok(None)
    }

    /// Consumes `slot`: advance if it is current, else remember to skip it.
    fn update(&mut self, slot: &Slot<'a>) -> Result<()> {
        if !self.desc.is_empty() && self.desc.offset() == slot.offset {
            self.desc.advance()
        } else {
            self.skip.push(slot.offset);
            Ok(())
        }
    }
}

fn prune_traversal(
    entry: &TreeEntry<'_>,
    info: &TraverseInfo<'_>,
    base: &[u8],
    still_interesting: Interest,
) -> Interest {
    match info.pathspec {
        None => Interest::AllInteresting,
        Some(_) if still_interesting == Interest::AllInteresting => Interest::AllInteresting,
        Some(pathspec) => pathspec.interesting(entry, base),
    }
}

/// Walks `trees` in lock-step, calling `visitor` once per distinct name.
///
/// Stops early when the pathspec rules out every remaining entry. Returns
/// the first visitor error; without
/// [`show_all_errors`](TraverseOptions::show_all_errors) the walk stops
/// there.
pub fn traverse_trees<V>(
    trees: &[TreeDesc<'_>],
    info: &TraverseInfo<'_>,
    visitor: &mut V,
) -> std::result::Result<(), V::Error>
where
    V: Visitor + ?Sized,
{
    let n = trees.len();
    if n > MAX_TRAVERSE_TREES {
        return Err(TreeError::TooManyTrees(n).into());
    }
    if info.depth > info.options.max_depth {
        return Err(TreeError::TooDeep(info.options.max_depth).into());
    }
    debug!(trees = n, depth = info.depth, "traversing trees");

    let mut tx: Vec<ExtendedDesc<'_>> = trees.iter().cloned().map(ExtendedDesc::new).collect();
    let mut slots: Vec<Option<Slot<'_>>> = vec![None; n];
    let mut view: Vec<Option<TreeEntry<'_>>> = Vec::with_capacity(n);
    let base = info.base();
    let mut interesting = Interest::Interesting;
    let mut error: Option<V::Error> = None;

    loop {
        for (slot, t) in slots.iter_mut().zip(tx.iter_mut()) {
            *slot = t.extract(None)?;
        }

        let mut first: Option<&[u8]> = None;
        for slot in slots.iter().flatten() {
            let path = slot.entry.path;
            if first.map_or(true, |f| name_compare(path, f) == Ordering::Less) {
                first = Some(path);
            }
        }

        if let Some(first) = first {
            for (slot, t) in slots.iter_mut().zip(tx.iter_mut()) {
                *slot = t
                    .extract(Some(first))?
                    .filter(|s| name_compare(s.entry.path, first) == Ordering::Equal);
            }
        }

        let mut mask = 0u64;
        let mut dirmask = 0u64;
        let mut winner = None;
        for (i, slot) in slots.iter().enumerate() {
            if let Some(slot) = slot {
                mask |= 1 << i;
                if slot.entry.is_dir() {
                    dirmask |= 1 << i;
                }
                winner = Some(slot.entry);
            }
        }
        let Some(winner) = winner else {
            break;
        };

        interesting = prune_traversal(&winner, info, &base, interesting);
        if interesting == Interest::AllNotInteresting {
            trace!("nothing further can match, stopping");
            break;
        }

        if interesting.is_interesting() {
            view.clear();
            view.extend(slots.iter().map(|s| s.map(|s| s.entry)));
            match visitor.visit(info, mask, dirmask, &view) {
                Ok(used) => mask &= used,
                Err(e) => {
                    if !info.options.show_all_errors {
                        return Err(e);
                    }
                    error.get_or_insert(e);
                }
            }
        }

        for (i, (slot, t)) in slots.iter().zip(tx.iter_mut()).enumerate() {
            if mask & (1 << i) == 0 {
                continue;
            }
            if let Some(slot) = slot {
                t.update(slot)?;
            }
        }
    }

    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
