//! Refs as seen by the push protocol.

use bough_storage::ObjectId;
use std::ops::{Index, IndexMut};

/// Where a ref stands in a push.
///
/// Statuses only move forward during one push: `None` becomes
/// `ExpectingReport`, `Ok` or `RejectNoDelete`, and `ExpectingReport` ends
/// as `Ok` or `RemoteReject`. `UpToDate` and `RejectNonFastForward` are set
/// before the push starts and cause the ref to be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefStatus {
    /// Nothing decided yet.
    #[default]
    None,
    /// The remote already has the new value.
    UpToDate,
    /// A deletion the remote cannot perform.
    RejectNoDelete,
    /// The update would lose history.
    RejectNonFastForward,
    /// The remote refused the update.
    RemoteReject,
    /// Sent, waiting for the remote's report.
    ExpectingReport,
    /// Done.
    Ok,
}

impl RefStatus {
    /// True for the statuses a successful push may end with.
    pub fn is_success(self) -> bool {
        matches!(self, Self::None | Self::UpToDate | Self::Ok)
    }
}

/// One remote ref together with the local value it should get.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ref {
    /// Full ref name on the remote.
    pub name: String,
    /// Value the remote currently has.
    pub old_id: ObjectId,
    /// Value to push.
    pub new_id: ObjectId,
    /// Push status.
    pub status: RefStatus,
    /// Local ref the new value comes from.
    pub peer_ref: Option<String>,
    /// The update removes the ref.
    pub deletion: bool,
    /// The update is not a fast-forward.
    pub nonfastforward: bool,
    /// Target when this is a symbolic ref.
    pub symref: Option<String>,
    /// Message the remote attached to its status line.
    pub remote_status: Option<String>,
}

impl Ref {
    /// A ref as advertised by the remote.
    pub fn new(name: impl Into<String>, old_id: ObjectId) -> Self {
        Self {
            name: name.into(),
            old_id,
            ..Self::default()
        }
    }

    /// Sets the value to push from the local ref `peer`. A null `new_id`
    /// makes this a deletion.
    pub fn with_update(mut self, peer: impl Into<String>, new_id: ObjectId) -> Self {
        self.peer_ref = Some(peer.into());
        self.new_id = new_id;
        self.deletion = new_id.is_null();
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: RefStatus) -> Self {
        self.status = status;
        self
    }

    /// Marks the update as forced.
    pub fn forced(mut self) -> Self {
        self.nonfastforward = true;
        self
    }
}

/// An ordered ref collection addressed by stable indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefList {
    refs: Vec<Ref>,
}

impl RefList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a ref and returns its index.
    pub fn push(&mut self, r: Ref) -> usize {
        self.refs.push(r);
        self.refs.len() - 1
    }

    /// Number of refs.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns true if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Iterates in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Ref> {
        self.refs.iter()
    }

    /// Iterates mutably in order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Ref> {
        self.refs.iter_mut()
    }

    /// Returns the ref at `index`.
    pub fn get(&self, index: usize) -> Option<&Ref> {
        self.refs.get(index)
    }

    /// Index of the ref called `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.find_from(0, name)
    }

    /// Index of the first ref called `name` at or after `start`.
    pub fn find_from(&self, start: usize, name: &str) -> Option<usize> {
        self.refs
            .get(start..)?
            .iter()
            .position(|r| r.name == name)
            .map(|i| i + start)
    }

    /// Looks `name` up starting at `hint`, falling back to a full scan.
    pub fn find_hinted(&self, hint: Option<usize>, name: &str) -> Option<usize> {
        hint.and_then(|h| self.find_from(h, name))
            .or_else(|| self.find(name))
    }

    /// Resets every status to [`RefStatus::None`].
    pub fn reset_statuses(&mut self) {
        for r in &mut self.refs {
            r.status = RefStatus::None;
        }
    }

    /// Returns true if every ref ended in a successful status.
    pub fn all_succeeded(&self) -> bool {
        self.refs.iter().all(|r| r.status.is_success())
    }
}

impl Index<usize> for RefList {
    type Output = Ref;

    fn index(&self, index: usize) -> &Ref {
        &self.refs[index]
    }
}

impl IndexMut<usize> for RefList {
    fn index_mut(&mut self, index: usize) -> &mut Ref {
        &mut self.refs[index]
    }
}

impl FromIterator<Ref> for RefList {
    fn from_iter<I: IntoIterator<Item = Ref>>(iter: I) -> Self {
        Self {
            refs: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for RefList {
    type Item = Ref;
    type IntoIter = std::vec::IntoIter<Ref>;

    fn into_iter(self) -> Self::IntoIter {
        self.refs.into_iter()
    }
}

impl<'a> IntoIterator for &'a RefList {
    type Item = &'a Ref;
    type IntoIter = std::slice::Iter<'a, Ref>;

    fn into_iter(self) -> Self::IntoIter {
        self.refs.iter()
    }
}
