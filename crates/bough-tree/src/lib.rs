//! Tree objects for bough.
//!
//! This crate decodes serialized tree objects, matches tree entries against
//! pathspecs and walks any number of trees in lock-step:
//!
//! - [`TreeDesc`]: a cursor decoding one `<mode> SP <name> NUL <id>` entry
//!   at a time
//! - [`Pathspec`]: user path patterns with the pruning used during walks
//! - [`traverse_trees`]: the N-way merge-walk driving a [`Visitor`]
//! - [`diff_trees`]: a recursive two-tree diff built on the walker

mod desc;
mod diff;
mod entry;
mod error;
mod find;
mod order;
mod pathspec;
mod traverse;

pub use desc::{TreeDesc, TreeIter};
pub use diff::{diff_trees, TreeChange};
pub use entry::{canonical_mode, write_entry, TreeBuf, TreeEntry, MODE_EXEC, MODE_FILE, MODE_GITLINK, MODE_SYMLINK, MODE_TREE};
pub use error::TreeError;
pub use find::{find_entry, get_tree_entry};
pub use order::{base_name_compare, name_compare};
pub use pathspec::{within_depth, Interest, Magic, Pathspec, PathspecItem};
pub use traverse::{traverse_trees, TraverseInfo, TraverseOptions, Visitor, MAX_TRAVERSE_TREES};

/// Result type for tree operations.
pub type Result<T> = std::result::Result<T, TreeError>;
