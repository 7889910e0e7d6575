//! Tree error types.

use bough_storage::StorageError;
use thiserror::Error;

/// Errors raised while decoding or walking trees.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The tree buffer is not a valid serialized tree.
    #[error("corrupt tree at offset {offset}: {reason}")]
    Corrupt {
        /// Byte offset of the entry that failed to decode.
        offset: usize,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// Entries are not stored in tree order.
    #[error("tree entries out of order: {before:?} sorts after {after:?}")]
    OutOfOrder {
        /// The earlier stored name.
        before: String,
        /// The later stored name.
        after: String,
    },

    /// More trees were handed to the walker than the mask can hold.
    #[error("cannot traverse {0} trees at once")]
    TooManyTrees(usize),

    /// Descent went past the configured depth.
    #[error("exceeded maximum allowed tree depth ({0})")]
    TooDeep(usize),

    /// A pathspec string could not be parsed.
    #[error("invalid pathspec: {0}")]
    InvalidPathspec(String),

    /// Reading an object failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
