//! Git protocol error types.

use std::fmt;
use thiserror::Error;

/// Errors that can occur during git protocol operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// The peer broke the protocol grammar.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A ref advertisement could not be parsed.
    #[error("{0}")]
    InvalidAdvertisement(String),

    /// The remote sent a fatal message on the error band.
    #[error("remote error: {0}")]
    Remote(String),

    /// A child process could not be started or did not succeed.
    #[error("{program}: {failure}")]
    Child {
        /// Program name as spawned.
        program: String,
        /// How it failed.
        failure: ChildFailure,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] bough_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a child process failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildFailure {
    /// The program could not be found or executed.
    NotFound,
    /// The program exited with a non-zero code.
    Failed {
        /// Exit code.
        code: i32,
    },
    /// The program was killed by a signal.
    Signaled {
        /// Signal number.
        signal: i32,
    },
}

impl ChildFailure {
    /// Exit code in shell convention: 127 when the program was not found,
    /// `128 + signal` when it was killed.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound => 127,
            Self::Failed { code } => *code,
            Self::Signaled { signal } => 128 + signal,
        }
    }
}

impl fmt::Display for ChildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "cannot run program"),
            Self::Failed { code } => write!(f, "exited with status {code}"),
            Self::Signaled { signal } => write!(f, "died of signal {signal}"),
        }
    }
}
