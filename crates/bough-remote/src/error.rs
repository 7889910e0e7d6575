//! Remote helper error types.

use bough_git::GitError;
use thiserror::Error;

/// Errors raised while serving a remote helper session.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The repository does not exist at the URL.
    #[error("repository '{url}' not found")]
    NotFound {
        /// URL as given by the user.
        url: String,
    },

    /// The server answered with an unexpected HTTP status.
    #[error("unable to access '{url}': The requested URL returned error: {status}")]
    Access {
        /// URL that was requested.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Plain-text body sent by the server, if any.
        message: Option<String>,
    },

    /// Credentials were refused twice.
    #[error("Authentication failed for '{url}'")]
    AuthFailed {
        /// URL that was requested.
        url: String,
    },

    /// The HTTP request itself could not be performed.
    #[error("unable to access '{url}': {reason}")]
    Transport {
        /// URL that was requested.
        url: String,
        /// Description from the HTTP client.
        reason: String,
    },

    /// A POST inside a stateless RPC exchange failed.
    #[error("RPC failed; HTTP {status}")]
    Rpc {
        /// HTTP status code.
        status: u16,
        /// Plain-text body sent by the server, if any.
        message: Option<String>,
    },

    /// The server sent something that is not a valid response.
    #[error("invalid server response; {0}")]
    InvalidResponse(String),

    /// The helper was asked for something it cannot do.
    #[error("{0}")]
    Unsupported(String),

    /// Malformed input from the calling git process.
    #[error("{0}")]
    Protocol(String),

    /// The calling git process sent a command the helper does not know.
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    /// An operation could not complete.
    #[error("{0}")]
    Failed(String),

    /// Loading configuration failed.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Wire protocol or child process error.
    #[error(transparent)]
    Git(#[from] GitError),

    /// Tree decoding error.
    #[error(transparent)]
    Tree(#[from] bough_tree::TreeError),

    /// Object storage error.
    #[error(transparent)]
    Storage(#[from] bough_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Exit status for the helper process: `1` when the command stream
    /// itself was bad, `128` when an operation failed.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownCommand(_) => 1,
            _ => 128,
        }
    }

    /// The server's plain-text explanation, already prefixed with `remote: `
    /// on every line, for errors that carry one.
    pub fn remote_message(&self) -> Option<String> {
        let message = match self {
            Self::Access { message, .. } | Self::Rpc { message, .. } => message.as_deref()?,
            _ => return None,
        };
        Some(
            message
                .lines()
                .map(|line| format!("remote: {line}\n"))
                .collect(),
        )
    }
}
