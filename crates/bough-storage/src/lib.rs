//! Object identifiers and object sources for bough.
//!
//! This crate provides the content-addressed data model shared by the
//! tree walker and the transport: 20-byte object ids, object types,
//! an in-memory store and a loose-object directory.

mod error;
mod loose;
mod object;
mod store;
mod traits;

pub use error::StorageError;
pub use loose::LooseObjectDir;
pub use object::{hash_object, GitObject, ObjectId, ObjectType};
pub use store::ObjectStore;
pub use traits::ObjectSource;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
