//! Object source trait.
//!
//! The tree walker and the dumb-HTTP walker only need to look objects up
//! by id; anything that can do that implements [`ObjectSource`].

use crate::{GitObject, ObjectId, ObjectType, Result, StorageError};
use bytes::Bytes;
use std::sync::Arc;

/// Read access to a set of objects addressed by id.
pub trait ObjectSource {
    /// Retrieves an object by ID, `None` if it is not present.
    fn read(&self, id: &ObjectId) -> Result<Option<GitObject>>;

    /// Checks if an object exists.
    fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.read(id)?.is_some())
    }

    /// Retrieves an object and checks that it has the given type.
    fn read_typed(&self, id: &ObjectId, expected: ObjectType) -> Result<GitObject> {
        let object = self
            .read(id)?
            .ok_or_else(|| StorageError::ObjectNotFound(id.to_hex()))?;
        if object.object_type != expected {
            return Err(StorageError::TypeMismatch {
                id: id.to_hex(),
                expected: expected.as_str(),
                actual: object.object_type.as_str(),
            });
        }
        Ok(object)
    }

    /// Returns the raw buffer of a tree object.
    fn read_tree(&self, id: &ObjectId) -> Result<Bytes> {
        Ok(self.read_typed(id, ObjectType::Tree)?.data)
    }
}

impl<T: ObjectSource + ?Sized> ObjectSource for Arc<T> {
    fn read(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        (**self).read(id)
    }

    fn contains(&self, id: &ObjectId) -> Result<bool> {
        (**self).contains(id)
    }
}

impl<T: ObjectSource + ?Sized> ObjectSource for &T {
    fn read(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        (**self).read(id)
    }

    fn contains(&self, id: &ObjectId) -> Result<bool> {
        (**self).contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Single(GitObject);

    impl ObjectSource for Single {
        fn read(&self, id: &ObjectId) -> Result<Option<GitObject>> {
            Ok((self.0.id == *id).then(|| self.0.clone()))
        }
    }

    #[test]
    fn test_contains_default() {
        let blob = GitObject::blob(b"x".to_vec());
        let id = blob.id;
        let source = Single(blob);
        assert!(source.contains(&id).unwrap());
        assert!(!source.contains(&ObjectId::null()).unwrap());
    }

    #[test]
    fn test_read_tree_type_mismatch() {
        let blob = GitObject::blob(b"x".to_vec());
        let id = blob.id;
        let source = Single(blob);
        let err = source.read_tree(&id).unwrap_err();
        assert!(matches!(
            err,
            StorageError::TypeMismatch {
                expected: "tree",
                actual: "blob",
                ..
            }
        ));
    }

    #[test]
    fn test_read_tree_missing() {
        let source = Single(GitObject::blob(b"x".to_vec()));
        let err = source.read_tree(&ObjectId::null()).unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound(_)));
    }
}
