//! In-memory object store.

use crate::{GitObject, ObjectId, ObjectSource, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Objects kept in memory and shared through `&self`.
///
/// Used as fixture storage and as the local side of in-process pushes.
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: RwLock<HashMap<ObjectId, GitObject>>,
}

impl ObjectStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `object` and returns its id. Adding an id twice keeps the
    /// first copy; both have the same content anyway.
    pub fn put(&self, object: GitObject) -> ObjectId {
        let id = object.id;
        self.objects.write().entry(id).or_insert(object);
        id
    }

    /// Adds a blob with `content`.
    pub fn put_blob(&self, content: impl Into<Bytes>) -> ObjectId {
        self.put(GitObject::blob(content))
    }

    /// Number of distinct objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// True when nothing was added.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl FromIterator<GitObject> for ObjectStore {
    fn from_iter<I: IntoIterator<Item = GitObject>>(objects: I) -> Self {
        let store = Self::new();
        for object in objects {
            store.put(object);
        }
        store
    }
}

impl ObjectSource for ObjectStore {
    fn read(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        Ok(self.objects.read().get(id).cloned())
    }

    fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.objects.read().contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObjectType, StorageError};

    #[test]
    fn test_put_and_read() {
        let store = ObjectStore::new();
        assert!(store.is_empty());
        let id = store.put_blob(b"contents".to_vec());

        let object = store.read(&id).unwrap().unwrap();
        assert_eq!(object.object_type, ObjectType::Blob);
        assert_eq!(object.data.as_ref(), b"contents");
        assert!(store.contains(&id).unwrap());
        assert!(store.read(&ObjectId::null()).unwrap().is_none());
    }

    #[test]
    fn test_duplicates_collapse() {
        let store: ObjectStore = [
            GitObject::blob(b"same".to_vec()),
            GitObject::blob(b"same".to_vec()),
            GitObject::tree(Vec::new()),
        ]
        .into_iter()
        .collect();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_read_tree_checks_type() {
        let store = ObjectStore::new();
        let tree = store.put(GitObject::tree(Vec::new()));
        let blob = store.put_blob(b"x".to_vec());

        assert!(store.read_tree(&tree).unwrap().is_empty());
        assert!(matches!(
            store.read_tree(&blob),
            Err(StorageError::TypeMismatch { expected: "tree", actual: "blob", .. })
        ));
        assert!(matches!(
            store.read_tree(&ObjectId::null()),
            Err(StorageError::ObjectNotFound(_))
        ));
    }
}
