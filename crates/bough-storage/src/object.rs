//! Object identifiers and object types.

use crate::{Result, StorageError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// A 20-byte SHA-1 object id.
///
/// Ids order by their raw bytes. Serialized forms use lowercase hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Raw id length.
    pub const LEN: usize = 20;
    /// Hex id length.
    pub const HEX_LEN: usize = 40;

    /// Wraps raw id bytes.
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// `None` unless `bytes` is exactly [`Self::LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// The all-zero id. On the wire it stands for "no object", the old id
    /// of a created ref or the new id of a deleted one.
    pub const fn null() -> Self {
        Self([0; Self::LEN])
    }

    /// True for [`Self::null`].
    pub fn is_null(&self) -> bool {
        self.0 == [0; Self::LEN]
    }

    /// Parses 40 hex digits.
    pub fn from_hex(hex: &str) -> Result<Self> {
        Self::from_hex_bytes(hex.as_bytes())
    }

    /// Parses 40 hex digits given as bytes, as they appear in protocol
    /// lines and object headers.
    pub fn from_hex_bytes(hex: &[u8]) -> Result<Self> {
        if hex.len() != Self::HEX_LEN {
            return Err(StorageError::InvalidObject(format!(
                "object id must be {} hex digits, got {}",
                Self::HEX_LEN,
                hex.len()
            )));
        }
        let mut id = Self::null();
        hex::decode_to_slice(hex, &mut id.0)
            .map_err(|e| StorageError::InvalidObject(format!("bad object id: {e}")))?;
        Ok(id)
    }

    /// Raw id bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for ObjectId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_hex()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectId").field(&format_args!("{self}")).finish()
    }
}

/// Kind of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// File contents.
    Blob,
    /// Directory listing.
    Tree,
    /// Commit.
    Commit,
    /// Annotated tag.
    Tag,
}

impl ObjectType {
    /// Name used in object headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }
}

impl FromStr for ObjectType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "blob" => Self::Blob,
            "tree" => Self::Tree,
            "commit" => Self::Commit,
            "tag" => Self::Tag,
            other => {
                return Err(StorageError::InvalidObject(format!(
                    "unknown object type '{other}'"
                )))
            }
        })
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Id of an object: SHA-1 over `"<type> <len>\0"` followed by the data.
pub fn hash_object(object_type: ObjectType, data: &[u8]) -> ObjectId {
    let digest = Sha1::new()
        .chain_update(format!("{object_type} {}\0", data.len()))
        .chain_update(data)
        .finalize();
    let mut id = ObjectId::null();
    id.0.copy_from_slice(&digest);
    id
}

/// An object with its id, type and uncompressed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitObject {
    /// Id, always [`hash_object`] of the type and data.
    pub id: ObjectId,
    /// Kind.
    pub object_type: ObjectType,
    /// Body without the header.
    pub data: Bytes,
}

impl GitObject {
    /// Hashes `data` into an object of the given type.
    pub fn new(object_type: ObjectType, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            id: hash_object(object_type, &data),
            object_type,
            data,
        }
    }

    /// A blob.
    pub fn blob(content: impl Into<Bytes>) -> Self {
        Self::new(ObjectType::Blob, content)
    }

    /// A tree from already encoded entries.
    pub fn tree(entries: impl Into<Bytes>) -> Self {
        Self::new(ObjectType::Tree, entries)
    }

    /// A commit. `author` and `committer` are full ident lines
    /// (`Name <email> <time> <tz>`).
    pub fn commit(
        tree: &ObjectId,
        parents: &[ObjectId],
        author: &str,
        committer: &str,
        message: &str,
    ) -> Self {
        let mut body = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(body, "tree {tree}");
        for parent in parents {
            let _ = writeln!(body, "parent {parent}");
        }
        let _ = write!(body, "author {author}\ncommitter {committer}\n\n{message}");
        Self::new(ObjectType::Commit, body)
    }

    /// An annotated tag named `name` pointing at `target`.
    pub fn tag(target: &GitObject, name: &str, tagger: &str, message: &str) -> Self {
        let body = format!(
            "object {}\ntype {}\ntag {name}\ntagger {tagger}\n\n{message}",
            target.id, target.object_type
        );
        Self::new(ObjectType::Tag, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENT: &str = "A U Thor <author@example.com> 1112911993 -0700";

    #[test]
    fn test_parse_hex() {
        let hex = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let id: ObjectId = hex.parse().unwrap();
        assert_eq!(id.to_string(), hex);
        assert_eq!(id.to_hex(), hex);
        assert_eq!(format!("{id:?}"), format!("ObjectId({hex})"));
    }

    #[test]
    fn test_parse_hex_rejects() {
        let err = ObjectId::from_hex("abc").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid object: object id must be 40 hex digits, got 3"
        );
        assert!(ObjectId::from_hex(&"0".repeat(42)).is_err());
        assert!(ObjectId::from_hex(&"g".repeat(40)).is_err());
    }

    #[test]
    fn test_known_ids() {
        assert_eq!(
            GitObject::blob(b"hello\n".to_vec()).id.to_hex(),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
        assert_eq!(
            GitObject::tree(Vec::new()).id.to_hex(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
        assert_eq!(
            hash_object(ObjectType::Blob, b"").to_hex(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }

    #[test]
    fn test_null_id() {
        assert!(ObjectId::null().is_null());
        assert_eq!(ObjectId::default(), ObjectId::null());
        assert_eq!(ObjectId::null().to_hex(), "0".repeat(40));
        assert!(!ObjectId::from_bytes([1; 20]).is_null());
    }

    #[test]
    fn test_from_slice_length() {
        assert_eq!(
            ObjectId::from_slice(&[7; 20]),
            Some(ObjectId::from_bytes([7; 20]))
        );
        assert_eq!(ObjectId::from_slice(&[7; 19]), None);
        assert_eq!(ObjectId::from_slice(&[7; 21]), None);
    }

    #[test]
    fn test_ids_order_bytewise() {
        let mut low = [0xff; 20];
        low[0] = 0x01;
        assert!(ObjectId::from_bytes(low) < ObjectId::from_bytes([0x02; 20]));
    }

    #[test]
    fn test_object_type_names() {
        assert_eq!("tag".parse::<ObjectType>().unwrap(), ObjectType::Tag);
        assert_eq!(ObjectType::Tree.to_string(), "tree");
        let err = "blobby".parse::<ObjectType>().unwrap_err();
        assert_eq!(err.to_string(), "invalid object: unknown object type 'blobby'");
    }

    #[test]
    fn test_commit_body() {
        let tree = ObjectId::from_bytes([1; 20]);
        let parents = [ObjectId::from_bytes([2; 20]), ObjectId::from_bytes([3; 20])];
        let commit = GitObject::commit(&tree, &parents, IDENT, IDENT, "merge\n");

        let expected = format!(
            "tree {tree}\nparent {}\nparent {}\nauthor {IDENT}\ncommitter {IDENT}\n\nmerge\n",
            parents[0], parents[1]
        );
        assert_eq!(commit.object_type, ObjectType::Commit);
        assert_eq!(commit.data, expected.as_bytes());
        assert_eq!(commit.id, hash_object(ObjectType::Commit, expected.as_bytes()));
    }

    #[test]
    fn test_tag_body() {
        let blob = GitObject::blob(b"x".to_vec());
        let tag = GitObject::tag(&blob, "v1.0", IDENT, "release\n");
        let body = std::str::from_utf8(&tag.data).unwrap();
        assert!(body.starts_with(&format!("object {}\ntype blob\ntag v1.0\n", blob.id)));
        assert!(body.ends_with("\n\nrelease\n"));
    }

    #[test]
    fn test_serde_as_hex() {
        let id = ObjectId::from_bytes([0xab; 20]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));
        assert_eq!(serde_json::from_str::<ObjectId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<ObjectId>("\"abcd\"").is_err());
    }
}
