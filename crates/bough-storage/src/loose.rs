//! Loose object directory (`objects/xx/yyyy...`).

use crate::{GitObject, ObjectId, ObjectSource, ObjectType, Result, StorageError};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A directory of zlib-compressed loose objects, fanned out by the first
/// byte of the id.
#[derive(Debug, Clone)]
pub struct LooseObjectDir {
    root: PathBuf,
}

impl LooseObjectDir {
    /// Opens an object directory. The directory is created lazily on write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the object directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path of an object below an objects directory, e.g.
    /// `ce/013625030ba8dba906f756967f9e9ca394464a`.
    pub fn relative_path(id: &ObjectId) -> String {
        let hex = id.to_hex();
        format!("{}/{}", &hex[..2], &hex[2..])
    }

    /// Deflates `"<type> <len>\0"` plus the body, the on-disk and on-wire
    /// form of a loose object.
    pub fn encode(object: &GitObject) -> Result<Vec<u8>> {
        let zlib = |e: std::io::Error| StorageError::Compression(e.to_string());
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        write!(encoder, "{} {}\0", object.object_type, object.data.len()).map_err(zlib)?;
        encoder.write_all(&object.data).map_err(zlib)?;
        encoder.finish().map_err(zlib)
    }

    /// Inflates a loose object. The header's length must match the body.
    pub fn decode(compressed: &[u8]) -> Result<GitObject> {
        let mut raw = Vec::new();
        ZlibDecoder::new(compressed)
            .read_to_end(&mut raw)
            .map_err(|e| StorageError::Compression(e.to_string()))?;

        let bad = |what: &str| StorageError::InvalidObject(format!("loose object: {what}"));
        let nul = raw.iter().position(|&b| b == 0).ok_or_else(|| bad("no header"))?;
        let header = std::str::from_utf8(&raw[..nul]).map_err(|_| bad("header is not text"))?;
        let (kind, len) = header.split_once(' ').ok_or_else(|| bad("malformed header"))?;
        let object_type: ObjectType = kind.parse()?;
        let len: usize = len.parse().map_err(|_| bad("bad length"))?;

        let body = &raw[nul + 1..];
        if body.len() != len {
            return Err(bad(&format!("header says {len} bytes, body has {}", body.len())));
        }
        Ok(GitObject::new(object_type, Bytes::copy_from_slice(body)))
    }

    fn path_of(&self, id: &ObjectId) -> PathBuf {
        self.root.join(Self::relative_path(id))
    }

    /// Writes an already compressed object after verifying it inflates to
    /// the expected id.
    pub fn write_compressed(&self, id: &ObjectId, compressed: &[u8]) -> Result<()> {
        let object = Self::decode(compressed)?;
        if object.id != *id {
            return Err(StorageError::InvalidObject(format!(
                "object {} hashes to {}",
                id, object.id
            )));
        }
        self.write_raw(id, compressed)
    }

    /// Compresses and writes an object, returning its id.
    pub fn write(&self, object: &GitObject) -> Result<ObjectId> {
        let compressed = Self::encode(object)?;
        self.write_raw(&object.id, &compressed)?;
        Ok(object.id)
    }

    fn write_raw(&self, id: &ObjectId, compressed: &[u8]) -> Result<()> {
        let path = self.path_of(id);
        if path.exists() {
            return Ok(());
        }
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidObject(path.display().to_string()))?;
        fs::create_dir_all(dir)?;

        let tmp = dir.join(format!("tmp_obj_{}", std::process::id()));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(compressed)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(id = %id, "wrote loose object");
        Ok(())
    }
}

impl ObjectSource for LooseObjectDir {
    fn read(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        let compressed = match fs::read(self.path_of(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let object = Self::decode(&compressed)?;
        if object.id != *id {
            return Err(StorageError::InvalidObject(format!(
                "object file {} is corrupt",
                id
            )));
        }
        Ok(Some(object))
    }

    fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.path_of(id).is_file())
    }
}
