//! Content-addressed blob storage.
//!
//! Objects live under `objects/<k0k1>/<k2k3>/<key>` with a JSON descriptor
//! next to them at `<key>.desc`. Keys are either a lowercase SHA-256 hex
//! digest or a provenance sidecar key `<digest>.metadata.json`.
//!
//! `put` is create-if-absent: the object file is linked into place without
//! clobbering, so of two racing writers exactly one wins and the other sees
//! [`StoreError::AlreadyExists`].

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::fs;
use tracing::warn;

use crate::event::{is_hex64, sha256_hex};

/// Suffix of the provenance sidecar key for an object.
pub const METADATA_SUFFIX: &str = ".metadata.json";

/// Sidecar key holding the provenance event for `hash`.
pub fn metadata_key(hash: &str) -> String {
    format!("{hash}{METADATA_SUFFIX}")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {0} already exists")]
    AlreadyExists(String),
    #[error("content hash {actual} does not match expected {expected}")]
    HashMismatch { expected: String, actual: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("corrupt object descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Write options for [`BlobStore::put`].
#[derive(Debug, Clone)]
pub struct PutOptions {
    /// Reject the write unless the body hashes to this lowercase hex digest.
    pub expected_sha256: Option<String>,
    pub media_type: String,
    pub cache_control: Option<String>,
}

/// What the store recorded about an object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
    pub media_type: String,
    pub cache_control: Option<String>,
    /// Lowercase hex SHA-256 computed by the store.
    pub sha256: String,
    /// Identity of this stored version, unique per write.
    pub etag: String,
    /// Unix seconds of the write.
    pub uploaded: u64,
}

impl ObjectDescriptor {
    fn new(key: &str, body: &[u8], sha256: String, opts: &PutOptions) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        hasher.update(now.as_nanos().to_be_bytes());
        hasher.update(sha256.as_bytes());
        Self {
            key: key.to_string(),
            size: body.len() as u64,
            media_type: opts.media_type.clone(),
            cache_control: opts.cache_control.clone(),
            sha256,
            etag: hex::encode(hasher.finalize()),
            uploaded: now.as_secs(),
        }
    }
}

/// An object body together with its descriptor.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub descriptor: ObjectDescriptor,
    pub body: Vec<u8>,
}

/// Opaque blob store consumed by the request handlers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Descriptor of `key`, `None` when absent.
    async fn head(&self, key: &str) -> Result<Option<ObjectDescriptor>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Store `body` under `key` only if nothing is stored there yet.
    ///
    /// Fails with [`StoreError::HashMismatch`] before writing anything when
    /// `expected_sha256` is set and does not match the body.
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        opts: PutOptions,
    ) -> Result<ObjectDescriptor, StoreError>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Reject anything that is not a digest or a digest sidecar key.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let digest = key.strip_suffix(METADATA_SUFFIX).unwrap_or(key);
    if is_hex64(digest) && digest.bytes().all(|b| !b.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Check a body against an expected digest without storing it.
fn check_hash(body: &[u8], opts: &PutOptions) -> Result<String, StoreError> {
    let actual = sha256_hex(body);
    match &opts.expected_sha256 {
        Some(expected) if !expected.eq_ignore_ascii_case(&actual) => {
            Err(StoreError::HashMismatch {
                expected: expected.clone(),
                actual,
            })
        }
        _ => Ok(actual),
    }
}

/// Filesystem-backed store rooted at `root`.
#[derive(Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.root.join("objects"))
    }

    /// Compute the canonical path for a key.
    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self
            .root
            .join("objects")
            .join(&key[0..2])
            .join(&key[2..4])
            .join(key))
    }

    /// Every stored key, in no particular order.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = vec![];
        let objects = self.root.join("objects");
        if !objects.exists() {
            return Ok(keys);
        }
        for entry in walkdir::WalkDir::new(objects) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if validate_key(&name).is_ok() {
                keys.push(name.into_owned());
            }
        }
        Ok(keys)
    }
}

fn descriptor_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".desc");
    PathBuf::from(name)
}

/// Link the body into place without clobbering, then write the descriptor.
///
/// A body without a descriptor is invisible to `head` yet blocks every later
/// `put`, so a failed descriptor write unlinks the body again.
fn write_new(
    path: &Path,
    body: &[u8],
    descriptor: &ObjectDescriptor,
) -> Result<(), StoreError> {
    let parent_dir = path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&parent_dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
    tmp.write_all(body)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            StoreError::AlreadyExists(descriptor.key.clone())
        } else {
            e.error.into()
        }
    })?;

    if let Err(e) = write_descriptor(&parent_dir, path, descriptor) {
        if let Err(cleanup) = std::fs::remove_file(path) {
            warn!(path = %path.display(), "failed to unlink body: {cleanup}");
        }
        return Err(e);
    }
    Ok(())
}

fn write_descriptor(
    dir: &Path,
    path: &Path,
    descriptor: &ObjectDescriptor,
) -> Result<(), StoreError> {
    let desc = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&desc, descriptor)?;
    desc.persist(descriptor_path(path)).map_err(|e| e.error)?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectDescriptor>, StoreError> {
        let path = descriptor_path(&self.object_path(key)?);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let Some(descriptor) = self.head(key).await? else {
            return Ok(None);
        };
        match fs::read(self.object_path(key)?).await {
            Ok(body) => Ok(Some(StoredObject { descriptor, body })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        opts: PutOptions,
    ) -> Result<ObjectDescriptor, StoreError> {
        let path = self.object_path(key)?;
        let sha256 = check_hash(&body, &opts)?;
        let descriptor = ObjectDescriptor::new(key, &body, sha256, &opts);
        let written = descriptor.clone();
        tokio::task::spawn_blocking(move || write_new(&path, &body, &written)).await??;
        Ok(descriptor)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.object_path(key)?;
        let existed = remove_if_present(&path).await?;
        remove_if_present(&descriptor_path(&path)).await?;
        Ok(existed)
    }
}

#[cfg(test)]
pub use memory::MemoryBlobStore;
