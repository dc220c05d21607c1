//! Provenance sidecars: signed file metadata written after each upload.
//!
//! The service signs a kind 1063 event describing the stored object and
//! keeps it at `<hash>.metadata.json`. Writing happens on a detached
//! background job so a slow or failing sidecar never delays or fails the
//! upload that triggered it. Jobs are tracked so shutdown can wait for them.
//! A job only writes while the object it describes is still the one stored.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rand::{seq::SliceRandom, thread_rng};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::blobs::{
    metadata_key, BlobStore, FileBlobStore, ObjectDescriptor, PutOptions, StoreError,
    METADATA_SUFFIX,
};
use crate::event::{unix_now, DelegationTag, Event, FileMetadata, Tag, KIND_FILE_METADATA};
use crate::keys::{Keys, UnsignedEvent};
use crate::verify;

#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("signing metadata event: {0}")]
    Sign(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("object {0} was replaced or removed")]
    Superseded(String),
}

/// Everything needed to describe one freshly stored object.
#[derive(Debug, Clone)]
pub struct ProvenanceJob {
    pub descriptor: ObjectDescriptor,
    /// Canonical URL the object is served from.
    pub url: String,
    /// Signer of the auth event that uploaded the object.
    pub uploader: String,
    /// Delegation carried by the upload token, copied verbatim.
    pub delegation: Option<DelegationTag>,
}

/// Build and sign the metadata event for a stored object.
pub fn build(job: &ProvenanceJob, keys: &Keys, now: u64) -> Result<Event, serde_json::Error> {
    let d = &job.descriptor;
    let mut tags = vec![
        Tag::new(["url", job.url.as_str()]),
        Tag::new(["m", d.media_type.as_str()]),
        Tag::new(["x", d.sha256.as_str()]),
        Tag::new(["size".to_string(), d.size.to_string()]),
        Tag::new(["p", job.uploader.as_str()]),
    ];
    if let Some(delegation) = &job.delegation {
        tags.push(delegation.to_tag());
    }
    keys.sign(UnsignedEvent {
        kind: KIND_FILE_METADATA,
        created_at: now,
        tags,
        content: String::new(),
    })
}

/// Store `event` as the sidecar of the object it describes.
pub async fn persist(
    store: &dyn BlobStore,
    hash: &str,
    event: &Event,
) -> Result<ObjectDescriptor, ProvenanceError> {
    let body = serde_json::to_vec(event)?;
    let desc = store
        .put(
            &metadata_key(hash),
            body,
            PutOptions {
                expected_sha256: None,
                media_type: "application/json".into(),
                cache_control: None,
            },
        )
        .await?;
    Ok(desc)
}

/// Load the verified metadata of `hash`.
///
/// A sidecar that fails to parse, verify, or describe `hash` is logged and
/// treated as missing. Only storage failures are errors.
pub async fn load(store: &dyn BlobStore, hash: &str) -> Result<Option<FileMetadata>, StoreError> {
    let Some(obj) = store.get(&metadata_key(hash)).await? else {
        return Ok(None);
    };
    match parse_sidecar(&obj.body, hash) {
        Ok(meta) => Ok(Some(meta)),
        Err(e) => {
            warn!(%hash, "ignoring provenance sidecar: {e:#}");
            Ok(None)
        }
    }
}

fn parse_sidecar(body: &[u8], hash: &str) -> Result<FileMetadata> {
    let event: Event = serde_json::from_slice(body)?;
    if !verify::verify(&event) {
        return Err(anyhow!("signature does not verify"));
    }
    let meta = FileMetadata::try_from(event)?;
    if meta.sha256 != hash {
        return Err(anyhow!("describes {} instead", meta.sha256));
    }
    Ok(meta)
}

/// Spawns provenance jobs and keeps track of them until they finish.
#[derive(Clone)]
pub struct ProvenanceWriter {
    store: Arc<dyn BlobStore>,
    keys: Arc<Keys>,
    tracker: TaskTracker,
}

impl ProvenanceWriter {
    pub fn new(store: Arc<dyn BlobStore>, keys: Arc<Keys>) -> Self {
        Self {
            store,
            keys,
            tracker: TaskTracker::new(),
        }
    }

    /// Public key provenance events are signed with.
    pub fn public_key(&self) -> &str {
        self.keys.public_key()
    }

    /// Schedule `job` in the background. Failures are logged, never returned.
    pub fn spawn(&self, job: ProvenanceJob) -> JoinHandle<()> {
        let store = self.store.clone();
        let keys = self.keys.clone();
        self.tracker.spawn(async move {
            let hash = job.descriptor.sha256.clone();
            match write(store.as_ref(), &keys, &job).await {
                Ok(desc) => debug!(%hash, size = desc.size, "provenance written"),
                Err(e @ ProvenanceError::Superseded(_)) => {
                    debug!(%hash, "provenance skipped: {e}")
                }
                Err(e) => warn!(%hash, "provenance write failed: {e}"),
            }
        })
    }

    /// Wait for every scheduled job, including ones spawned while waiting.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn write(
    store: &dyn BlobStore,
    keys: &Keys,
    job: &ProvenanceJob,
) -> Result<ObjectDescriptor, ProvenanceError> {
    let hash = &job.descriptor.sha256;
    match store.head(hash).await? {
        Some(current) if current.etag == job.descriptor.etag => {}
        _ => return Err(ProvenanceError::Superseded(hash.clone())),
    }
    let event = build(job, keys, unix_now())?;
    persist(store, hash, &event).await
}

/// Verify a random sample of stored sidecars, returning how many were checked.
pub async fn verify_sample(store: &FileBlobStore, sample: usize) -> Result<usize> {
    let mut hashes: Vec<String> = store
        .keys()?
        .into_iter()
        .filter_map(|k| k.strip_suffix(METADATA_SUFFIX).map(str::to_string))
        .collect();
    hashes.shuffle(&mut thread_rng());
    let take = sample.min(hashes.len());
    for hash in hashes.iter().take(take) {
        let obj = store
            .get(&metadata_key(hash))
            .await?
            .with_context(|| format!("sidecar for {hash} vanished"))?;
        parse_sidecar(&obj.body, hash).with_context(|| format!("sidecar for {hash}"))?;
    }
    Ok(take)
}
