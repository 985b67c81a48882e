//! Durable job store.
//!
//! An in-memory map of job id to [`JobRecord`], mirrored to one JSON document
//! on disk. Every mutation rewrites the whole document (temp file, fsync,
//! rename, directory fsync) before it is applied in memory, so a record is
//! only visible once it is durable. A single store-wide lock serializes all
//! mutations.
//!
//! The write and the in-memory swap run in their own task holding the lock,
//! so a caller that is dropped mid-write never leaves disk and memory apart.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::job::{InvalidTransition, JobRecord};
use crate::services::identity::JobId;

type Records = BTreeMap<JobId, JobRecord>;

pub struct JobStore {
    path: Arc<PathBuf>,
    records: Arc<Mutex<Records>>,
}

impl JobStore {
    /// Open the store, loading the existing document if there is one.
    ///
    /// A missing or blank document starts an empty store. Anything else that
    /// is not a JSON object of job records is refused.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => parse_document(&path, &bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Records::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!(
            path = %path.display(),
            records = records.len(),
            "Job store loaded"
        );

        Ok(Self {
            path: Arc::new(path),
            records: Arc::new(Mutex::new(records)),
        })
    }

    /// Fetch a copy of the record for `id`.
    pub async fn get(&self, id: &JobId) -> Result<JobRecord, StoreError> {
        self.records
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub async fn has(&self, id: &JobId) -> bool {
        self.records.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Insert or replace the record for `id` and persist the document.
    pub async fn set(&self, id: JobId, record: JobRecord) -> Result<(), StoreError> {
        let records = self.records.clone().lock_owned().await;
        let mut next = (*records).clone();
        next.insert(id, record);
        self.commit(records, next).await
    }

    /// Insert `record` only if `id` is unknown. Returns whether it was inserted.
    ///
    /// The existence check and the write happen under one lock, so concurrent
    /// callers with the same id create exactly one record.
    pub async fn insert_if_absent(&self, id: JobId, record: JobRecord) -> Result<bool, StoreError> {
        let records = self.records.clone().lock_owned().await;
        if records.contains_key(&id) {
            return Ok(false);
        }
        let mut next = (*records).clone();
        next.insert(id, record);
        self.commit(records, next).await?;
        Ok(true)
    }

    /// Read-modify-write the record for `id` and persist the result.
    ///
    /// If `apply` fails nothing is written.
    pub async fn update<F>(&self, id: &JobId, apply: F) -> Result<JobRecord, StoreError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), StoreError>,
    {
        let records = self.records.clone().lock_owned().await;
        let mut record = records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        apply(&mut record)?;

        let mut next = (*records).clone();
        next.insert(id.clone(), record.clone());
        self.commit(records, next).await?;
        Ok(record)
    }

    /// Copy of every record, in id order.
    pub async fn snapshot(&self) -> Vec<(JobId, JobRecord)> {
        self.records
            .lock()
            .await
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Persist `next`, then make it the live map. Runs to completion even if
    /// the caller stops waiting.
    async fn commit(&self, mut current: OwnedMutexGuard<Records>, next: Records) -> Result<(), StoreError> {
        let path = self.path.clone();
        tokio::spawn(async move {
            write_document(&path, &next).await?;
            *current = next;
            Ok::<_, StoreError>(())
        })
        .await?
    }
}

async fn write_document(path: &Path, records: &Records) -> Result<(), StoreError> {
    let payload = serde_json::to_vec_pretty(records).map_err(StoreError::Serialize)?;

    let mut temp_path = path.to_path_buf().into_os_string();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let mut file = tokio::fs::File::create(&temp_path).await?;
    file.write_all(&payload).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp_path, path).await?;
    sync_parent(path).await?;

    tracing::trace!(
        path = %path.display(),
        records = records.len(),
        bytes = payload.len(),
        "Job store persisted"
    );
    Ok(())
}

/// Flush the directory entry so the rename survives a crash.
#[cfg(unix)]
async fn sync_parent(path: &Path) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::File::open(parent).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn parse_document(path: &Path, bytes: &[u8]) -> Result<Records, StoreError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Records::new());
    }

    let document: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

    if !document.is_object() {
        return Err(StoreError::NotAnObject(path.to_path_buf()));
    }

    serde_json::from_value(document).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No job with id {0}")]
    NotFound(JobId),

    #[error("Job store document {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Job store document {} is not a JSON object", .0.display())]
    NotAnObject(PathBuf),

    #[error("Job store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize job store: {0}")]
    Serialize(serde_json::Error),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Job store write task failed: {0}")]
    WriteTask(#[from] tokio::task::JoinError),
}
