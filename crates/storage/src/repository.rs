use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use progress_core::model::{UserId, UserRecord};
use progress_core::patch::UserPatch;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A partial update that has not yet been acknowledged by the remote store.
///
/// Created when a remote commit fails; destroyed when a later flush for the
/// same target succeeds or when the rejection retry cap is exhausted.
/// Entries are FIFO per target id and never merged or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPatch {
    pub target_id: UserId,
    pub patch: UserPatch,
    pub enqueued_at: DateTime<Utc>,
    /// Remote rejections consumed so far; transient failures do not count.
    #[serde(default)]
    pub attempts: u32,
}

/// Durable slot holding the last-known-good user record.
///
/// Read/written as a single atomic unit; used as the cold-start fallback
/// when the remote store is unreachable.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the cached record, `None` when no snapshot has ever been saved.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` for malformed persisted content
    /// (callers treat this as absent) or `Connection` for I/O failures.
    async fn load(&self) -> Result<Option<UserRecord>, StorageError>;

    /// Replace the snapshot atomically.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be written.
    async fn save(&self, record: &UserRecord) -> Result<(), StorageError>;
}

/// Durable slot holding the pending-patch ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load all pending patches in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` for malformed persisted content
    /// (callers treat this as an empty ledger) or `Connection` for I/O
    /// failures.
    async fn load(&self) -> Result<Vec<PendingPatch>, StorageError>;

    /// Replace the full ledger atomically.
    ///
    /// Every read-modify-write of the ledger goes through a single `replace`
    /// so no partial state is ever observable.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the ledger cannot be written.
    async fn replace(&self, entries: &[PendingPatch]) -> Result<(), StorageError>;
}

/// In-memory storage for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    snapshot: Arc<Mutex<Option<UserRecord>>>,
    ledger: Arc<Mutex<Vec<PendingPatch>>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStorage {
    async fn load(&self) -> Result<Option<UserRecord>, StorageError> {
        let guard = self
            .snapshot
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }

    async fn save(&self, record: &UserRecord) -> Result<(), StorageError> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *guard = Some(record.clone());
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryStorage {
    async fn load(&self) -> Result<Vec<PendingPatch>, StorageError> {
        let guard = self
            .ledger
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }

    async fn replace(&self, entries: &[PendingPatch]) -> Result<(), StorageError> {
        let mut guard = self
            .ledger
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *guard = entries.to_vec();
        Ok(())
    }
}

/// Aggregates the two durable slots behind trait objects for easy backend
/// swapping.
#[derive(Clone)]
pub struct Storage {
    pub snapshots: Arc<dyn SnapshotStore>,
    pub ledger: Arc<dyn LedgerStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let store = InMemoryStorage::new();
        let snapshots: Arc<dyn SnapshotStore> = Arc::new(store.clone());
        let ledger: Arc<dyn LedgerStore> = Arc::new(store);
        Self { snapshots, ledger }
    }
}
