#![allow(dead_code)]

//! Scripted remote store shared by the integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use progress_core::model::{UserId, UserRecord};
use progress_core::patch::UserPatch;
use progress_core::time::{fixed_clock, fixed_now};
use services::error::RemoteError;
use services::remote::RemoteStore;
use services::sync::SyncCoordinator;
use storage::{
    InMemoryStorage, LedgerStore, PendingPatch, SnapshotStore, Storage, StorageError,
};

/// Remote store whose responses are scripted ahead of time.
///
/// `update` pops one scripted result per call and falls back to success once
/// the queue is drained; a successful update echoes the patch back as the
/// server view unless `update_view` overrides it.
pub struct MockRemote {
    pub list_response: Mutex<Result<Vec<UserRecord>, RemoteError>>,
    pub create_response: Mutex<Result<(), RemoteError>>,
    pub update_scripts: Mutex<VecDeque<Result<(), RemoteError>>>,
    pub update_view: Mutex<Option<UserPatch>>,
    pub applied: Mutex<Vec<(UserId, UserPatch)>>,
    pub created: Mutex<Vec<UserRecord>>,
    pub update_calls: AtomicUsize,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self {
            list_response: Mutex::new(Ok(Vec::new())),
            create_response: Mutex::new(Ok(())),
            update_scripts: Mutex::new(VecDeque::new()),
            update_view: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            update_calls: AtomicUsize::new(0),
        }
    }
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Remote that already holds `record`.
    pub fn with_user(record: UserRecord) -> Arc<Self> {
        let mock = Self::default();
        *mock.list_response.lock().unwrap() = Ok(vec![record]);
        Arc::new(mock)
    }

    /// Remote whose listing fails with `err`.
    pub fn unreachable(err: RemoteError) -> Arc<Self> {
        let mock = Self::default();
        *mock.list_response.lock().unwrap() = Err(err);
        Arc::new(mock)
    }

    /// Scripts the next `n` update calls to fail with `err`.
    pub fn fail_next_updates(&self, n: usize, err: RemoteError) {
        let mut scripts = self.update_scripts.lock().unwrap();
        for _ in 0..n {
            scripts.push_back(Err(err.clone()));
        }
    }

    /// Appends explicit results for upcoming update calls.
    pub fn script_updates(&self, results: impl IntoIterator<Item = Result<(), RemoteError>>) {
        self.update_scripts.lock().unwrap().extend(results);
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Patches acknowledged by the remote, in commit order.
    pub fn applied(&self) -> Vec<(UserId, UserPatch)> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn list(&self) -> Result<Vec<UserRecord>, RemoteError> {
        self.list_response.lock().unwrap().clone()
    }

    async fn create(&self, record: &UserRecord) -> Result<UserRecord, RemoteError> {
        self.create_response.lock().unwrap().clone()?;
        let mut created = record.clone();
        created.id = Some(UserId::new("1"));
        self.created.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update(&self, id: &UserId, patch: &UserPatch) -> Result<UserPatch, RemoteError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.update_scripts.lock().unwrap().pop_front();
        match script {
            Some(Err(err)) => Err(err),
            Some(Ok(())) | None => {
                self.applied.lock().unwrap().push((id.clone(), patch.clone()));
                let view = self.update_view.lock().unwrap().clone();
                Ok(view.unwrap_or_else(|| patch.clone()))
            }
        }
    }
}

/// Ledger whose reads can be made to fail while writes keep working.
pub struct FlakyLedger {
    inner: InMemoryStorage,
    fail_loads: AtomicBool,
}

impl FlakyLedger {
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn load(&self) -> Result<Vec<PendingPatch>, StorageError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("disk read failed".to_string()));
        }
        LedgerStore::load(&self.inner).await
    }

    async fn replace(&self, entries: &[PendingPatch]) -> Result<(), StorageError> {
        LedgerStore::replace(&self.inner, entries).await
    }
}

/// In-memory storage whose ledger reads fail on demand.
pub fn storage_with_flaky_ledger() -> (Arc<FlakyLedger>, Storage) {
    let inner = InMemoryStorage::new();
    let flaky = Arc::new(FlakyLedger {
        inner: inner.clone(),
        fail_loads: AtomicBool::new(false),
    });
    let storage = Storage {
        snapshots: Arc::new(inner),
        ledger: flaky.clone(),
    };
    (flaky, storage)
}

/// Storage whose persisted slots always decode as garbage; writes are
/// recorded so tests can assert the slots get rewritten.
#[derive(Default)]
pub struct CorruptStorage {
    pub snapshot_saves: Mutex<Vec<UserRecord>>,
    pub ledger_writes: Mutex<Vec<Vec<PendingPatch>>>,
}

#[async_trait]
impl SnapshotStore for CorruptStorage {
    async fn load(&self) -> Result<Option<UserRecord>, StorageError> {
        Err(StorageError::Serialization(
            "expected value at line 1 column 1".to_string(),
        ))
    }

    async fn save(&self, record: &UserRecord) -> Result<(), StorageError> {
        self.snapshot_saves.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for CorruptStorage {
    async fn load(&self) -> Result<Vec<PendingPatch>, StorageError> {
        Err(StorageError::Serialization(
            "expected value at line 1 column 1".to_string(),
        ))
    }

    async fn replace(&self, entries: &[PendingPatch]) -> Result<(), StorageError> {
        self.ledger_writes.lock().unwrap().push(entries.to_vec());
        Ok(())
    }
}

/// Storage backed by unreadable slots.
pub fn corrupt_storage() -> (Arc<CorruptStorage>, Storage) {
    let corrupt = Arc::new(CorruptStorage::default());
    let storage = Storage {
        snapshots: corrupt.clone(),
        ledger: corrupt.clone(),
    };
    (corrupt, storage)
}

/// Coordinator on in-memory storage with a deterministic clock.
pub fn coordinator(remote: Arc<MockRemote>, storage: Storage) -> SyncCoordinator {
    SyncCoordinator::new(remote, storage).with_clock(fixed_clock())
}

/// A record the remote already knows about.
pub fn remote_user(total_xp: u64) -> UserRecord {
    let mut record = UserRecord::initial(fixed_now());
    record.id = Some(UserId::new("1"));
    record.profile.total_xp = total_xp;
    record
}
