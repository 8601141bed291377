//! In-memory authoritative copy of the user record.
//!
//! Every read the rest of the application performs goes through this store;
//! the sync coordinator is the only writer. Reads and writes are infallible
//! so callers never have to handle storage errors on the hot path.

use std::sync::{Arc, RwLock};

use progress_core::model::UserRecord;
use progress_core::patch::UserPatch;

/// Shared handle to the current in-memory record.
#[derive(Clone, Default)]
pub struct RecordStore {
    inner: Arc<RwLock<Option<UserRecord>>>,
}

impl RecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record, `None` before bootstrap has produced one.
    #[must_use]
    pub fn get(&self) -> Option<UserRecord> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces the record wholesale.
    pub fn replace(&self, record: UserRecord) {
        match self.inner.write() {
            Ok(mut guard) => *guard = Some(record),
            Err(poisoned) => *poisoned.into_inner() = Some(record),
        }
    }

    /// Merges `patch` into the current record, seeding from `fallback` when
    /// no record exists yet. Returns the resulting record.
    pub fn merge(&self, patch: &UserPatch, fallback: UserRecord) -> UserRecord {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut record = guard.take().unwrap_or(fallback);
        patch.apply_to(&mut record);
        *guard = Some(record.clone());
        record
    }
}
