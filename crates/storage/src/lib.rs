#![forbid(unsafe_code)]

//! On-device durable storage: the snapshot cache and the pending-patch
//! ledger, each an independent keyed slot read and written as one atomic
//! unit.

pub mod repository;
pub mod sqlite;

pub use repository::{
    InMemoryStorage, LedgerStore, PendingPatch, SnapshotStore, Storage, StorageError,
};
pub use sqlite::{SqliteInitError, SqliteStorage};
