//! Sync coordinator: optimistic local commit, remote commit, and the
//! pending-patch ledger that bridges the two when the remote is unavailable.
//!
//! Every mutation follows the same path: merge into the in-memory record and
//! snapshot immediately (the optimistic commit, visible before any network
//! I/O), then try the remote. A failed remote commit enqueues the patch in
//! the durable ledger; a later flush drains it in per-target FIFO order.
//! Public operations never fail outright, they return the current record
//! plus an optional [`SyncIssue`] describing what was deferred or dropped.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use progress_core::metrics::refresh_derived;
use progress_core::model::{UserId, UserRecord};
use progress_core::patch::UserPatch;
use progress_core::time::Clock;
use storage::{PendingPatch, Storage, StorageError};

use crate::error::{ConflictError, RemoteError, SyncIssue};
use crate::remote::RemoteStore;
use crate::store::RecordStore;

/// Rejected attempts a ledger entry survives before it is dropped as a
/// conflict. Transient failures never count against this.
pub const DEFAULT_RETRY_CAP: u32 = 5;

/// Result of a best-effort sync operation: the record as the caller should
/// now see it, plus what (if anything) went sideways along the way.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub record: UserRecord,
    pub issue: Option<SyncIssue>,
    /// Ledger entries dropped at the retry cap by a flush this call
    /// triggered. Each discarded update is reported exactly once, either
    /// here or in the report of the [`SyncCoordinator::flush_ledger`] call
    /// that dropped it.
    pub conflicts: Vec<ConflictError>,
}

/// Summary of one ledger flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Entries committed remotely and removed from the ledger.
    pub flushed: usize,
    /// Entries still queued after the flush.
    pub remaining: usize,
    /// Entries dropped this flush after exhausting their retry budget.
    /// Each discarded update surfaces here exactly once.
    pub conflicts: Vec<ConflictError>,
}

/// Coordinates the in-memory record, the durable slots, and the remote
/// store.
pub struct SyncCoordinator {
    remote: Arc<dyn RemoteStore>,
    storage: Storage,
    store: RecordStore,
    clock: Clock,
    retry_cap: u32,
    // serializes read-merge-write of the in-memory record and snapshot
    apply_lock: Mutex<()>,
    // serializes ledger drains so entries are never replayed concurrently
    flush_lock: Mutex<()>,
}

impl SyncCoordinator {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, storage: Storage) -> Self {
        Self {
            remote,
            storage,
            store: RecordStore::new(),
            clock: Clock::default(),
            retry_cap: DEFAULT_RETRY_CAP,
            apply_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_retry_cap(mut self, cap: u32) -> Self {
        self.retry_cap = cap;
        self
    }

    /// Read handle to the in-memory record.
    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Current record, `None` before bootstrap.
    #[must_use]
    pub fn current(&self) -> Option<UserRecord> {
        self.store.get()
    }

    //
    // ─── BOOTSTRAP ─────────────────────────────────────────────────────────────
    //

    /// Loads the record at startup: remote first, then the durable snapshot,
    /// then the fixed initial shape.
    ///
    /// When the remote lists no records the initial record is created there
    /// so later updates have a target id; when the remote is unreachable the
    /// record stays local (id unset) and mutations remain local-only until a
    /// later bootstrap succeeds.
    pub async fn load_or_create(&self) -> SyncOutcome {
        let now = self.clock.now();
        match self.remote.list().await {
            Ok(records) => {
                if let Some(record) = records.into_iter().next() {
                    debug!("adopting existing remote record");
                    let record = self.install(record).await;
                    let report = self.flush_ledger().await;
                    if report.flushed > 0 || !report.conflicts.is_empty() {
                        debug!(
                            flushed = report.flushed,
                            conflicts = report.conflicts.len(),
                            "drained ledger during bootstrap"
                        );
                    }
                    // flushing may have advanced the record
                    let record = self.store.get().unwrap_or(record);
                    return SyncOutcome {
                        record,
                        issue: None,
                        conflicts: report.conflicts,
                    };
                }

                // an empty listing must not erase progress made while the
                // remote was unreachable: seed the create from what we
                // already hold locally
                let local = match self.store.get() {
                    Some(current) => current,
                    None => self
                        .load_cached()
                        .await
                        .unwrap_or_else(|| UserRecord::initial(now)),
                };
                match self.remote.create(&local).await {
                    Ok(created) => {
                        debug!("created remote record");
                        let record = self.install(created).await;
                        SyncOutcome {
                            record,
                            issue: None,
                            conflicts: Vec::new(),
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "remote create failed, staying local-only");
                        let record = self.install(local).await;
                        SyncOutcome {
                            record,
                            issue: Some(SyncIssue::from_remote(&err)),
                            conflicts: Vec::new(),
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "remote list failed, falling back to snapshot");
                let cached = self.load_cached().await;
                let record = self
                    .install(cached.unwrap_or_else(|| UserRecord::initial(now)))
                    .await;
                SyncOutcome {
                    record,
                    issue: Some(SyncIssue::from_remote(&err)),
                    conflicts: Vec::new(),
                }
            }
        }
    }

    //
    // ─── APPLY ─────────────────────────────────────────────────────────────────
    //

    /// Applies a patch: optimistic local commit first, then the remote.
    ///
    /// The merged record is visible to readers and snapshotted before any
    /// network I/O. On remote success the server's echoed view is merged
    /// back (remote wins on fields it returns) and any queued entries are
    /// flushed. On remote failure the patch joins the ledger and the
    /// optimistic state stands.
    pub async fn apply_patch(&self, patch: UserPatch) -> SyncOutcome {
        let now = self.clock.now();
        let (record, mut issue) = {
            let _guard = self.apply_lock.lock().await;
            let mut record = self
                .store
                .get()
                .unwrap_or_else(|| UserRecord::initial(now));
            patch.apply_to(&mut record);
            refresh_derived(&mut record, now);
            self.store.replace(record.clone());
            let issue = self.save_snapshot(&record).await;
            (record, issue)
        };

        // a record the remote has never seen has no target to patch
        let Some(target_id) = record.id.clone() else {
            return SyncOutcome {
                record,
                issue,
                conflicts: Vec::new(),
            };
        };

        match self.remote.update(&target_id, &patch).await {
            Ok(view) => {
                let record = self.adopt_view(&view, record).await;
                let report = self.flush_ledger().await;
                if report.flushed > 0 || !report.conflicts.is_empty() {
                    debug!(
                        flushed = report.flushed,
                        conflicts = report.conflicts.len(),
                        "drained ledger after commit"
                    );
                }
                let record = self.store.get().unwrap_or(record);
                SyncOutcome {
                    record,
                    issue,
                    conflicts: report.conflicts,
                }
            }
            Err(err) => {
                issue = Some(self.enqueue(target_id, patch, &err, now).await);
                SyncOutcome {
                    record,
                    issue,
                    conflicts: Vec::new(),
                }
            }
        }
    }

    //
    // ─── FLUSH ─────────────────────────────────────────────────────────────────
    //

    /// Drains the ledger in per-target FIFO order.
    ///
    /// A transient failure parks its target for the rest of the flush so
    /// later entries for it keep their order. A rejection consumes one
    /// attempt; an entry past the cap is dropped and reported as a conflict.
    /// The ledger is re-persisted after every transition, so an interrupted
    /// flush never replays a committed entry. Flushing an empty ledger is a
    /// no-op.
    pub async fn flush_ledger(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;

        let mut entries = match self.storage.ledger.load().await {
            Ok(entries) => entries,
            Err(StorageError::Serialization(detail)) => {
                // a corrupt ledger is treated as empty
                warn!(%detail, "ledger is unreadable, discarding");
                self.persist_ledger(&[]).await;
                Vec::new()
            }
            Err(other) => {
                warn!(error = %other, "ledger load failed, skipping flush");
                return FlushReport::default();
            }
        };

        let mut report = FlushReport::default();
        let mut parked: BTreeSet<UserId> = BTreeSet::new();
        let mut idx = 0;
        while idx < entries.len() {
            if parked.contains(&entries[idx].target_id) {
                idx += 1;
                continue;
            }

            let target_id = entries[idx].target_id.clone();
            match self.remote.update(&target_id, &entries[idx].patch).await {
                Ok(view) => {
                    entries.remove(idx);
                    self.persist_ledger(&entries).await;
                    report.flushed += 1;
                    let fallback = self
                        .store
                        .get()
                        .unwrap_or_else(|| UserRecord::initial(self.clock.now()));
                    self.adopt_view(&view, fallback).await;
                }
                Err(RemoteError::Transient(detail)) => {
                    debug!(target = %target_id, %detail, "flush deferred, target parked");
                    parked.insert(target_id);
                    idx += 1;
                }
                Err(RemoteError::Rejected { status }) => {
                    entries[idx].attempts += 1;
                    if entries[idx].attempts >= self.retry_cap {
                        let dropped = entries.remove(idx);
                        warn!(
                            target = %dropped.target_id,
                            attempts = dropped.attempts,
                            "dropping pending update after repeated rejection"
                        );
                        report.conflicts.push(ConflictError {
                            target_id: dropped.target_id,
                            attempts: dropped.attempts,
                        });
                        self.persist_ledger(&entries).await;
                        // the next entry for this target may now proceed
                    } else {
                        debug!(target = %target_id, status, "flush rejected, will retry");
                        self.persist_ledger(&entries).await;
                        parked.insert(target_id);
                        idx += 1;
                    }
                }
            }
        }

        report.remaining = entries.len();
        report
    }

    //
    // ─── INTERNALS ─────────────────────────────────────────────────────────────
    //

    /// Snapshot contents, with unreadable payloads treated as absent.
    async fn load_cached(&self) -> Option<UserRecord> {
        match self.storage.snapshots.load().await {
            Ok(cached) => cached,
            Err(StorageError::Serialization(detail)) => {
                warn!(%detail, "snapshot is unreadable, discarding");
                None
            }
            Err(other) => {
                warn!(error = %other, "snapshot load failed");
                None
            }
        }
    }

    /// Installs a record as the current one: refresh derived fields, publish
    /// to readers, snapshot.
    async fn install(&self, mut record: UserRecord) -> UserRecord {
        let now = self.clock.now();
        let _guard = self.apply_lock.lock().await;
        refresh_derived(&mut record, now);
        self.store.replace(record.clone());
        self.save_snapshot(&record).await;
        record
    }

    /// Merges a remote view into the current record and re-publishes it.
    async fn adopt_view(&self, view: &UserPatch, fallback: UserRecord) -> UserRecord {
        let now = self.clock.now();
        let _guard = self.apply_lock.lock().await;
        let mut record = self.store.merge(view, fallback);
        refresh_derived(&mut record, now);
        self.store.replace(record.clone());
        self.save_snapshot(&record).await;
        record
    }

    /// Queues a failed patch, or surfaces a conflict when the very first
    /// rejection already exhausts the budget.
    async fn enqueue(
        &self,
        target_id: UserId,
        patch: UserPatch,
        err: &RemoteError,
        now: DateTime<Utc>,
    ) -> SyncIssue {
        let attempts = match err {
            RemoteError::Transient(_) => 0,
            RemoteError::Rejected { .. } => 1,
        };
        if attempts >= self.retry_cap {
            warn!(target = %target_id, "update rejected with no retry budget, dropping");
            return SyncIssue::Conflict(ConflictError {
                target_id,
                attempts,
            });
        }

        let issue = SyncIssue::from_remote(err);
        debug!(target = %target_id, error = %err, "queuing update in the ledger");

        let mut entries = match self.storage.ledger.load().await {
            Ok(entries) => entries,
            Err(StorageError::Serialization(detail)) => {
                // a corrupt ledger is treated as empty
                warn!(%detail, "ledger is unreadable, starting fresh");
                Vec::new()
            }
            Err(other) => {
                // rewriting the slot blind would erase queued patches
                warn!(error = %other, "ledger load failed, not queuing");
                return issue;
            }
        };
        entries.push(PendingPatch {
            target_id,
            patch,
            enqueued_at: now,
            attempts,
        });
        self.persist_ledger(&entries).await;
        issue
    }

    async fn persist_ledger(&self, entries: &[PendingPatch]) {
        if let Err(err) = self.storage.ledger.replace(entries).await {
            warn!(error = %err, "ledger write failed");
        }
    }

    async fn save_snapshot(&self, record: &UserRecord) -> Option<SyncIssue> {
        match self.storage.snapshots.save(record).await {
            Ok(()) => None,
            Err(err) => {
                warn!(error = %err, "snapshot save failed");
                Some(SyncIssue::SnapshotUnavailable {
                    detail: err.to_string(),
                })
            }
        }
    }
}
