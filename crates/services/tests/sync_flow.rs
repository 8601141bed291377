mod common;

use progress_core::model::{UserId, UserRecord};
use progress_core::patch::{ProfilePatch, UserPatch};
use progress_core::time::fixed_now;
use services::error::{ConflictError, RemoteError, SyncIssue};
use services::sync::FlushReport;
use storage::Storage;

use common::{
    coordinator, corrupt_storage, remote_user, storage_with_flaky_ledger, MockRemote,
};

fn xp_patch(total_xp: u64) -> UserPatch {
    UserPatch::new().with_profile(ProfilePatch {
        total_xp: Some(total_xp),
        ..ProfilePatch::default()
    })
}

fn transient() -> RemoteError {
    RemoteError::Transient("connection refused".to_string())
}

// ─── bootstrap ───

#[tokio::test]
async fn bootstrap_adopts_remote_record() {
    let remote = MockRemote::with_user(remote_user(500));
    let storage = Storage::in_memory();
    let sync = coordinator(remote, storage.clone());

    let outcome = sync.load_or_create().await;
    assert!(outcome.issue.is_none());
    assert_eq!(outcome.record.id, Some(UserId::new("1")));
    assert_eq!(outcome.record.profile.total_xp, 500);

    // the adopted record is snapshotted for the next cold start
    let cached = storage.snapshots.load().await.unwrap().unwrap();
    assert_eq!(cached, outcome.record);
}

#[tokio::test]
async fn bootstrap_creates_remotely_when_listing_is_empty() {
    let remote = MockRemote::new();
    let sync = coordinator(remote.clone(), Storage::in_memory());

    let outcome = sync.load_or_create().await;
    assert!(outcome.issue.is_none());
    assert_eq!(outcome.record.id, Some(UserId::new("1")));
    assert_eq!(outcome.record.profile.total_xp, 0);
    assert_eq!(remote.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn bootstrap_falls_back_to_snapshot_when_remote_is_down() {
    let storage = Storage::in_memory();
    storage.snapshots.save(&remote_user(300)).await.unwrap();

    let remote = MockRemote::unreachable(transient());
    let sync = coordinator(remote, storage);

    let outcome = sync.load_or_create().await;
    assert_eq!(outcome.record.profile.total_xp, 300);
    assert!(matches!(
        outcome.issue,
        Some(SyncIssue::TransientNetwork { .. })
    ));
}

#[tokio::test]
async fn bootstrap_starts_fresh_when_nothing_is_reachable() {
    let remote = MockRemote::unreachable(transient());
    let sync = coordinator(remote, Storage::in_memory());

    let outcome = sync.load_or_create().await;
    assert!(outcome.record.id.is_none());
    assert_eq!(outcome.record, {
        let mut initial = UserRecord::initial(fixed_now());
        progress_core::metrics::refresh_derived(&mut initial, fixed_now());
        initial
    });
}

#[tokio::test]
async fn bootstrap_create_preserves_offline_progress() {
    // progress accumulated while the remote was unreachable, id still unset
    let storage = Storage::in_memory();
    let mut offline = UserRecord::initial(fixed_now());
    offline.profile.total_xp = 300;
    storage.snapshots.save(&offline).await.unwrap();

    // the remote comes back with an empty listing: the offline record is
    // what gets created there, not a fresh zeroed one
    let remote = MockRemote::new();
    let sync = coordinator(remote.clone(), storage);
    let outcome = sync.load_or_create().await;

    assert_eq!(outcome.record.profile.total_xp, 300);
    assert_eq!(outcome.record.id, Some(UserId::new("1")));
    assert_eq!(remote.created.lock().unwrap()[0].profile.total_xp, 300);
}

#[tokio::test]
async fn corrupt_snapshot_is_treated_as_absent_at_bootstrap() {
    let (slots, storage) = corrupt_storage();
    let remote = MockRemote::unreachable(transient());
    let sync = coordinator(remote, storage);

    let outcome = sync.load_or_create().await;
    assert!(outcome.record.id.is_none());
    assert_eq!(outcome.record.profile.total_xp, 0);
    assert!(matches!(
        outcome.issue,
        Some(SyncIssue::TransientNetwork { .. })
    ));

    // the fresh record is written back over the bad payload
    assert_eq!(slots.snapshot_saves.lock().unwrap().len(), 1);
}

// ─── optimistic apply ───

#[tokio::test]
async fn optimistic_state_is_visible_despite_remote_failure() {
    let remote = MockRemote::with_user(remote_user(0));
    let storage = Storage::in_memory();
    let sync = coordinator(remote.clone(), storage.clone());
    sync.load_or_create().await;

    remote.fail_next_updates(1, transient());
    let outcome = sync.apply_patch(xp_patch(25)).await;

    // the merged state is what the caller and all readers see
    assert_eq!(outcome.record.profile.total_xp, 25);
    assert!(matches!(
        outcome.issue,
        Some(SyncIssue::TransientNetwork { .. })
    ));
    assert_eq!(sync.current().unwrap().profile.total_xp, 25);

    // and it is already durable
    let cached = storage.snapshots.load().await.unwrap().unwrap();
    assert_eq!(cached.profile.total_xp, 25);

    // the failed commit is queued, not lost
    let ledger = storage.ledger.load().await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].target_id, UserId::new("1"));
    assert_eq!(ledger[0].attempts, 0);
}

#[tokio::test]
async fn successful_commit_leaves_the_ledger_empty() {
    let remote = MockRemote::with_user(remote_user(0));
    let storage = Storage::in_memory();
    let sync = coordinator(remote.clone(), storage.clone());
    sync.load_or_create().await;

    let outcome = sync.apply_patch(xp_patch(25)).await;
    assert!(outcome.issue.is_none());
    assert_eq!(outcome.record.profile.total_xp, 25);
    assert!(storage.ledger.load().await.unwrap().is_empty());
    assert_eq!(remote.applied().len(), 1);
}

#[tokio::test]
async fn remote_view_wins_on_fields_it_returns() {
    let remote = MockRemote::with_user(remote_user(0));
    let sync = coordinator(remote.clone(), Storage::in_memory());
    sync.load_or_create().await;

    // the server stored a different value than we sent
    *remote.update_view.lock().unwrap() = Some(xp_patch(999));
    let outcome = sync.apply_patch(xp_patch(25)).await;
    assert_eq!(outcome.record.profile.total_xp, 999);
    assert_eq!(sync.current().unwrap().profile.total_xp, 999);
}

#[tokio::test]
async fn local_only_record_stays_off_the_ledger() {
    let remote = MockRemote::unreachable(transient());
    let storage = Storage::in_memory();
    let sync = coordinator(remote.clone(), storage.clone());
    sync.load_or_create().await;
    assert!(sync.current().unwrap().id.is_none());

    let outcome = sync.apply_patch(xp_patch(25)).await;
    // no target id: nothing to patch remotely, nothing to queue
    assert_eq!(outcome.record.profile.total_xp, 25);
    assert!(outcome.issue.is_none());
    assert_eq!(remote.update_calls(), 0);
    assert!(storage.ledger.load().await.unwrap().is_empty());
}

// ─── flush ───

#[tokio::test]
async fn flush_converges_after_repeated_failures() {
    let remote = MockRemote::with_user(remote_user(0));
    let storage = Storage::in_memory();
    let sync = coordinator(remote.clone(), storage.clone());
    sync.load_or_create().await;

    remote.fail_next_updates(2, transient());
    sync.apply_patch(xp_patch(25)).await;
    sync.apply_patch(xp_patch(50)).await;
    assert_eq!(storage.ledger.load().await.unwrap().len(), 2);

    let report = sync.flush_ledger().await;
    assert_eq!(report.flushed, 2);
    assert_eq!(report.remaining, 0);
    assert!(report.conflicts.is_empty());
    assert!(storage.ledger.load().await.unwrap().is_empty());

    // commits reached the remote in enqueue order
    let applied = remote.applied();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0].1.profile.as_ref().unwrap().total_xp, Some(25));
    assert_eq!(applied[1].1.profile.as_ref().unwrap().total_xp, Some(50));
    assert_eq!(sync.current().unwrap().profile.total_xp, 50);
}

#[tokio::test]
async fn flush_is_idempotent() {
    let remote = MockRemote::with_user(remote_user(0));
    let sync = coordinator(remote.clone(), Storage::in_memory());
    sync.load_or_create().await;

    remote.fail_next_updates(1, transient());
    sync.apply_patch(xp_patch(25)).await;
    assert_eq!(sync.flush_ledger().await.flushed, 1);

    let calls_after_first = remote.update_calls();
    let report = sync.flush_ledger().await;
    assert_eq!(report.flushed, 0);
    assert_eq!(report.remaining, 0);
    assert!(report.conflicts.is_empty());
    assert_eq!(remote.update_calls(), calls_after_first);
}

#[tokio::test]
async fn transient_flush_failure_parks_the_target_in_order() {
    let remote = MockRemote::with_user(remote_user(0));
    let storage = Storage::in_memory();
    let sync = coordinator(remote.clone(), storage.clone());
    sync.load_or_create().await;

    remote.fail_next_updates(2, transient());
    sync.apply_patch(xp_patch(25)).await;
    sync.apply_patch(xp_patch(50)).await;

    // first flush attempt also fails transiently
    remote.fail_next_updates(1, transient());
    let calls_before = remote.update_calls();
    let report = sync.flush_ledger().await;

    // only the head entry was tried; the second stayed behind it
    assert_eq!(remote.update_calls(), calls_before + 1);
    assert_eq!(report.flushed, 0);
    assert_eq!(report.remaining, 2);

    // transient failures never consume the retry budget
    let ledger = storage.ledger.load().await.unwrap();
    assert!(ledger.iter().all(|entry| entry.attempts == 0));
}

#[tokio::test]
async fn rejections_consume_attempts_until_the_cap_drops_the_entry() {
    let remote = MockRemote::with_user(remote_user(0));
    let storage = Storage::in_memory();
    let sync = coordinator(remote.clone(), storage.clone()).with_retry_cap(2);
    sync.load_or_create().await;

    remote.fail_next_updates(1, RemoteError::Rejected { status: 400 });
    let outcome = sync.apply_patch(xp_patch(25)).await;
    assert!(matches!(
        outcome.issue,
        Some(SyncIssue::RemoteRejection { status: 400 })
    ));
    assert_eq!(storage.ledger.load().await.unwrap()[0].attempts, 1);

    // second rejection reaches the cap: the entry is dropped as a conflict
    remote.fail_next_updates(1, RemoteError::Rejected { status: 400 });
    let report = sync.flush_ledger().await;
    assert_eq!(
        report.conflicts,
        vec![ConflictError {
            target_id: UserId::new("1"),
            attempts: 2,
        }]
    );
    assert_eq!(report.remaining, 0);
    assert!(storage.ledger.load().await.unwrap().is_empty());

    // the discarded update surfaces exactly once
    let report = sync.flush_ledger().await;
    assert!(report.conflicts.is_empty());

    // the optimistic local state was never rolled back
    assert_eq!(sync.current().unwrap().profile.total_xp, 25);
}

#[tokio::test]
async fn dropped_entry_unblocks_later_entries_for_the_same_target() {
    let remote = MockRemote::with_user(remote_user(0));
    let storage = Storage::in_memory();
    let sync = coordinator(remote.clone(), storage.clone()).with_retry_cap(1);
    sync.load_or_create().await;

    remote.fail_next_updates(2, transient());
    sync.apply_patch(xp_patch(25)).await;
    sync.apply_patch(xp_patch(50)).await;

    // head entry is rejected and, with a cap of one, dropped immediately;
    // the next entry for the same target commits in the same flush
    remote.fail_next_updates(1, RemoteError::Rejected { status: 422 });
    let report = sync.flush_ledger().await;
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.flushed, 1);
    assert_eq!(report.remaining, 0);

    let applied = remote.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].1.profile.as_ref().unwrap().total_xp, Some(50));
}

#[tokio::test]
async fn conflict_dropped_by_opportunistic_flush_is_reported() {
    let remote = MockRemote::with_user(remote_user(0));
    let storage = Storage::in_memory();
    let sync = coordinator(remote.clone(), storage.clone()).with_retry_cap(2);
    sync.load_or_create().await;

    // first update is rejected and queued with one attempt consumed
    remote.fail_next_updates(1, RemoteError::Rejected { status: 400 });
    sync.apply_patch(xp_patch(25)).await;

    // second update commits; its follow-up flush rejects the queued entry
    // once more, reaching the cap and dropping it
    remote.script_updates([Ok(()), Err(RemoteError::Rejected { status: 400 })]);
    let outcome = sync.apply_patch(xp_patch(50)).await;
    assert!(outcome.issue.is_none());
    assert_eq!(
        outcome.conflicts,
        vec![ConflictError {
            target_id: UserId::new("1"),
            attempts: 2,
        }]
    );
    assert!(storage.ledger.load().await.unwrap().is_empty());

    // the drop surfaced through that outcome and nowhere else
    let report = sync.flush_ledger().await;
    assert!(report.conflicts.is_empty());
}

#[tokio::test]
async fn ledger_read_failure_does_not_clobber_queued_patches() {
    let (ledger, storage) = storage_with_flaky_ledger();
    let remote = MockRemote::with_user(remote_user(0));
    let sync = coordinator(remote.clone(), storage.clone());
    sync.load_or_create().await;

    // one patch queued while the ledger is healthy
    remote.fail_next_updates(1, transient());
    sync.apply_patch(xp_patch(25)).await;
    assert_eq!(storage.ledger.load().await.unwrap().len(), 1);

    // a momentary read failure while queuing the next one
    ledger.set_fail_loads(true);
    remote.fail_next_updates(1, transient());
    let outcome = sync.apply_patch(xp_patch(50)).await;
    assert!(matches!(
        outcome.issue,
        Some(SyncIssue::TransientNetwork { .. })
    ));

    // the previously queued patch survived untouched
    ledger.set_fail_loads(false);
    let entries = storage.ledger.load().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].patch.profile.as_ref().unwrap().total_xp, Some(25));
}

#[tokio::test]
async fn corrupt_ledger_is_discarded_and_flush_proceeds() {
    let (slots, storage) = corrupt_storage();
    let remote = MockRemote::with_user(remote_user(0));
    let sync = coordinator(remote, storage);
    let outcome = sync.load_or_create().await;
    assert_eq!(outcome.record.profile.total_xp, 0);

    let report = sync.flush_ledger().await;
    assert_eq!(report, FlushReport::default());

    // the unreadable slot was reset to an empty ledger
    assert!(
        slots
            .ledger_writes
            .lock()
            .unwrap()
            .iter()
            .any(|write| write.is_empty())
    );
}

#[tokio::test]
async fn successful_apply_drains_previously_queued_entries() {
    let remote = MockRemote::with_user(remote_user(0));
    let storage = Storage::in_memory();
    let sync = coordinator(remote.clone(), storage.clone());
    sync.load_or_create().await;

    remote.fail_next_updates(1, transient());
    sync.apply_patch(xp_patch(25)).await;
    assert_eq!(storage.ledger.load().await.unwrap().len(), 1);

    // the next successful commit flushes the backlog as well
    let outcome = sync.apply_patch(xp_patch(50)).await;
    assert!(outcome.issue.is_none());
    assert!(storage.ledger.load().await.unwrap().is_empty());
    assert_eq!(remote.applied().len(), 2);
}
