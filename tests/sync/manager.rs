//! Full-pass SyncManager tests against the in-memory stores.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use inkpad_sync::error::RemoteError;
use inkpad_sync::store::{LocalStore, MemoryLocalStore, MemoryRemoteStore, RemoteObject, RemoteStore};
use inkpad_sync::sync::envelope::{self, NoteEnvelope};
use inkpad_sync::sync::manager::FALLBACK_NOTEBOOK_TITLE;
use inkpad_sync::sync::{
    ChangeTracker, ConflictResolver, Connectivity, DuplicateBoth, FnResolver, PreferLocal,
    PreferRemote, Resolution, StaticNetworkGate, SyncLedger, SyncManager, SyncManagerOptions,
    SyncPolicy, SyncState,
};
use inkpad_sync::types::{now_ms, Note, Stroke, StrokePoint, TimestampMs};

// ============================================================================
// Fixture
// ============================================================================

struct Fixture {
    local: Arc<MemoryLocalStore>,
    remote: Arc<MemoryRemoteStore>,
    gate: Arc<StaticNetworkGate>,
    tracker: Arc<ChangeTracker>,
    manager: SyncManager,
}

fn fixture_with(resolver: Arc<dyn ConflictResolver>) -> Fixture {
    let local = Arc::new(MemoryLocalStore::new());
    let remote = Arc::new(MemoryRemoteStore::new());
    let gate = Arc::new(StaticNetworkGate::new(Connectivity::Unmetered));
    let tracker = Arc::new(ChangeTracker::new(local.clone()));
    let manager = SyncManager::new(SyncManagerOptions {
        local: local.clone(),
        remote: remote.clone(),
        gate: gate.clone(),
        tracker: tracker.clone(),
        resolver,
        policy: SyncPolicy::AnyConnection,
    });
    Fixture {
        local,
        remote,
        gate,
        tracker,
        manager,
    }
}

fn fixture() -> Fixture {
    fixture_with(Arc::new(PreferRemote))
}

fn note(id: &str, title: &str, updated_at: TimestampMs) -> Note {
    Note {
        id: id.to_string(),
        title: title.to_string(),
        created_at: 1,
        updated_at,
        width: 820.0,
        height: 1160.0,
    }
}

fn stroke(x: f32) -> Stroke {
    Stroke {
        color: 0xFF00_00FF,
        width: 2.0,
        points: vec![StrokePoint {
            x,
            y: x + 1.0,
            pressure: 0.5,
        }],
    }
}

/// Put a note envelope into the remote store as another device would.
fn seed_remote_note(
    remote: &MemoryRemoteStore,
    note: Note,
    strokes: Vec<Stroke>,
    notebooks: Vec<String>,
    modified_at: TimestampMs,
) {
    let name = envelope::note_file_name(&note.id);
    let bytes = envelope::encode(&NoteEnvelope {
        note,
        strokes,
        notebooks,
    })
    .unwrap();
    remote.seed_file(&name, bytes, modified_at);
}

fn remote_envelope(remote: &MemoryRemoteStore, note_id: &str) -> NoteEnvelope {
    let name = envelope::note_file_name(note_id);
    let bytes = remote.file_bytes(&name).expect("note file missing");
    envelope::decode(&name, &bytes).unwrap()
}

// ============================================================================
// Download phase
// ============================================================================

#[tokio::test]
async fn downloads_new_remote_note_with_strokes_and_notebooks() {
    let f = fixture();
    seed_remote_note(
        &f.remote,
        note("n1", "Trip", 100),
        vec![stroke(1.0), stroke(2.0)],
        vec!["Travel".to_string()],
        100,
    );

    let outcome = f.manager.sync().await;
    let report = outcome.report().unwrap();
    assert_eq!(report.downloaded, 1);
    assert!(report.errors.is_empty());
    assert_eq!(f.manager.state(), SyncState::Success);

    let saved = f.local.note("n1").unwrap().unwrap();
    assert_eq!(saved.title, "Trip");
    assert_eq!(f.local.strokes("n1").unwrap().len(), 2);
    assert_eq!(f.local.notebook_titles("n1").unwrap(), vec!["Travel"]);
}

#[tokio::test]
async fn fallback_notebook_adopts_downloads_with_no_associations() {
    let f = fixture();
    seed_remote_note(&f.remote, note("n1", "A", 100), vec![], vec![], 100);
    seed_remote_note(&f.remote, note("n2", "B", 100), vec![], vec![], 100);

    f.manager.sync().await;

    assert_eq!(
        f.local.notebook_titles("n1").unwrap(),
        vec![FALLBACK_NOTEBOOK_TITLE]
    );
    assert_eq!(
        f.local.notebook_titles("n2").unwrap(),
        vec![FALLBACK_NOTEBOOK_TITLE]
    );
    assert_eq!(f.local.notebook_count(), 1);
}

#[tokio::test]
async fn no_fallback_when_some_envelope_names_a_notebook() {
    let f = fixture();
    seed_remote_note(
        &f.remote,
        note("n1", "A", 100),
        vec![],
        vec!["Work".to_string()],
        100,
    );

    f.manager.sync().await;
    assert_eq!(f.local.notebook_titles("n1").unwrap(), vec!["Work"]);
    assert_eq!(f.local.notebook_count(), 1);
}

#[tokio::test]
async fn foreign_objects_are_never_fetched() {
    let f = fixture();
    // A poisoned download would fail the item; a clean pass with zero
    // errors proves the object was never fetched.
    f.remote.seed_file("vacation.jpg", b"\xFF\xD8".to_vec(), 100);
    f.remote.poison("vacation.jpg");

    let outcome = f.manager.sync().await;
    let report = outcome.report().unwrap();
    assert_eq!(report.downloaded, 0);
    assert!(report.errors.is_empty());
    assert_eq!(f.manager.state(), SyncState::Success);
}

#[tokio::test]
async fn one_bad_file_skips_that_file_and_pass_still_succeeds() {
    let f = fixture();
    seed_remote_note(&f.remote, note("n1", "A", 100), vec![], vec![], 100);
    seed_remote_note(&f.remote, note("n2", "B", 100), vec![], vec![], 100);
    seed_remote_note(&f.remote, note("n3", "C", 100), vec![], vec![], 100);
    f.remote.poison("n2.note.json");

    let outcome = f.manager.sync().await;
    let report = outcome.report().unwrap();
    assert_eq!(report.downloaded, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].note_id.as_deref(), Some("n2"));
    assert_eq!(f.manager.state(), SyncState::Success);
}

#[tokio::test]
async fn malformed_envelope_is_a_per_item_error() {
    let f = fixture();
    seed_remote_note(&f.remote, note("n1", "A", 100), vec![], vec![], 100);
    f.remote.seed_file("n9.note.json", b"{ nope".to_vec(), 100);

    let outcome = f.manager.sync().await;
    let report = outcome.report().unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(f.manager.state(), SyncState::Success);
}

#[tokio::test]
async fn bootstrap_retries_from_epoch_when_local_is_empty() {
    let f = fixture();
    // Stale cursor ahead of every remote object, zero local notes.
    f.local.set_last_sync_time(now_ms()).unwrap();
    seed_remote_note(&f.remote, note("n1", "Old", 100), vec![], vec![], 100);

    let outcome = f.manager.sync().await;
    assert_eq!(outcome.report().unwrap().downloaded, 1);
    assert!(f.local.note("n1").unwrap().is_some());
}

#[tokio::test]
async fn no_epoch_retry_when_local_has_notes() {
    let f = fixture();
    f.local.insert_note(note("existing", "X", 50), vec![]);
    f.local.set_last_sync_time(now_ms()).unwrap();
    seed_remote_note(&f.remote, note("n1", "Old", 100), vec![], vec![], 100);

    let outcome = f.manager.sync().await;
    assert_eq!(outcome.report().unwrap().downloaded, 0);
    assert!(f.local.note("n1").unwrap().is_none());
}

// ============================================================================
// Conflicts
// ============================================================================

/// Both sides changed after the cutover: local at T+10, remote at T+20.
fn conflict_setup(f: &Fixture) -> TimestampMs {
    let t = now_ms() - 10_000;
    f.local.set_last_sync_time(t).unwrap();
    f.local
        .insert_note(note("n1", "Local edit", t + 10), vec![stroke(1.0)]);
    f.tracker.register_changed("n1");
    seed_remote_note(
        f.remote.as_ref(),
        note("n1", "Remote edit", t + 20),
        vec![stroke(9.0), stroke(10.0)],
        vec![],
        t + 20,
    );
    t
}

#[tokio::test]
async fn concurrent_edit_invokes_the_resolver() {
    let invoked = Arc::new(AtomicBool::new(false));
    let invoked2 = invoked.clone();
    let f = fixture_with(Arc::new(FnResolver(move |_: &Note, _: &Note| {
        invoked2.store(true, Ordering::SeqCst);
        Resolution::UseRemote
    })));
    conflict_setup(&f);

    let outcome = f.manager.sync().await;
    assert!(invoked.load(Ordering::SeqCst));
    assert_eq!(outcome.report().unwrap().conflicts, 1);
}

#[tokio::test]
async fn resolver_not_invoked_for_one_sided_remote_change() {
    let invoked = Arc::new(AtomicBool::new(false));
    let invoked2 = invoked.clone();
    let f = fixture_with(Arc::new(FnResolver(move |_: &Note, _: &Note| {
        invoked2.store(true, Ordering::SeqCst);
        Resolution::UseLocal
    })));

    let t = now_ms() - 10_000;
    f.local.set_last_sync_time(t).unwrap();
    // Local copy untouched since the cutover, remote edited after it.
    f.local.insert_note(note("n1", "Stale", t - 50), vec![]);
    seed_remote_note(
        f.remote.as_ref(),
        note("n1", "Remote edit", t + 20),
        vec![],
        vec![],
        t + 20,
    );

    let outcome = f.manager.sync().await;
    assert!(!invoked.load(Ordering::SeqCst));
    assert_eq!(outcome.report().unwrap().conflicts, 0);
    assert_eq!(f.local.note("n1").unwrap().unwrap().title, "Remote edit");
}

#[tokio::test]
async fn use_remote_overwrites_local_content() {
    let f = fixture_with(Arc::new(PreferRemote));
    conflict_setup(&f);

    f.manager.sync().await;
    let saved = f.local.note("n1").unwrap().unwrap();
    assert_eq!(saved.title, "Remote edit");
    assert_eq!(f.local.strokes("n1").unwrap().len(), 2);
}

#[tokio::test]
async fn use_local_keeps_content_and_reuploads() {
    let f = fixture_with(Arc::new(PreferLocal));
    conflict_setup(&f);

    let outcome = f.manager.sync().await;
    let saved = f.local.note("n1").unwrap().unwrap();
    assert_eq!(saved.title, "Local edit");
    assert_eq!(f.local.strokes("n1").unwrap().len(), 1);

    // The local edit went up in the same pass and overwrote the remote.
    assert_eq!(outcome.report().unwrap().uploaded, 1);
    assert_eq!(remote_envelope(&f.remote, "n1").note.title, "Local edit");
}

#[tokio::test]
async fn keep_both_duplicates_remote_and_leaves_local_untouched() {
    let f = fixture_with(Arc::new(DuplicateBoth));
    conflict_setup(&f);

    f.manager.sync().await;

    assert_eq!(f.local.note_count(), 2);
    let original = f.local.note("n1").unwrap().unwrap();
    assert_eq!(original.title, "Local edit");
    assert_eq!(f.local.strokes("n1").unwrap().len(), 1);

    let duplicate = f
        .local
        .all_notes()
        .unwrap()
        .into_iter()
        .find(|n| n.id != "n1")
        .expect("duplicate note missing");
    assert_eq!(duplicate.title, "Remote edit (Copy)");
    assert_eq!(f.local.strokes(&duplicate.id).unwrap().len(), 2);

    // Both the original and the duplicate were uploaded.
    assert!(f
        .remote
        .file_bytes(&envelope::note_file_name(&duplicate.id))
        .is_some());
    assert_eq!(remote_envelope(&f.remote, "n1").note.title, "Local edit");
}

// ============================================================================
// Upload phase
// ============================================================================

#[tokio::test]
async fn dirty_note_uploads_with_strokes_and_notebook_titles() {
    let f = fixture();
    let n = note("n1", "Groceries", now_ms());
    f.local.insert_note(n.clone(), vec![stroke(1.0)]);
    let nb = f.local.get_or_create_notebook("Home").unwrap();
    f.local.associate("n1", &nb.id).unwrap();
    f.tracker.register_changed("n1");

    let outcome = f.manager.sync().await;
    assert_eq!(outcome.report().unwrap().uploaded, 1);

    let uploaded = remote_envelope(&f.remote, "n1");
    assert_eq!(uploaded.note, n);
    assert_eq!(uploaded.strokes.len(), 1);
    assert_eq!(uploaded.notebooks, vec!["Home"]);
    assert!(f.tracker.is_empty());
}

#[tokio::test]
async fn upload_updates_existing_remote_file_in_place() {
    let f = fixture();
    f.local.insert_note(note("n1", "v1", now_ms()), vec![]);
    f.tracker.register_changed("n1");
    f.manager.sync().await;
    let files_after_first = f.remote.file_count();

    f.local.insert_note(note("n1", "v2", now_ms()), vec![]);
    f.tracker.register_changed("n1");
    f.manager.sync().await;

    assert_eq!(f.remote.file_count(), files_after_first);
    assert_eq!(remote_envelope(&f.remote, "n1").note.title, "v2");
}

#[tokio::test]
async fn ledger_records_uploaded_notes() {
    let f = fixture();
    let n = note("n1", "A", now_ms());
    f.local.insert_note(n.clone(), vec![]);
    f.tracker.register_changed("n1");

    f.manager.sync().await;

    let ledger = SyncLedger::load(f.remote.as_ref()).await;
    let entry = ledger.entry("n1").expect("ledger entry missing");
    assert_eq!(entry.last_modified, n.updated_at);
    assert!(entry.last_synced >= n.updated_at);
}

#[tokio::test]
async fn back_to_back_passes_are_idempotent() {
    let f = fixture();
    seed_remote_note(&f.remote, note("r1", "Remote", 100), vec![], vec![], 100);
    f.local.insert_note(note("n1", "Mine", now_ms()), vec![]);
    f.tracker.register_changed("n1");

    let first = f.manager.sync().await;
    let first = first.report().unwrap();
    assert_eq!(first.downloaded, 1);
    assert_eq!(first.uploaded, 1);

    let ledger_before = SyncLedger::load(f.remote.as_ref()).await;
    let files_before = f.remote.file_count();

    let second = f.manager.sync().await;
    let second = second.report().unwrap();
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.uploaded, 0);
    assert!(f.tracker.is_empty());
    assert_eq!(f.remote.file_count(), files_before);
    assert_eq!(SyncLedger::load(f.remote.as_ref()).await, ledger_before);
}

// ============================================================================
// Partial upload failure
// ============================================================================

/// Delegating remote that fails `create_file` for one object name.
struct FailingCreateRemote {
    inner: MemoryRemoteStore,
    fail_name: String,
}

#[async_trait]
impl RemoteStore for FailingCreateRemote {
    fn has_credentials(&self) -> bool {
        self.inner.has_credentials()
    }

    async fn list_changed_since(
        &self,
        since: TimestampMs,
    ) -> Result<Vec<RemoteObject>, RemoteError> {
        self.inner.list_changed_since(since).await
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, RemoteError> {
        self.inner.download(file_id).await
    }

    async fn create_file(&self, name: &str, bytes: Vec<u8>) -> Result<String, RemoteError> {
        if name == self.fail_name {
            return Err(RemoteError::Network("upload interrupted".to_string()));
        }
        self.inner.create_file(name, bytes).await
    }

    async fn update_file(&self, file_id: &str, bytes: Vec<u8>) -> Result<(), RemoteError> {
        self.inner.update_file(file_id, bytes).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<RemoteObject>, RemoteError> {
        self.inner.find_by_name(name).await
    }
}

#[tokio::test]
async fn failed_upload_stays_dirty_while_successes_clear() {
    let local = Arc::new(MemoryLocalStore::new());
    let remote = Arc::new(FailingCreateRemote {
        inner: MemoryRemoteStore::new(),
        fail_name: envelope::note_file_name("n2"),
    });
    let gate = Arc::new(StaticNetworkGate::new(Connectivity::Unmetered));
    let tracker = Arc::new(ChangeTracker::new(local.clone()));
    let manager = SyncManager::new(SyncManagerOptions {
        local: local.clone(),
        remote: remote.clone(),
        gate,
        tracker: tracker.clone(),
        resolver: Arc::new(PreferRemote),
        policy: SyncPolicy::AnyConnection,
    });

    local.insert_note(note("n1", "A", now_ms()), vec![]);
    local.insert_note(note("n2", "B", now_ms()), vec![]);
    tracker.register_changed("n1");
    tracker.register_changed("n2");

    let outcome = manager.sync().await;
    let report = outcome.report().unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(manager.state(), SyncState::Success);

    assert!(!tracker.is_dirty("n1"));
    assert!(tracker.is_dirty("n2"));
}

// ============================================================================
// Policy and pass-fatal errors
// ============================================================================

#[tokio::test]
async fn offline_gate_aborts_before_any_mutation() {
    let f = fixture();
    f.gate.set(Connectivity::Offline);
    f.local.insert_note(note("n1", "A", now_ms()), vec![]);
    f.tracker.register_changed("n1");

    let outcome = f.manager.sync().await;
    assert!(!outcome.is_skipped());
    assert!(matches!(f.manager.state(), SyncState::Error(_)));
    assert!(f.tracker.is_dirty("n1"));
    assert_eq!(f.remote.file_count(), 0);
    assert_eq!(f.local.last_sync_time().unwrap(), None);
}

#[tokio::test]
async fn unmetered_only_policy_rejects_cellular() {
    let local = Arc::new(MemoryLocalStore::new());
    let remote = Arc::new(MemoryRemoteStore::new());
    let gate = Arc::new(StaticNetworkGate::new(Connectivity::Cellular));
    let tracker = Arc::new(ChangeTracker::new(local.clone()));
    let manager = SyncManager::new(SyncManagerOptions {
        local,
        remote,
        gate,
        tracker,
        resolver: Arc::new(PreferRemote),
        policy: SyncPolicy::UnmeteredOnly,
    });

    manager.sync().await;
    assert!(matches!(manager.state(), SyncState::Error(_)));
}

#[tokio::test]
async fn missing_credentials_abort_the_pass() {
    let f = fixture();
    f.remote.set_credentials(false);

    f.manager.sync().await;
    match f.manager.state() {
        SyncState::Error(message) => assert!(message.contains("signed in"), "{message}"),
        other => panic!("expected Error state, got {other:?}"),
    }
}

#[tokio::test]
async fn listing_failure_is_pass_fatal_and_preserves_cursor() {
    let f = fixture();
    f.local.set_last_sync_time(4242).unwrap();
    f.remote.set_offline(true);

    f.manager.sync().await;
    assert!(matches!(f.manager.state(), SyncState::Error(_)));
    assert_eq!(f.local.last_sync_time().unwrap(), Some(4242));
}

// ============================================================================
// Concurrency guard
// ============================================================================

/// Remote whose listing blocks until released, to hold a pass in flight.
struct BlockingRemote {
    inner: MemoryRemoteStore,
    release: tokio::sync::Semaphore,
    listing_entered: tokio::sync::Semaphore,
}

#[async_trait]
impl RemoteStore for BlockingRemote {
    fn has_credentials(&self) -> bool {
        true
    }

    async fn list_changed_since(
        &self,
        since: TimestampMs,
    ) -> Result<Vec<RemoteObject>, RemoteError> {
        self.listing_entered.add_permits(1);
        let _permit = self.release.acquire().await.map_err(|_| {
            RemoteError::Network("closed".to_string())
        })?;
        self.inner.list_changed_since(since).await
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, RemoteError> {
        self.inner.download(file_id).await
    }

    async fn create_file(&self, name: &str, bytes: Vec<u8>) -> Result<String, RemoteError> {
        self.inner.create_file(name, bytes).await
    }

    async fn update_file(&self, file_id: &str, bytes: Vec<u8>) -> Result<(), RemoteError> {
        self.inner.update_file(file_id, bytes).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<RemoteObject>, RemoteError> {
        self.inner.find_by_name(name).await
    }
}

#[tokio::test]
async fn concurrent_pass_is_skipped_without_touching_shared_state() {
    let local = Arc::new(MemoryLocalStore::new());
    let remote = Arc::new(BlockingRemote {
        inner: MemoryRemoteStore::new(),
        release: tokio::sync::Semaphore::new(0),
        listing_entered: tokio::sync::Semaphore::new(0),
    });
    let gate = Arc::new(StaticNetworkGate::new(Connectivity::Unmetered));
    let tracker = Arc::new(ChangeTracker::new(local.clone()));
    let manager = Arc::new(SyncManager::new(SyncManagerOptions {
        local: local.clone(),
        remote: remote.clone(),
        gate,
        tracker: tracker.clone(),
        resolver: Arc::new(PreferRemote),
        policy: SyncPolicy::AnyConnection,
    }));

    local.insert_note(note("n1", "A", now_ms()), vec![]);
    tracker.register_changed("n1");

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.sync().await })
    };
    // Wait until the first pass is provably inside the listing call.
    remote.listing_entered.acquire().await.unwrap().forget();

    let second = manager.sync().await;
    assert!(second.is_skipped());
    // Nothing the skipped call could have touched moved.
    assert!(tracker.is_dirty("n1"));
    assert_eq!(local.last_sync_time().unwrap(), None);

    remote.release.add_permits(1);
    let first = first.await.unwrap();
    assert!(!first.is_skipped());
    assert_eq!(first.report().unwrap().uploaded, 1);
}

// ============================================================================
// State and progress signals
// ============================================================================

#[tokio::test]
async fn states_are_emitted_in_order() {
    let f = fixture();
    let states = Arc::new(Mutex::new(Vec::new()));
    let states2 = states.clone();
    f.manager.on_state(move |s| states2.lock().push(s.clone()));

    f.manager.sync().await;
    assert_eq!(
        *states.lock(),
        vec![SyncState::Connecting, SyncState::Syncing, SyncState::Success]
    );
}

#[tokio::test]
async fn progress_is_monotonic_and_reaches_one() {
    let f = fixture();
    for i in 0..5 {
        seed_remote_note(
            &f.remote,
            note(&format!("n{i}"), "T", 100),
            vec![],
            vec![],
            100,
        );
    }
    f.local.insert_note(note("mine", "M", now_ms()), vec![]);
    f.tracker.register_changed("mine");

    let values = Arc::new(Mutex::new(Vec::new()));
    let values2 = values.clone();
    f.manager.on_progress(move |p| values2.lock().push(*p));

    f.manager.sync().await;

    let values = values.lock();
    assert!(!values.is_empty());
    assert!(values.windows(2).all(|w| w[0] <= w[1]), "{values:?}");
    assert_eq!(*values.last().unwrap(), 1.0);
}

#[tokio::test]
async fn progress_resets_between_passes() {
    let f = fixture();
    f.manager.sync().await;
    assert_eq!(f.manager.progress(), 1.0);

    let low_seen = Arc::new(AtomicUsize::new(0));
    let low_seen2 = low_seen.clone();
    f.manager.on_progress(move |p| {
        if *p < 1.0 {
            low_seen2.fetch_add(1, Ordering::SeqCst);
        }
    });
    f.manager.sync().await;
    // The second pass published sub-1.0 values again.
    assert!(low_seen.load(Ordering::SeqCst) > 0);
}
