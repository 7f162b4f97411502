//! Integration tests for the ExposureClass finalizer protocol
//!
//! Reconcile passes are driven directly against the in-memory store for the
//! step-by-step scenarios, and through the full controller (watches, work
//! queue, workers) for the end-to-end ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use exposure_class_operator::config::OperatorConfig;
use exposure_class_operator::controllers::{run_exposure_class_controller, Context};
use exposure_class_operator::reconcilers::{ExposureClassReconciler, Outcome, FINALIZER_NAME};
use exposure_class_operator::store::{
    DependentObject, DependentQuery, MemoryStore, ObjectKey, ObjectStore, Page, ParentObject,
    StoreResult, WatchStream,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn reconciler(store: &Arc<MemoryStore>) -> ExposureClassReconciler {
    ExposureClassReconciler::new(store.clone(), 1)
}

fn fast_config() -> OperatorConfig {
    OperatorConfig {
        workers: 2,
        poll_interval_secs: 1,
        backoff_base_millis: 10,
        backoff_max_secs: 1,
        ..Default::default()
    }
}

struct RunningController {
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl RunningController {
    fn start(store: Arc<MemoryStore>) -> Self {
        let context = Arc::new(Context::new(store, fast_config()));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_exposure_class_controller(context, shutdown.clone()));
        Self { shutdown, handle }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("controller did not stop")
            .expect("controller task panicked");
    }
}

/// Poll `check` until it holds or five seconds pass
async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {}", what);
}

/// Assert `check` holds for the whole of `period`
async fn consistently<F: Fn() -> bool>(what: &str, period: Duration, check: F) {
    let deadline = tokio::time::Instant::now() + period;
    while tokio::time::Instant::now() < deadline {
        assert!(check(), "condition stopped holding: {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn guarded(store: &MemoryStore, key: &ObjectKey) -> bool {
    store
        .parent(key)
        .map(|p| p.finalizers == vec![FINALIZER_NAME.to_string()])
        .unwrap_or(false)
}

// ============================================================================
// Step-by-step scenarios
// ============================================================================

#[tokio::test]
async fn unreferenced_class_is_guarded_then_released() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);
    let key = store.create_parent("internet").key;

    assert_eq!(assert_ok!(reconciler.reconcile(&key).await), Outcome::Guarded);
    assert!(guarded(&store, &key));

    assert_ok!(store.delete_parent(&key).await);
    assert!(store.parent(&key).unwrap().deletion_timestamp.is_some());

    assert_eq!(assert_ok!(reconciler.reconcile(&key).await), Outcome::Released);
    assert!(store.parent(&key).is_none());

    assert_eq!(assert_ok!(reconciler.reconcile(&key).await), Outcome::Absent);
}

#[tokio::test]
async fn referenced_class_is_blocked_until_shoot_is_gone() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);
    let key = store.create_parent("internet").key;
    store.apply_dependent("garden-dev", "shoot-a", Some("internet"));

    assert_eq!(assert_ok!(reconciler.reconcile(&key).await), Outcome::Guarded);
    assert_ok!(store.delete_parent(&key).await);

    for _ in 0..3 {
        assert_eq!(assert_ok!(reconciler.reconcile(&key).await), Outcome::Blocked);
        let parent = store.parent(&key).unwrap();
        assert!(parent.deletion_timestamp.is_some());
        assert!(parent.has_finalizer(FINALIZER_NAME));
    }

    store.delete_dependent("garden-dev", "shoot-a");
    assert_eq!(assert_ok!(reconciler.reconcile(&key).await), Outcome::Released);
    assert!(store.parent(&key).is_none());
}

#[tokio::test]
async fn class_deleted_before_first_pass_is_released_in_one_pass() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);
    let parent = store.create_parent("internet");

    // another controller's finalizer keeps the object around after the delete
    let mut held = parent.clone();
    held.add_finalizer("other.oso.sh/hold");
    assert_ok!(store.update_parent(&held).await);
    assert_ok!(store.delete_parent(&parent.key).await);

    let writes_before = store.parent_writes();
    assert_eq!(
        assert_ok!(reconciler.reconcile(&parent.key).await),
        Outcome::Released
    );

    let after = store.parent(&parent.key).unwrap();
    assert!(!after.has_finalizer(FINALIZER_NAME));
    assert_eq!(after.finalizers, vec!["other.oso.sh/hold"]);
    // attach and detach
    assert_eq!(store.parent_writes() - writes_before, 2);
}

#[tokio::test]
async fn class_deleted_before_first_pass_stays_while_referenced() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);
    let parent = store.create_parent("internet");
    store.apply_dependent("garden-dev", "shoot-a", Some("internet"));

    let mut held = parent.clone();
    held.add_finalizer("other.oso.sh/hold");
    assert_ok!(store.update_parent(&held).await);
    assert_ok!(store.delete_parent(&parent.key).await);

    assert_eq!(
        assert_ok!(reconciler.reconcile(&parent.key).await),
        Outcome::Blocked
    );
    assert!(store.parent(&parent.key).unwrap().has_finalizer(FINALIZER_NAME));
}

#[tokio::test]
async fn repointed_shoot_releases_old_class() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);
    let internet = store.create_parent("internet").key;
    let intranet = store.create_parent("intranet").key;
    store.apply_dependent("garden-dev", "shoot-a", Some("internet"));

    assert_ok!(reconciler.reconcile(&internet).await);
    assert_ok!(reconciler.reconcile(&intranet).await);
    assert_ok!(store.delete_parent(&internet).await);
    assert_eq!(assert_ok!(reconciler.reconcile(&internet).await), Outcome::Blocked);

    store.apply_dependent("garden-dev", "shoot-a", Some("intranet"));
    assert_eq!(assert_ok!(reconciler.reconcile(&internet).await), Outcome::Released);

    assert_ok!(store.delete_parent(&intranet).await);
    assert_eq!(assert_ok!(reconciler.reconcile(&intranet).await), Outcome::Blocked);
}

#[tokio::test]
async fn release_conflict_is_retried_and_persistent_conflict_fails_the_pass() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store);
    let key = store.create_parent("internet").key;
    assert_ok!(reconciler.reconcile(&key).await);
    assert_ok!(store.delete_parent(&key).await);

    store.conflict_next_updates(3);
    assert_err!(reconciler.reconcile(&key).await);
    assert!(store.parent(&key).unwrap().has_finalizer(FINALIZER_NAME));

    assert_eq!(assert_ok!(reconciler.reconcile(&key).await), Outcome::Released);
}

// ============================================================================
// Safety: the finalizer is only removed right after an empty dependent scan
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Call {
    List { found: bool },
    Release,
    Other,
}

/// Store wrapper recording the order of list results and finalizer removals
struct RecordingStore {
    inner: Arc<MemoryStore>,
    calls: Mutex<Vec<Call>>,
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn get_parent(&self, key: &ObjectKey) -> StoreResult<ParentObject> {
        self.inner.get_parent(key).await
    }

    async fn update_parent(&self, parent: &ParentObject) -> StoreResult<ParentObject> {
        let releasing = !parent.has_finalizer(FINALIZER_NAME);
        let result = self.inner.update_parent(parent).await;
        if result.is_ok() {
            let call = if releasing { Call::Release } else { Call::Other };
            self.calls.lock().push(call);
        }
        result
    }

    async fn delete_parent(&self, key: &ObjectKey) -> StoreResult<()> {
        self.inner.delete_parent(key).await
    }

    async fn list_dependents(&self, query: &DependentQuery) -> StoreResult<Page<DependentObject>> {
        let page = self.inner.list_dependents(query).await?;
        self.calls.lock().push(Call::List {
            found: !page.items.is_empty(),
        });
        Ok(page)
    }

    fn watch_parents(&self) -> WatchStream<ParentObject> {
        self.inner.watch_parents()
    }

    fn watch_dependents(&self) -> WatchStream<DependentObject> {
        self.inner.watch_dependents()
    }
}

#[tokio::test]
async fn finalizer_removal_always_follows_empty_scan() {
    let memory = Arc::new(MemoryStore::new());
    let store = Arc::new(RecordingStore {
        inner: memory.clone(),
        calls: Mutex::new(Vec::new()),
    });
    let reconciler = ExposureClassReconciler::new(store.clone(), 1);
    let key = memory.create_parent("internet").key;
    memory.apply_dependent("garden-dev", "shoot-a", Some("internet"));
    memory.apply_dependent("garden-dev", "shoot-b", Some("internet"));

    assert_ok!(reconciler.reconcile(&key).await);
    assert_ok!(memory.delete_parent(&key).await);
    assert_ok!(reconciler.reconcile(&key).await);

    memory.delete_dependent("garden-dev", "shoot-a");
    assert_eq!(assert_ok!(reconciler.reconcile(&key).await), Outcome::Blocked);

    memory.fail_next_lists(1);
    assert_err!(reconciler.reconcile(&key).await);

    memory.delete_dependent("garden-dev", "shoot-b");
    assert_eq!(assert_ok!(reconciler.reconcile(&key).await), Outcome::Released);

    let calls = store.calls.lock().clone();
    let releases: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == Call::Release)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(releases.len(), 1);
    for i in releases {
        assert!(i > 0);
        assert_eq!(calls[i - 1], Call::List { found: false });
    }
}

// ============================================================================
// End-to-end through the controller
// ============================================================================

#[tokio::test]
async fn controller_guards_and_releases_unreferenced_class() {
    let store = Arc::new(MemoryStore::new());
    let controller = RunningController::start(store.clone());
    let key = store.create_parent("internet").key;

    eventually("finalizer attached", || guarded(&store, &key)).await;

    assert_ok!(store.delete_parent(&key).await);
    eventually("class removed", || store.parent(&key).is_none()).await;

    controller.stop().await;
}

#[tokio::test]
async fn controller_holds_class_until_shoot_is_deleted() {
    let store = Arc::new(MemoryStore::new());
    let key = store.create_parent("internet").key;
    store.apply_dependent("garden-dev", "shoot-a", Some("internet"));
    let controller = RunningController::start(store.clone());

    eventually("finalizer attached", || guarded(&store, &key)).await;
    assert_ok!(store.delete_parent(&key).await);

    consistently("class kept", Duration::from_millis(300), || {
        store.parent(&key).is_some()
    })
    .await;

    store.delete_dependent("garden-dev", "shoot-a");
    eventually("class removed", || store.parent(&key).is_none()).await;

    controller.stop().await;
}

#[tokio::test]
async fn controller_recovers_from_transient_failures() {
    let store = Arc::new(MemoryStore::new());
    let controller = RunningController::start(store.clone());
    let key = store.create_parent("internet").key;
    eventually("finalizer attached", || guarded(&store, &key)).await;

    store.fail_next_lists(3);
    store.fail_next_gets(2);
    assert_ok!(store.delete_parent(&key).await);

    eventually("class removed", || store.parent(&key).is_none()).await;
    controller.stop().await;
}

#[tokio::test]
async fn controller_picks_up_existing_objects_after_restart() {
    let store = Arc::new(MemoryStore::new());
    let key = store.create_parent("internet").key;

    let first = RunningController::start(store.clone());
    eventually("finalizer attached", || guarded(&store, &key)).await;
    first.stop().await;

    // deleted while no controller runs
    assert_ok!(store.delete_parent(&key).await);
    assert!(store.parent(&key).is_some());

    let second = RunningController::start(store.clone());
    eventually("class removed", || store.parent(&key).is_none()).await;
    second.stop().await;
}

#[tokio::test]
async fn controller_settles_on_deleted_class_held_by_other_finalizer() {
    let store = Arc::new(MemoryStore::new());
    let mut parent = store.create_parent("internet");
    parent.add_finalizer("other.oso.sh/hold");
    let parent = assert_ok!(store.update_parent(&parent).await);
    let key = parent.key.clone();
    // deleted before any pass could guard it
    assert_ok!(store.delete_parent(&key).await);
    let baseline = store.parent_writes();

    let controller = RunningController::start(store.clone());
    eventually("guard attached and released", || {
        store.parent_writes() >= baseline + 2
            && store
                .parent(&key)
                .is_some_and(|p| !p.has_finalizer(FINALIZER_NAME))
    })
    .await;

    let settled = store.parent_writes();
    consistently("no further writes", Duration::from_millis(500), || {
        store.parent_writes() == settled
    })
    .await;
    assert_eq!(settled, baseline + 2);

    // the other controller lets go, the class disappears
    let mut held = store.parent(&key).expect("class still held");
    assert_eq!(held.finalizers, vec!["other.oso.sh/hold".to_string()]);
    held.remove_finalizer("other.oso.sh/hold");
    assert_ok!(store.update_parent(&held).await);
    eventually("class removed", || store.parent(&key).is_none()).await;

    controller.stop().await;
}
