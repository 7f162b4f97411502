//! In-process object store
//!
//! Mirrors the API server behaviour the finalizer protocol relies on:
//! resource versions, soft deletion while finalizers remain, and watches
//! that start with a snapshot. Faults can be injected to exercise the
//! retry paths.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{
    DependentObject, DependentQuery, ObjectKey, ObjectStore, Page, ParentObject, StoreError,
    StoreResult, WatchEvent, WatchStream,
};

const EVENT_BUFFER: usize = 1024;

#[derive(Default)]
struct Faults {
    get_failures: u32,
    list_failures: u32,
    update_conflicts: u32,
    update_rejections: u32,
}

#[derive(Default)]
struct State {
    parents: BTreeMap<ObjectKey, ParentObject>,
    dependents: BTreeMap<ObjectKey, DependentObject>,
    version: u64,
    parent_writes: u64,
    faults: Faults,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// Store backed by in-memory maps
pub struct MemoryStore {
    state: Mutex<State>,
    parent_events: broadcast::Sender<WatchEvent<ParentObject>>,
    dependent_events: broadcast::Sender<WatchEvent<DependentObject>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (parent_events, _) = broadcast::channel(EVENT_BUFFER);
        let (dependent_events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Mutex::new(State::default()),
            parent_events,
            dependent_events,
        }
    }

    /// Create a cluster-scoped parent without finalizers
    pub fn create_parent(&self, name: &str) -> ParentObject {
        let mut state = self.state.lock();
        let parent = ParentObject {
            key: ObjectKey::cluster(name),
            finalizers: Vec::new(),
            deletion_timestamp: None,
            resource_version: state.next_version(),
        };
        state.parents.insert(parent.key.clone(), parent.clone());
        let _ = self.parent_events.send(WatchEvent::Applied(parent.clone()));
        parent
    }

    /// Create or re-point a dependent
    pub fn apply_dependent(
        &self,
        namespace: &str,
        name: &str,
        parent: Option<&str>,
    ) -> DependentObject {
        let dependent = DependentObject {
            key: ObjectKey::namespaced(namespace, name),
            parent: parent.map(ObjectKey::cluster),
        };
        self.state
            .lock()
            .dependents
            .insert(dependent.key.clone(), dependent.clone());
        let _ = self
            .dependent_events
            .send(WatchEvent::Applied(dependent.clone()));
        dependent
    }

    pub fn delete_dependent(&self, namespace: &str, name: &str) -> Option<DependentObject> {
        let removed = self
            .state
            .lock()
            .dependents
            .remove(&ObjectKey::namespaced(namespace, name));
        if let Some(dependent) = &removed {
            let _ = self
                .dependent_events
                .send(WatchEvent::Deleted(dependent.clone()));
        }
        removed
    }

    /// Current state of a parent, `None` once hard-deleted
    pub fn parent(&self, key: &ObjectKey) -> Option<ParentObject> {
        self.state.lock().parents.get(key).cloned()
    }

    /// Number of successful parent updates so far
    pub fn parent_writes(&self) -> u64 {
        self.state.lock().parent_writes
    }

    pub fn fail_next_gets(&self, count: u32) {
        self.state.lock().faults.get_failures = count;
    }

    pub fn fail_next_lists(&self, count: u32) {
        self.state.lock().faults.list_failures = count;
    }

    pub fn conflict_next_updates(&self, count: u32) {
        self.state.lock().faults.update_conflicts = count;
    }

    /// Refuse the next `count` parent updates, as an admission webhook would
    pub fn reject_next_updates(&self, count: u32) {
        self.state.lock().faults.update_rejections = count;
    }

    fn take_fault(counter: &mut u32) -> bool {
        if *counter == 0 {
            return false;
        }
        *counter -= 1;
        true
    }

    fn watch<T: Clone + Send + 'static>(
        sender: &broadcast::Sender<WatchEvent<T>>,
        snapshot: Vec<T>,
    ) -> WatchStream<T> {
        let receiver = sender.subscribe();
        let initial = stream::iter(snapshot.into_iter().map(|obj| Ok(WatchEvent::Applied(obj))));
        let live = stream::unfold(receiver, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(broadcast::error::RecvError::Lagged(missed)) => Some((
                    Err(StoreError::Transient(format!("watch lagged by {} events", missed))),
                    rx,
                )),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        initial.chain(live).boxed()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_parent(&self, key: &ObjectKey) -> StoreResult<ParentObject> {
        let mut state = self.state.lock();
        if Self::take_fault(&mut state.faults.get_failures) {
            return Err(StoreError::Transient("injected get failure".to_string()));
        }
        state
            .parents
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn update_parent(&self, parent: &ParentObject) -> StoreResult<ParentObject> {
        let mut state = self.state.lock();
        if Self::take_fault(&mut state.faults.update_rejections) {
            return Err(StoreError::Rejected(format!(
                "injected rejection on {}",
                parent.key
            )));
        }
        if Self::take_fault(&mut state.faults.update_conflicts) {
            return Err(StoreError::Conflict(format!(
                "injected conflict on {}",
                parent.key
            )));
        }

        let current = state
            .parents
            .get(&parent.key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(parent.key.to_string()))?;
        if current.resource_version != parent.resource_version {
            return Err(StoreError::Conflict(format!(
                "{} has resource version {}, update was based on {}",
                parent.key, current.resource_version, parent.resource_version
            )));
        }

        let mut finalizers = Vec::with_capacity(parent.finalizers.len());
        for token in &parent.finalizers {
            if !finalizers.contains(token) {
                finalizers.push(token.clone());
            }
        }

        let updated = ParentObject {
            finalizers,
            resource_version: state.next_version(),
            ..current
        };
        state.parent_writes += 1;

        if updated.deletion_timestamp.is_some() && updated.finalizers.is_empty() {
            state.parents.remove(&updated.key);
            let _ = self.parent_events.send(WatchEvent::Deleted(updated.clone()));
        } else {
            state.parents.insert(updated.key.clone(), updated.clone());
            let _ = self.parent_events.send(WatchEvent::Applied(updated.clone()));
        }
        Ok(updated)
    }

    async fn delete_parent(&self, key: &ObjectKey) -> StoreResult<()> {
        let mut state = self.state.lock();
        let current = state
            .parents
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if current.finalizers.is_empty() {
            state.parents.remove(key);
            let _ = self.parent_events.send(WatchEvent::Deleted(current));
            return Ok(());
        }
        if current.deletion_timestamp.is_some() {
            return Ok(());
        }

        let deleting = ParentObject {
            deletion_timestamp: Some(Utc::now()),
            resource_version: state.next_version(),
            ..current
        };
        state.parents.insert(key.clone(), deleting.clone());
        let _ = self.parent_events.send(WatchEvent::Applied(deleting));
        Ok(())
    }

    async fn list_dependents(&self, query: &DependentQuery) -> StoreResult<Page<DependentObject>> {
        let mut state = self.state.lock();
        if Self::take_fault(&mut state.faults.list_failures) {
            return Err(StoreError::Transient("injected list failure".to_string()));
        }

        let offset = match &query.continue_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StoreError::Rejected(format!("invalid continue token {}", token)))?,
            None => 0,
        };
        let limit = query.limit.max(1) as usize;

        let matching: Vec<&DependentObject> = state
            .dependents
            .values()
            .filter(|d| d.parent.as_ref() == Some(&query.parent))
            .collect();
        let items: Vec<DependentObject> = matching
            .iter()
            .skip(offset)
            .take(limit)
            .map(|d| (*d).clone())
            .collect();
        let next = offset + items.len();
        let continue_token = (next < matching.len()).then(|| next.to_string());

        Ok(Page {
            items,
            continue_token,
        })
    }

    fn watch_parents(&self) -> WatchStream<ParentObject> {
        let state = self.state.lock();
        let snapshot = state.parents.values().cloned().collect();
        Self::watch(&self.parent_events, snapshot)
    }

    fn watch_dependents(&self) -> WatchStream<DependentObject> {
        let state = self.state.lock();
        let snapshot = state.dependents.values().cloned().collect();
        Self::watch(&self.dependent_events, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_is_soft_while_finalizers_remain() {
        let store = MemoryStore::new();
        let parent = store.create_parent("internet");

        let mut guarded = parent.clone();
        guarded.add_finalizer("guard");
        let guarded = store.update_parent(&guarded).await.unwrap();

        store.delete_parent(&parent.key).await.unwrap();
        let deleting = store.parent(&parent.key).unwrap();
        assert!(deleting.deletion_timestamp.is_some());
        assert_ne!(deleting.resource_version, guarded.resource_version);

        let mut released = deleting.clone();
        released.remove_finalizer("guard");
        store.update_parent(&released).await.unwrap();
        assert!(store.parent(&parent.key).is_none());
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        let parent = store.create_parent("internet");

        let mut first = parent.clone();
        first.add_finalizer("a");
        store.update_parent(&first).await.unwrap();

        let mut second = parent.clone();
        second.add_finalizer("b");
        let err = store.update_parent(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.parent_writes(), 1);
    }

    #[tokio::test]
    async fn rejected_update_leaves_parent_untouched() {
        let store = MemoryStore::new();
        let parent = store.create_parent("internet");
        store.reject_next_updates(1);

        let mut guarded = parent.clone();
        guarded.add_finalizer("guard");
        let err = store.update_parent(&guarded).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(store.parent(&parent.key).unwrap(), parent);
        assert_eq!(store.parent_writes(), 0);

        store.update_parent(&guarded).await.unwrap();
        assert_eq!(store.parent_writes(), 1);
    }

    #[tokio::test]
    async fn list_dependents_pages_through_matches() {
        let store = MemoryStore::new();
        store.apply_dependent("a", "one", Some("internet"));
        store.apply_dependent("a", "two", Some("internet"));
        store.apply_dependent("a", "three", Some("intranet"));
        store.apply_dependent("b", "four", None);

        let mut query = DependentQuery {
            parent: ObjectKey::cluster("internet"),
            limit: 1,
            continue_token: None,
        };
        let first = store.list_dependents(&query).await.unwrap();
        assert_eq!(first.items.len(), 1);
        assert!(first.continue_token.is_some());

        query.continue_token = first.continue_token;
        let second = store.list_dependents(&query).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.continue_token, None);
        assert_ne!(first.items[0].key, second.items[0].key);
    }

    #[tokio::test]
    async fn watch_starts_with_snapshot() {
        let store = MemoryStore::new();
        store.create_parent("internet");

        let mut events = store.watch_parents();
        store.create_parent("intranet");

        let first = events.next().await.unwrap().unwrap();
        let second = events.next().await.unwrap().unwrap();
        assert_eq!(first.object().key, ObjectKey::cluster("internet"));
        assert_eq!(second.object().key, ObjectKey::cluster("intranet"));
    }
}
