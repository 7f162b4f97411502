//! Kubernetes-backed object store
//!
//! ExposureClasses are the parents, Shoots the dependents. Writes are merge
//! patches that carry `metadata.resourceVersion`, which makes the API server
//! reject them with 409 when the object changed in the meantime.

use async_trait::async_trait;
use futures::{future, StreamExt};
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use kube_runtime::{watcher, WatchStreamExt};
use serde_json::json;
use tracing::warn;

use crate::crd::{ExposureClass, Shoot};
use crate::store::{
    DependentObject, DependentQuery, ObjectKey, ObjectStore, Page, ParentObject, StoreError,
    StoreResult, WatchEvent, WatchStream,
};
use crate::validation;

/// Store talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    page_size: u32,
}

impl KubeStore {
    pub fn new(client: Client, page_size: u32) -> Self {
        Self { client, page_size }
    }

    fn exposure_classes(&self) -> Api<ExposureClass> {
        Api::all(self.client.clone())
    }

    fn shoots(&self) -> Api<Shoot> {
        Api::all(self.client.clone())
    }
}

/// Reduce an ExposureClass to what the finalizer protocol needs
pub fn parent_from_exposure_class(class: &ExposureClass) -> ParentObject {
    ParentObject {
        key: ObjectKey::cluster(class.name_any()),
        finalizers: class.finalizers().to_vec(),
        deletion_timestamp: class.metadata.deletion_timestamp.as_ref().map(|t| t.0),
        resource_version: class.resource_version().unwrap_or_default(),
    }
}

/// Reduce a Shoot to its identity and ExposureClass reference
pub fn dependent_from_shoot(shoot: &Shoot) -> DependentObject {
    DependentObject {
        key: ObjectKey {
            namespace: shoot.namespace(),
            name: shoot.name_any(),
        },
        parent: shoot
            .spec
            .exposure_class_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(ObjectKey::cluster),
    }
}

/// Classify an API error by how the reconciler should react to it
pub fn store_error(err: kube::Error, target: &str) -> StoreError {
    match err {
        kube::Error::Api(resp) => {
            let msg = format!("{}: {}", target, resp.message);
            match resp.code {
                404 => StoreError::NotFound(msg),
                409 => StoreError::Conflict(msg),
                429 | 500..=599 => StoreError::Transient(msg),
                _ => StoreError::Rejected(msg),
            }
        }
        other => StoreError::Transient(format!("{}: {}", target, other)),
    }
}

fn watch_event<K, T>(event: watcher::Event<K>, convert: fn(&K) -> T) -> Option<WatchEvent<T>> {
    match event {
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
            Some(WatchEvent::Applied(convert(&obj)))
        }
        watcher::Event::Delete(obj) => Some(WatchEvent::Deleted(convert(&obj))),
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}

fn observe_exposure_class(class: &ExposureClass) -> ParentObject {
    let violations = validation::validate_exposure_class(class);
    if !violations.is_empty() {
        let details: Vec<String> = violations.iter().map(ToString::to_string).collect();
        warn!(name = %class.name_any(), violations = ?details, "Observed invalid ExposureClass");
    }
    parent_from_exposure_class(class)
}

fn observe_shoot(shoot: &Shoot) -> DependentObject {
    let violations = validation::validate_shoot(shoot);
    if !violations.is_empty() {
        let details: Vec<String> = violations.iter().map(ToString::to_string).collect();
        warn!(
            name = %shoot.name_any(),
            namespace = shoot.namespace().as_deref().unwrap_or("default"),
            violations = ?details,
            "Observed invalid Shoot"
        );
    }
    dependent_from_shoot(shoot)
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_parent(&self, key: &ObjectKey) -> StoreResult<ParentObject> {
        self.exposure_classes()
            .get(&key.name)
            .await
            .map(|class| parent_from_exposure_class(&class))
            .map_err(|e| store_error(e, &key.to_string()))
    }

    async fn update_parent(&self, parent: &ParentObject) -> StoreResult<ParentObject> {
        let patch = json!({
            "metadata": {
                "resourceVersion": parent.resource_version,
                "finalizers": parent.finalizers,
            }
        });
        self.exposure_classes()
            .patch(&parent.key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map(|class| parent_from_exposure_class(&class))
            .map_err(|e| store_error(e, &parent.key.to_string()))
    }

    async fn delete_parent(&self, key: &ObjectKey) -> StoreResult<()> {
        self.exposure_classes()
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| store_error(e, &key.to_string()))
    }

    async fn list_dependents(&self, query: &DependentQuery) -> StoreResult<Page<DependentObject>> {
        // Shoot spec fields are not selectable server-side; filter each page here.
        let mut params = ListParams::default().limit(self.page_size.max(query.limit));
        if let Some(token) = &query.continue_token {
            params = params.continue_token(token);
        }

        let list = self
            .shoots()
            .list(&params)
            .await
            .map_err(|e| store_error(e, "shoots"))?;

        let items = list
            .items
            .iter()
            .map(dependent_from_shoot)
            .filter(|d| d.parent.as_ref() == Some(&query.parent))
            .take(query.limit.max(1) as usize)
            .collect();
        let continue_token = list.metadata.continue_.filter(|token| !token.is_empty());

        Ok(Page {
            items,
            continue_token,
        })
    }

    fn watch_parents(&self) -> WatchStream<ParentObject> {
        watcher(self.exposure_classes(), watcher::Config::default())
            .default_backoff()
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => watch_event(event, observe_exposure_class).map(Ok),
                    Err(e) => Some(Err(StoreError::Transient(e.to_string()))),
                })
            })
            .boxed()
    }

    fn watch_dependents(&self) -> WatchStream<DependentObject> {
        watcher(self.shoots(), watcher::Config::default())
            .default_backoff()
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => watch_event(event, observe_shoot).map(Ok),
                    Err(e) => Some(Err(StoreError::Transient(e.to_string()))),
                })
            })
            .boxed()
    }
}
