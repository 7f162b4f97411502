//! Object store abstraction
//!
//! The reconciler talks to the backing store only through [`ObjectStore`].
//! Parents and dependents are reduced to the handful of fields the finalizer
//! protocol needs; everything else about the resources stays in the adapter.

mod memory;

pub use memory::MemoryStore;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

/// Identity of an object: cluster-scoped when `namespace` is `None`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    /// Key of a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Lifecycle of a parent, derived from its deletion timestamp
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Deleting { since: DateTime<Utc> },
}

/// The guarded resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentObject {
    pub key: ObjectKey,
    /// Ordered and free of duplicates
    pub finalizers: Vec<String>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, opaque to the operator
    pub resource_version: String,
}

impl ParentObject {
    pub fn lifecycle(&self) -> Lifecycle {
        match self.deletion_timestamp {
            Some(since) => Lifecycle::Deleting { since },
            None => Lifecycle::Active,
        }
    }

    pub fn has_finalizer(&self, token: &str) -> bool {
        self.finalizers.iter().any(|f| f == token)
    }

    /// Append `token` unless present. Returns whether the set changed.
    pub fn add_finalizer(&mut self, token: &str) -> bool {
        if self.has_finalizer(token) {
            return false;
        }
        self.finalizers.push(token.to_string());
        true
    }

    /// Drop `token` if present. Returns whether the set changed.
    pub fn remove_finalizer(&mut self, token: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != token);
        self.finalizers.len() != before
    }
}

/// A resource that may reference one parent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependentObject {
    pub key: ObjectKey,
    pub parent: Option<ObjectKey>,
}

/// Filter for listing dependents
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependentQuery {
    /// Only dependents referencing this parent
    pub parent: ObjectKey,
    /// Maximum number of matches returned per page
    pub limit: u32,
    pub continue_token: Option<String>,
}

/// One page of a list call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Set when more results remain
    pub continue_token: Option<String>,
}

/// Change notification from a watch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent<T> {
    Applied(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Applied(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }
}

/// Errors surfaced by a store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Object does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// Resource version is stale
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store unreachable or overloaded
    #[error("transient store error: {0}")]
    Transient(String),

    /// Store refused the request
    #[error("request rejected: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub type WatchStream<T> = BoxStream<'static, StoreResult<WatchEvent<T>>>;

/// Typed access to parents and dependents
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_parent(&self, key: &ObjectKey) -> StoreResult<ParentObject>;

    /// Persist `parent.finalizers`, conditional on `parent.resource_version`.
    ///
    /// When the write empties the finalizers of a deleting parent the store
    /// removes it and the returned object is the last state seen.
    async fn update_parent(&self, parent: &ParentObject) -> StoreResult<ParentObject>;

    /// Request deletion. Only sets the deletion timestamp while finalizers remain.
    async fn delete_parent(&self, key: &ObjectKey) -> StoreResult<()>;

    async fn list_dependents(&self, query: &DependentQuery) -> StoreResult<Page<DependentObject>>;

    fn watch_parents(&self) -> WatchStream<ParentObject>;

    fn watch_dependents(&self) -> WatchStream<DependentObject>;
}
