//! ExposureClass reconciler
//!
//! One pass fetches the parent, makes sure the finalizer is attached, and
//! releases it once the parent is deleting and no Shoot references it.
//!
//! | observed                          | action                          | outcome    |
//! |-----------------------------------|---------------------------------|------------|
//! | not found                         | none                            | `Absent`   |
//! | active, unguarded                 | attach finalizer                | `Guarded`  |
//! | active, guarded                   | none                            | `Guarded`  |
//! | deleting, dependents exist        | none, poll again later          | `Blocked`  |
//! | deleting, no dependents           | attach if needed, then detach   | `Released` |
//! | deleting, unguarded, released     | none                            | `Released` |
//!
//! A parent can outlive its release while other finalizers hold it. Its
//! further updates must not re-attach the finalizer, or each pass would
//! attach and detach again and trigger the next one.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::{DependentIndex, FinalizerGuard};
use crate::store::{Lifecycle, ObjectKey, ObjectStore, StoreError};

/// Finalizer protecting ExposureClasses still referenced by Shoots
pub const FINALIZER_NAME: &str = "core.oso.sh/exposureclass-finalizer";

/// Kind label used in logs and metrics
pub const KIND: &str = "ExposureClass";

/// Result of one reconcile pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Parent no longer exists
    Absent,
    /// Parent is active and carries the finalizer
    Guarded,
    /// Parent is deleting but still referenced
    Blocked,
    /// Finalizer removed, the store deletes the parent
    Released,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Absent => "absent",
            Outcome::Guarded => "guarded",
            Outcome::Blocked => "blocked",
            Outcome::Released => "released",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine driving the finalizer of one parent at a time
pub struct ExposureClassReconciler {
    store: Arc<dyn ObjectStore>,
    guard: FinalizerGuard,
    index: DependentIndex,
    /// Parents released by this process and not yet observed gone
    released: Mutex<HashSet<ObjectKey>>,
}

impl ExposureClassReconciler {
    pub fn new(store: Arc<dyn ObjectStore>, conflict_retries: u32) -> Self {
        Self {
            guard: FinalizerGuard::new(store.clone(), FINALIZER_NAME, conflict_retries),
            index: DependentIndex::new(store.clone()),
            store,
            released: Mutex::new(HashSet::new()),
        }
    }

    /// Run one pass for `key`. A parent vanishing at any point ends the pass
    /// as `Absent`; every other error is returned for a rate limited retry.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome> {
        match self.reconcile_inner(key).await {
            Err(e) if e.is_not_found() => {
                self.check_released(key).await;
                Ok(Outcome::Absent)
            }
            other => other,
        }
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> Result<Outcome> {
        let mut parent = self.store.get_parent(key).await?;
        let lifecycle = parent.lifecycle();

        if !self.guard.is_present(&parent) {
            let deleting = matches!(lifecycle, Lifecycle::Deleting { .. });
            let released = self.released.lock().contains(key);
            if deleting && released {
                debug!(
                    name = %key,
                    finalizers = ?parent.finalizers,
                    "Already released, held by other finalizers"
                );
                return Ok(Outcome::Released);
            }
            debug!(name = %key, ?lifecycle, "Attaching finalizer");
            parent = match self.guard.ensure_present(parent).await {
                Ok(updated) => updated,
                Err(Error::Store(StoreError::Rejected(reason)))
                    if matches!(lifecycle, Lifecycle::Deleting { .. }) =>
                {
                    warn!(
                        name = %key,
                        reason = %reason,
                        "Store refused finalizer on deleting object, nothing to release"
                    );
                    return Ok(Outcome::Released);
                }
                Err(e) => return Err(e),
            };
        }

        let Lifecycle::Deleting { since } = parent.lifecycle() else {
            return Ok(Outcome::Guarded);
        };

        if self.index.has_dependents(key).await? {
            info!(name = %key, deleting_since = %since, "Deletion blocked by referencing Shoots");
            return Ok(Outcome::Blocked);
        }

        self.guard.ensure_absent(parent).await?;
        self.released.lock().insert(key.clone());
        info!(name = %key, "Released finalizer, no Shoot references this ExposureClass");
        Ok(Outcome::Released)
    }

    /// Report dependents that appear for a parent this process already released
    async fn check_released(&self, key: &ObjectKey) {
        let was_released = self.released.lock().remove(key);
        if !was_released {
            return;
        }
        match self.index.has_dependents(key).await {
            Ok(true) => {
                error!(
                    name = %key,
                    "Shoots reference an ExposureClass whose finalizer was already released"
                );
                metrics::INVARIANT_VIOLATIONS.with_label_values(&[KIND]).inc();
            }
            Ok(false) => {}
            Err(e) => {
                warn!(name = %key, error = %e, "Could not verify released ExposureClass");
            }
        }
    }
}
