//! Finalizer guard
//!
//! Attaches and detaches this operator's finalizer on a parent. Both
//! directions are idempotent and write only when the set actually changes.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::store::{ObjectStore, ParentObject, StoreError};

/// Idempotent finalizer writer
pub struct FinalizerGuard {
    store: Arc<dyn ObjectStore>,
    token: String,
    conflict_retries: u32,
}

impl FinalizerGuard {
    pub fn new(store: Arc<dyn ObjectStore>, token: impl Into<String>, conflict_retries: u32) -> Self {
        Self {
            store,
            token: token.into(),
            conflict_retries,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_present(&self, parent: &ParentObject) -> bool {
        parent.has_finalizer(&self.token)
    }

    /// Make sure the finalizer is on `parent`
    pub async fn ensure_present(&self, parent: ParentObject) -> Result<ParentObject> {
        let token = self.token.clone();
        let updated = self
            .update_with_retry(parent, |p| p.add_finalizer(&token))
            .await?;
        Ok(updated)
    }

    /// Make sure the finalizer is gone from `parent`
    pub async fn ensure_absent(&self, parent: ParentObject) -> Result<ParentObject> {
        let token = self.token.clone();
        let updated = self
            .update_with_retry(parent, |p| p.remove_finalizer(&token))
            .await?;
        Ok(updated)
    }

    /// Apply `mutate` and write the result, refetching on version conflicts.
    ///
    /// `mutate` reports whether it changed anything; no change means no write.
    async fn update_with_retry<F>(&self, mut parent: ParentObject, mutate: F) -> Result<ParentObject>
    where
        F: Fn(&mut ParentObject) -> bool,
    {
        let mut conflicts = 0;
        loop {
            let mut desired = parent.clone();
            if !mutate(&mut desired) {
                return Ok(parent);
            }

            match self.store.update_parent(&desired).await {
                Ok(updated) => {
                    info!(
                        name = %updated.key,
                        finalizers = ?updated.finalizers,
                        "Updated finalizers"
                    );
                    return Ok(updated);
                }
                Err(StoreError::Conflict(msg)) if conflicts < self.conflict_retries => {
                    conflicts += 1;
                    debug!(name = %parent.key, conflict = %msg, attempt = conflicts, "Refetching after conflict");
                    parent = self.store.get_parent(&parent.key).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
