//! Event dispatcher
//!
//! Turns watch events on ExposureClasses and Shoots into queued
//! ExposureClass identities.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::controllers::WorkQueue;
use crate::metrics;
use crate::store::{DependentObject, ObjectKey, ParentObject, WatchEvent, WatchStream};

/// Last parent reference seen per dependent
///
/// Watches deliver only the new state of a dependent; the tracker supplies
/// the old one so a parent that just lost a reference gets reconciled too.
#[derive(Debug, Default)]
pub struct ReferenceTracker {
    references: HashMap<ObjectKey, ObjectKey>,
}

impl ReferenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parents affected by `event`, old reference first, without duplicates
    pub fn observe(&mut self, event: &WatchEvent<DependentObject>) -> Vec<ObjectKey> {
        let mut affected = Vec::with_capacity(2);
        match event {
            WatchEvent::Applied(dependent) => {
                let previous = match &dependent.parent {
                    Some(parent) => self
                        .references
                        .insert(dependent.key.clone(), parent.clone()),
                    None => self.references.remove(&dependent.key),
                };
                affected.extend(previous);
                if let Some(parent) = &dependent.parent {
                    if !affected.contains(parent) {
                        affected.push(parent.clone());
                    }
                }
            }
            WatchEvent::Deleted(dependent) => {
                let previous = self.references.remove(&dependent.key);
                affected.extend(previous);
                if let Some(parent) = &dependent.parent {
                    if !affected.contains(parent) {
                        affected.push(parent.clone());
                    }
                }
            }
        }
        affected
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

/// Queue every ExposureClass that changes
pub async fn dispatch_parent_events(
    mut events: WatchStream<ParentObject>,
    queue: Arc<WorkQueue<ObjectKey>>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.next() => event,
        };
        match event {
            Some(Ok(event)) => {
                let key = event.object().key.clone();
                debug!(name = %key, "ExposureClass changed");
                queue.add(key);
            }
            Some(Err(e)) => {
                warn!(error = %e, "ExposureClass watch error");
                metrics::WATCH_ERRORS.with_label_values(&["ExposureClass"]).inc();
            }
            None => {
                warn!("ExposureClass watch ended");
                break;
            }
        }
    }
}

/// Queue the ExposureClasses a changed Shoot referenced before and after
pub async fn dispatch_dependent_events(
    mut events: WatchStream<DependentObject>,
    queue: Arc<WorkQueue<ObjectKey>>,
    shutdown: CancellationToken,
) {
    let mut tracker = ReferenceTracker::new();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.next() => event,
        };
        match event {
            Some(Ok(event)) => {
                for parent in tracker.observe(&event) {
                    debug!(name = %parent, shoot = %event.object().key, "Shoot reference changed");
                    queue.add(parent);
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Shoot watch error");
                metrics::WATCH_ERRORS.with_label_values(&["Shoot"]).inc();
            }
            None => {
                warn!("Shoot watch ended");
                break;
            }
        }
    }
}
