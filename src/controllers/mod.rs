//! Kubernetes controllers for the ExposureClass Operator
//!
//! This module contains the event plumbing that watches ExposureClasses and
//! Shoots and triggers reconciliation.

pub mod dispatcher;
mod exposure_class_controller;
mod work_queue;

pub use exposure_class_controller::run as run_exposure_class_controller;
pub use work_queue::{ExponentialBackoff, WorkQueue};

use std::sync::Arc;

use crate::config::OperatorConfig;
use crate::store::ObjectStore;

/// Shared context for all controllers
pub struct Context {
    /// Backing object store
    pub store: Arc<dyn ObjectStore>,
    /// Operator settings
    pub config: OperatorConfig,
}

impl Context {
    /// Create a new context
    pub fn new(store: Arc<dyn ObjectStore>, config: OperatorConfig) -> Self {
        Self { store, config }
    }
}
