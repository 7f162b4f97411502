//! Reconcilers for the ExposureClass Operator
//!
//! This module contains the finalizer protocol:
//! - `DependentIndex` answers whether Shoots still reference a class
//! - `FinalizerGuard` attaches and detaches the finalizer
//! - `ExposureClassReconciler` decides which of the two to do on each pass

mod dependent_index;
pub mod exposure_class;
mod finalizer_guard;

pub use dependent_index::DependentIndex;
pub use exposure_class::{ExposureClassReconciler, Outcome, FINALIZER_NAME};
pub use finalizer_guard::FinalizerGuard;
