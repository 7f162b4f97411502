//! Prometheus metrics for the ExposureClass Operator
//!
//! This module exposes metrics for monitoring operator health and reconcile
//! outcomes.

mod prometheus;

pub use prometheus::*;
