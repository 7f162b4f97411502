//! OSO ExposureClass Kubernetes Operator
//!
//! This operator keeps ExposureClasses from being deleted while Shoots still
//! reference them, using a finalizer that is released once the last
//! reference is gone.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod store;
pub mod validation;

pub use error::{Error, Result};
