//! Adapters between the operator's object store and the Kubernetes API

mod kube_store;

pub use kube_store::*;
