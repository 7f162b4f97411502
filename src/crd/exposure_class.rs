//! ExposureClass Custom Resource Definition

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ExposureClass resource specification
///
/// Cluster-scoped. Shoots opt into a class by name through
/// `spec.exposureClassName`; the operator keeps the class alive while any
/// Shoot still does so.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "core.oso.sh",
    version = "v1alpha1",
    kind = "ExposureClass",
    plural = "exposureclasses",
    singular = "exposureclass",
    shortname = "ec",
    printcolumn = r#"{"name": "Handler", "type": "string", "jsonPath": ".spec.handler"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExposureClassSpec {
    /// Name of the ingress handler exposing clusters of this class
    pub handler: String,

    /// Scheduling constraints for clusters using this class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<ExposureClassScheduling>,
}

/// Scheduling constraints of an ExposureClass
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposureClassScheduling {
    /// Seeds eligible to host clusters of this class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_selector: Option<SeedSelector>,
}

/// Label selector for seeds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedSelector {
    /// Labels a seed must carry
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}
