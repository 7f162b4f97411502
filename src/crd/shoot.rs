//! Shoot Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Shoot resource specification
///
/// Only the fields the operator reads or validates are modelled here.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "core.oso.sh",
    version = "v1alpha1",
    kind = "Shoot",
    plural = "shoots",
    singular = "shoot",
    namespaced,
    printcolumn = r#"{"name": "Region", "type": "string", "jsonPath": ".spec.region"}"#,
    printcolumn = r#"{"name": "Exposure Class", "type": "string", "jsonPath": ".spec.exposureClassName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShootSpec {
    /// Cloud profile the cluster is created from
    pub cloud_profile_name: String,

    /// Provider region
    pub region: String,

    /// Binding to the provider account secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_binding_name: Option<String>,

    /// Name of the ExposureClass this cluster is exposed through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_class_name: Option<String>,
}
