//! Custom Resource Definitions for the ExposureClass Operator

mod exposure_class;
mod shoot;

pub use exposure_class::*;
pub use shoot::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![
        serde_yaml::to_string(&ExposureClass::crd())?,
        serde_yaml::to_string(&Shoot::crd())?,
    ])
}
