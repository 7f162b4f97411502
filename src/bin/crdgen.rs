//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for all custom resources
//! used by the exposure-class-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use exposure_class_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
