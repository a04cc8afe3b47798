//! Prints the installable CRD manifests for all Shipyard resources as a
//! single multi-document YAML stream, suitable for `kubectl apply -f -`.

use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let manifests = [
        serde_yaml::to_string(&crds::Application::crd())?,
        serde_yaml::to_string(&crds::VulnerabilityReport::crd())?,
        serde_yaml::to_string(&crds::BucketClaim::crd())?,
    ];
    println!("{}", manifests.join("---\n"));
    Ok(())
}
