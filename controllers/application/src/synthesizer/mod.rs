//! Resource synthesizer.
//!
//! Pure mapping from a validated Application spec to the desired set of
//! downstream objects. No cluster reads, no side effects: the same spec
//! always yields the same object names, labels and owner references, which
//! is what makes reconciliation idempotent.
//!
//! Organized by concern:
//! - `workload`: Deployment and HorizontalPodAutoscaler
//! - `network`: Service, NetworkPolicy and Ingress
//! - `storage`: PersistentVolumeClaim and BucketClaim

pub mod network;
pub mod storage;
pub mod workload;

#[cfg(test)]
mod workload_test;

use crds::{Application, BucketClaim};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Field manager / managed-by value stamped on every synthesized object.
pub const MANAGED_BY: &str = "application-controller";

/// Deterministic names for the owned objects of an Application.
pub mod names {
    /// Deployment name
    #[must_use]
    pub fn workload(app: &str) -> String {
        app.to_string()
    }

    /// Service name
    #[must_use]
    pub fn service(app: &str) -> String {
        app.to_string()
    }

    /// PersistentVolumeClaim name
    #[must_use]
    pub fn pvc(app: &str) -> String {
        format!("{app}-pvc")
    }

    /// NetworkPolicy name
    #[must_use]
    pub fn network_policy(app: &str) -> String {
        format!("{app}-netpol")
    }

    /// HorizontalPodAutoscaler name
    #[must_use]
    pub fn autoscaler(app: &str) -> String {
        format!("{app}-hpa")
    }

    /// Ingress name
    #[must_use]
    pub fn ingress(app: &str) -> String {
        app.to_string()
    }

    /// BucketClaim name
    #[must_use]
    pub fn bucket_claim(app: &str) -> String {
        format!("{app}-bucket")
    }

    /// TLS secret name referenced by the Ingress
    #[must_use]
    pub fn tls_secret(app: &str) -> String {
        format!("{app}-tls")
    }
}

/// The complete desired object set for one Application.
///
/// Deployment and Service always exist; the rest follow their optional
/// config blocks. Storage and object storage are independent: either,
/// both or neither may be present.
#[derive(Debug, Clone)]
pub struct DesiredState {
    /// The workload
    pub deployment: Deployment,
    /// Cluster-local service targeting the container port
    pub service: Service,
    /// Block storage claim, when storage is enabled
    pub pvc: Option<PersistentVolumeClaim>,
    /// Object storage claim, when object storage is enabled
    pub bucket_claim: Option<BucketClaim>,
    /// Egress/ingress restrictions, when networking is configured
    pub network_policy: Option<NetworkPolicy>,
    /// Autoscaler, when scaling is enabled
    pub autoscaler: Option<HorizontalPodAutoscaler>,
    /// External route, when ingress is enabled
    pub ingress: Option<Ingress>,
}

/// Computes the desired object set for a validated Application.
///
/// `admitted` is the security gate's verdict: a blocked application still
/// gets its full object set for visibility, but the workload is held at
/// zero replicas.
#[must_use]
pub fn synthesize(app: &Application, admitted: bool) -> DesiredState {
    DesiredState {
        deployment: workload::deployment(app, admitted),
        service: network::service(app),
        pvc: storage::pvc(app),
        bucket_claim: storage::bucket_claim(app),
        network_policy: network::network_policy(app),
        autoscaler: workload::autoscaler(app),
        ingress: network::ingress(app),
    }
}

/// Selector labels, the stable identity of the pods.
pub(crate) fn selector_labels(app_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app_name.to_string())])
}

/// Full label set stamped on every synthesized object.
pub(crate) fn labels(app_name: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(app_name);
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels
}

/// Controller owner reference back to the Application.
///
/// The reconciler verifies the UID is present before synthesis runs, so
/// an empty UID here would be an upstream invariant violation.
pub(crate) fn owner_reference(app: &Application) -> OwnerReference {
    OwnerReference {
        api_version: Application::api_version(&()).to_string(),
        kind: Application::kind(&()).to_string(),
        name: app.name_any(),
        uid: app.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Common metadata for an owned object.
pub(crate) fn object_meta(app: &Application, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: app.namespace(),
        labels: Some(labels(&app.name_any())),
        owner_references: Some(vec![owner_reference(app)]),
        ..ObjectMeta::default()
    }
}
