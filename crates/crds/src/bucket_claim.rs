//! BucketClaim CRD
//!
//! A request for an object-storage bucket, fulfilled by the platform's
//! bucket provisioner. Synthesized for Applications that enable object
//! storage; released explicitly by the Application finalizer because the
//! bucket itself lives outside the cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "shipyard.io",
    version = "v1alpha1",
    kind = "BucketClaim",
    namespaced,
    status = "BucketClaimStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimSpec {
    /// Bucket name to provision
    pub bucket_name: String,

    /// Storage quota as a Kubernetes quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_size: Option<String>,
}

/// Written by the bucket provisioner
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimStatus {
    /// Provisioning state
    #[serde(default)]
    pub state: BucketState,

    /// Endpoint of the provisioned bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Bucket provisioning state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum BucketState {
    /// Claim observed, bucket not yet provisioned
    #[default]
    Pending,

    /// Bucket exists and is usable
    Bound,

    /// Provisioning failed
    Failed,
}
