//! VulnerabilityReport CRD
//!
//! Scan results written by the external image scanner and read by the
//! security gate. This controller never creates or mutates these objects;
//! it only selects the most recent report for an exact image reference.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "shipyard.io",
    version = "v1alpha1",
    kind = "VulnerabilityReport",
    namespaced,
    shortname = "vulnreport"
)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityReportSpec {
    /// Exact image reference the scan ran against
    pub image: String,

    /// Critical findings
    #[serde(default)]
    pub critical: i32,

    /// High findings
    #[serde(default)]
    pub high: i32,

    /// Medium findings
    #[serde(default)]
    pub medium: i32,

    /// Low findings
    #[serde(default)]
    pub low: i32,

    /// When the scan completed
    pub scan_time: chrono::DateTime<chrono::Utc>,
}
