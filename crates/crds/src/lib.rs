//! Shipyard CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the application lifecycle
//! controller: the user-facing Application resource, the scanner-produced
//! VulnerabilityReport, and the BucketClaim consumed by the object-storage
//! provisioner.

pub mod application;
pub mod bucket_claim;
pub mod vulnerability_report;

pub use application::*;
pub use bucket_claim::*;
pub use vulnerability_report::*;
