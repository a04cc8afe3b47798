//! Security admission gate.
//!
//! Evaluates vulnerability-scan results for the declared image against the
//! Application's gating flags. The gate is stateless and side-effect-free:
//! it never triggers a scan, and the fail-open/fail-closed policy for
//! missing scan data belongs to the controller, not here.

use crds::{SecurityConfig, VulnerabilityReport, VulnerabilitySummary};
use kube::api::{Api, ListParams};

/// Admission decision for a declared image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Image may be deployed
    Allow,

    /// Deployment blocked by the triggering severity and finding count
    Block {
        /// Severity class that tripped the gate
        severity: Severity,
        /// Number of findings at that severity
        count: i32,
    },

    /// No scan data available; caller policy decides what happens
    Unknown {
        /// Why no decision could be made
        reason: String,
    },
}

/// Severity classes the gate can block on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Critical findings
    Critical,
    /// High findings
    High,
}

impl Severity {
    /// Human-readable form used in conditions and events.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
        }
    }
}

/// Evaluates the gating flags against the most recent scan summary.
///
/// Critical findings are checked before high findings, so an image failing
/// both gates reports the critical count.
#[must_use]
pub fn evaluate(
    security: Option<&SecurityConfig>,
    scan: Option<&VulnerabilitySummary>,
) -> GateDecision {
    let Some(security) = security else {
        return GateDecision::Allow;
    };
    if !security.scan_on_deploy {
        return GateDecision::Allow;
    }

    let Some(scan) = scan else {
        return GateDecision::Unknown {
            reason: "no scan results for image".to_string(),
        };
    };

    if security.block_critical_vulns && scan.critical > 0 {
        return GateDecision::Block {
            severity: Severity::Critical,
            count: scan.critical,
        };
    }
    if security.block_high_vulns && scan.high > 0 {
        return GateDecision::Block {
            severity: Severity::High,
            count: scan.high,
        };
    }

    GateDecision::Allow
}

/// Picks the most recent report for an exact image reference.
#[must_use]
pub fn newest_report_for_image<'a>(
    reports: impl IntoIterator<Item = &'a VulnerabilityReport>,
    image: &str,
) -> Option<&'a VulnerabilityReport> {
    reports
        .into_iter()
        .filter(|report| report.spec.image == image)
        .max_by_key(|report| report.spec.scan_time)
}

/// Converts a scanner report into the summary carried in Application status.
#[must_use]
pub fn summarize(report: &VulnerabilityReport) -> VulnerabilitySummary {
    VulnerabilitySummary {
        critical: report.spec.critical,
        high: report.spec.high,
        medium: report.spec.medium,
        low: report.spec.low,
        last_scan_time: Some(report.spec.scan_time),
    }
}

/// Fetches the latest scan summary for the image, if any report exists.
pub async fn latest_scan(
    api: &Api<VulnerabilityReport>,
    image: &str,
) -> Result<Option<VulnerabilitySummary>, kube::Error> {
    let reports = api.list(&ListParams::default()).await?;
    Ok(newest_report_for_image(reports.items.iter(), image).map(summarize))
}
