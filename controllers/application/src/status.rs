//! Status aggregation.
//!
//! Pure computation of the Application status from the admission verdict
//! and the observed downstream objects. The reconciler writes the result
//! through the status subresource only when it differs from what is
//! already recorded, so a steady-state cluster sees no status churn.

use crate::gate::Severity;
use chrono::{DateTime, Utc};
use crds::{Application, ApplicationStatus, Condition, Endpoints, Phase, VulnerabilitySummary};
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;

/// Condition types carried on the Application.
pub const READY: &str = "Ready";
pub const PROGRESSING: &str = "Progressing";
pub const VULNERABILITY_BLOCKED: &str = "VulnerabilityBlocked";

/// Reason stamped on the Progressing condition while awaiting scan data.
/// The reconciler reads it back to find when scanning started.
pub const AWAITING_SCAN: &str = "AwaitingScanResults";

/// Final admission verdict for this reconcile pass, after the controller
/// has applied its fail-open/fail-closed policy to any unknown scan state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Workload may run
    Allowed,

    /// Workload held at zero replicas
    Blocked(BlockCause),

    /// Waiting for scan results, still within the timeout window
    ScanPending {
        /// Why no verdict exists yet
        reason: String,
    },

    /// Spec rejected by validation; terminal until edited
    Invalid {
        /// Validation failure detail
        message: String,
    },
}

/// Why admission was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockCause {
    /// Scan findings tripped the gate
    Vulnerabilities {
        /// Severity class that tripped it
        severity: Severity,
        /// Finding count at that severity
        count: i32,
    },

    /// Scan data never arrived and policy is fail-closed
    ScanUnavailable {
        /// Detail for the condition message
        reason: String,
    },
}

/// What the reconciler observed in the cluster this pass.
#[derive(Debug, Default)]
pub struct Observed {
    /// The owned Deployment, if it exists yet
    pub deployment: Option<Deployment>,

    /// Whether the owned Ingress exists
    pub ingress: bool,
}

/// Computes the full status for one reconcile pass.
///
/// `now` is injected so transition timestamps are deterministic under test;
/// existing conditions keep their `lastTransitionTime` unless the status
/// value actually flips.
#[must_use]
pub fn aggregate(
    app: &Application,
    admission: &Admission,
    observed: &Observed,
    scan: Option<VulnerabilitySummary>,
    now: DateTime<Utc>,
) -> ApplicationStatus {
    let previous = app.status.as_ref();
    let available = available_replicas(observed.deployment.as_ref());
    let phase = phase(app, admission, observed, available);

    let mut conditions = vec![
        ready_condition(phase, admission, now),
        progressing_condition(phase, admission, now),
    ];
    if let Some(blocked) = blocked_condition(admission, now) {
        conditions.push(blocked);
    } else if previous
        .map(|s| s.conditions.iter().any(|c| c.r#type == VULNERABILITY_BLOCKED))
        .unwrap_or(false)
    {
        // A cleared block flips the condition to False rather than vanishing
        conditions.push(Condition {
            r#type: VULNERABILITY_BLOCKED.to_string(),
            status: "False".to_string(),
            reason: "GatePassed".to_string(),
            message: "image passed the vulnerability gate".to_string(),
            last_transition_time: now,
        });
    }

    ApplicationStatus {
        phase,
        conditions: merge_conditions(
            previous.map(|s| s.conditions.as_slice()).unwrap_or(&[]),
            conditions,
        ),
        available_replicas: available,
        // Summaries persist after a block clears so operators can see what was found
        vulnerability_summary: scan.or_else(|| previous.and_then(|s| s.vulnerability_summary.clone())),
        endpoints: endpoints(app, observed),
    }
}

/// True when the computed status differs from what the resource carries.
#[must_use]
pub fn status_changed(app: &Application, next: &ApplicationStatus) -> bool {
    app.status.as_ref() != Some(next)
}

fn phase(
    app: &Application,
    admission: &Admission,
    observed: &Observed,
    available: i32,
) -> Phase {
    if app.metadata.deletion_timestamp.is_some() {
        return Phase::Terminating;
    }
    match admission {
        Admission::Invalid { .. } => Phase::Pending,
        Admission::ScanPending { .. } => Phase::Scanning,
        Admission::Blocked(_) => Phase::Blocked,
        Admission::Allowed => {
            // Ready means converged, which includes a deliberate scale to zero
            let desired = desired_replicas(app, observed);
            if available >= desired {
                return Phase::Ready;
            }
            // Degraded only ever follows Ready; a fresh rollout is Deploying
            let was_ready = app
                .status
                .as_ref()
                .is_some_and(|s| matches!(s.phase, Phase::Ready | Phase::Degraded));
            if was_ready && available < desired {
                Phase::Degraded
            } else {
                Phase::Deploying
            }
        }
    }
}

/// Replica target for readiness. When the autoscaler owns the count the
/// observed Deployment spec is authoritative.
fn desired_replicas(app: &Application, observed: &Observed) -> i32 {
    observed
        .deployment
        .as_ref()
        .and_then(|d| d.spec.as_ref())
        .and_then(|s| s.replicas)
        .unwrap_or_else(|| app.spec.replicas.unwrap_or(1))
}

fn available_replicas(deployment: Option<&Deployment>) -> i32 {
    deployment
        .and_then(|d| d.status.as_ref())
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
}

fn ready_condition(phase: Phase, admission: &Admission, now: DateTime<Utc>) -> Condition {
    let (status, reason, message) = match (phase, admission) {
        (Phase::Ready, _) => (
            "True",
            "ReplicasAvailable".to_string(),
            "all desired replicas are available".to_string(),
        ),
        (_, Admission::Invalid { message }) => {
            ("False", "InvalidSpec".to_string(), message.clone())
        }
        (Phase::Blocked, _) => (
            "False",
            "AdmissionDenied".to_string(),
            "deployment blocked by the security gate".to_string(),
        ),
        (Phase::Degraded, _) => (
            "False",
            "ReplicasUnavailable".to_string(),
            "available replicas fell below the desired count".to_string(),
        ),
        _ => (
            "False",
            "NotReady".to_string(),
            "workload has not reached the desired state".to_string(),
        ),
    };
    Condition {
        r#type: READY.to_string(),
        status: status.to_string(),
        reason,
        message,
        last_transition_time: now,
    }
}

fn progressing_condition(phase: Phase, admission: &Admission, now: DateTime<Utc>) -> Condition {
    let (status, reason, message) = match (phase, admission) {
        (Phase::Scanning, Admission::ScanPending { reason }) => {
            ("True", AWAITING_SCAN.to_string(), reason.clone())
        }
        (Phase::Deploying, _) => (
            "True",
            "RollingOut".to_string(),
            "converging toward the desired replica count".to_string(),
        ),
        (_, Admission::Invalid { .. }) => (
            "False",
            "InvalidSpec".to_string(),
            "spec rejected, nothing to roll out until it is edited".to_string(),
        ),
        _ => (
            "False",
            "Stable".to_string(),
            "no rollout in progress".to_string(),
        ),
    };
    Condition {
        r#type: PROGRESSING.to_string(),
        status: status.to_string(),
        reason,
        message,
        last_transition_time: now,
    }
}

fn blocked_condition(admission: &Admission, now: DateTime<Utc>) -> Option<Condition> {
    let Admission::Blocked(cause) = admission else {
        return None;
    };
    let (reason, message) = match cause {
        BlockCause::Vulnerabilities { severity, count } => (
            "VulnerabilitiesFound".to_string(),
            format!("scan found {count} {} vulnerabilities", severity.as_str()),
        ),
        BlockCause::ScanUnavailable { reason } => {
            ("ScanUnavailable".to_string(), reason.clone())
        }
    };
    Some(Condition {
        r#type: VULNERABILITY_BLOCKED.to_string(),
        status: "True".to_string(),
        reason,
        message,
        last_transition_time: now,
    })
}

/// Merges newly computed conditions with what the resource already carries.
///
/// A condition whose status and reason are both unchanged keeps its
/// previous transition timestamp; the message still refreshes. A reason
/// change marks a different wait even under the same status value (e.g.
/// Progressing staying True while a rollout hands over to a scan), and the
/// scan timeout is measured from that timestamp, so it must move.
fn merge_conditions(previous: &[Condition], desired: Vec<Condition>) -> Vec<Condition> {
    desired
        .into_iter()
        .map(|mut condition| {
            if let Some(prior) = previous.iter().find(|p| p.r#type == condition.r#type) {
                if prior.status == condition.status && prior.reason == condition.reason {
                    condition.last_transition_time = prior.last_transition_time;
                }
            }
            condition
        })
        .collect()
}

fn endpoints(app: &Application, observed: &Observed) -> Option<Endpoints> {
    let namespace = app.namespace()?;
    let name = app.name_any();
    let internal = format!("{name}.{namespace}.svc.cluster.local:{}", app.spec.port);
    let external = observed
        .ingress
        .then(|| {
            app.spec
                .ingress
                .as_ref()
                .filter(|i| i.enabled)
                .map(|i| format!("https://{}", i.hostname))
        })
        .flatten();
    Some(Endpoints { internal, external })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::application;
    use chrono::TimeZone;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    fn deployment_with(desired: i32, available: i32) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(desired),
                ..DeploymentSpec::default()
            }),
            status: Some(DeploymentStatus {
                available_replicas: Some(available),
                ..DeploymentStatus::default()
            }),
            ..Deployment::default()
        }
    }

    #[test]
    fn allowed_with_full_availability_is_ready() {
        let app = application("web");
        let observed = Observed {
            deployment: Some(deployment_with(2, 2)),
            ingress: false,
        };
        let status = aggregate(&app, &Admission::Allowed, &observed, None, at(1));

        assert_eq!(status.phase, Phase::Ready);
        assert_eq!(status.available_replicas, 2);
        let ready = status.conditions.iter().find(|c| c.r#type == READY).unwrap();
        assert_eq!(ready.status, "True");
    }

    #[test]
    fn scaled_to_zero_application_is_ready() {
        let mut app = application("web");
        app.spec.replicas = Some(0);
        let observed = Observed {
            deployment: Some(deployment_with(0, 0)),
            ingress: false,
        };
        let status = aggregate(&app, &Admission::Allowed, &observed, None, at(1));

        assert_eq!(status.phase, Phase::Ready);
        let progressing = status
            .conditions
            .iter()
            .find(|c| c.r#type == PROGRESSING)
            .unwrap();
        assert_eq!(progressing.status, "False");
        assert_eq!(progressing.reason, "Stable");
    }

    #[test]
    fn allowed_below_target_is_deploying_before_first_ready() {
        let app = application("web");
        let observed = Observed {
            deployment: Some(deployment_with(2, 1)),
            ingress: false,
        };
        let status = aggregate(&app, &Admission::Allowed, &observed, None, at(1));
        assert_eq!(status.phase, Phase::Deploying);
    }

    #[test]
    fn availability_loss_after_ready_is_degraded() {
        let mut app = application("web");
        let observed = Observed {
            deployment: Some(deployment_with(2, 2)),
            ingress: false,
        };
        app.status = Some(aggregate(&app, &Admission::Allowed, &observed, None, at(1)));

        let observed = Observed {
            deployment: Some(deployment_with(2, 1)),
            ingress: false,
        };
        let status = aggregate(&app, &Admission::Allowed, &observed, None, at(2));
        assert_eq!(status.phase, Phase::Degraded);
    }

    #[test]
    fn scan_pending_is_scanning_with_progressing_marker() {
        let app = application("web");
        let status = aggregate(
            &app,
            &Admission::ScanPending {
                reason: "no scan results for image".to_string(),
            },
            &Observed::default(),
            None,
            at(1),
        );
        assert_eq!(status.phase, Phase::Scanning);
        let progressing = status
            .conditions
            .iter()
            .find(|c| c.r#type == PROGRESSING)
            .unwrap();
        assert_eq!(progressing.status, "True");
        assert_eq!(progressing.reason, AWAITING_SCAN);
    }

    #[test]
    fn scan_wait_is_timed_from_the_scan_handover_not_the_rollout() {
        let mut app = application("web");
        let observed = Observed {
            deployment: Some(deployment_with(2, 1)),
            ingress: false,
        };
        // Rollout in progress: Progressing=True/RollingOut since t1
        app.status = Some(aggregate(&app, &Admission::Allowed, &observed, None, at(1)));

        // Image edit hands over to the scanner: still True, new reason,
        // so the timestamp must restart the wait
        let status = aggregate(
            &app,
            &Admission::ScanPending {
                reason: "no scan results for image".to_string(),
            },
            &Observed::default(),
            None,
            at(2),
        );
        let progressing = status
            .conditions
            .iter()
            .find(|c| c.r#type == PROGRESSING)
            .unwrap();
        assert_eq!(progressing.status, "True");
        assert_eq!(progressing.reason, AWAITING_SCAN);
        assert_eq!(progressing.last_transition_time, at(2));

        // Further scan-pending passes keep the scan start
        app.status = Some(status);
        let later = aggregate(
            &app,
            &Admission::ScanPending {
                reason: "no scan results for image".to_string(),
            },
            &Observed::default(),
            None,
            at(3),
        );
        let progressing = later
            .conditions
            .iter()
            .find(|c| c.r#type == PROGRESSING)
            .unwrap();
        assert_eq!(progressing.last_transition_time, at(2));
    }

    #[test]
    fn block_raises_the_vulnerability_condition() {
        let app = application("web");
        let admission = Admission::Blocked(BlockCause::Vulnerabilities {
            severity: Severity::Critical,
            count: 3,
        });
        let status = aggregate(&app, &admission, &Observed::default(), None, at(1));

        assert_eq!(status.phase, Phase::Blocked);
        let blocked = status
            .conditions
            .iter()
            .find(|c| c.r#type == VULNERABILITY_BLOCKED)
            .unwrap();
        assert_eq!(blocked.status, "True");
        assert!(blocked.message.contains("3 critical"));
    }

    #[test]
    fn cleared_block_flips_the_condition_to_false() {
        let mut app = application("web");
        let admission = Admission::Blocked(BlockCause::Vulnerabilities {
            severity: Severity::Critical,
            count: 1,
        });
        app.status = Some(aggregate(&app, &admission, &Observed::default(), None, at(1)));

        let observed = Observed {
            deployment: Some(deployment_with(2, 2)),
            ingress: false,
        };
        let status = aggregate(&app, &Admission::Allowed, &observed, None, at(2));
        let blocked = status
            .conditions
            .iter()
            .find(|c| c.r#type == VULNERABILITY_BLOCKED)
            .unwrap();
        assert_eq!(blocked.status, "False");
        assert_eq!(blocked.last_transition_time, at(2));
    }

    #[test]
    fn transition_time_moves_only_on_status_flips() {
        let mut app = application("web");
        let observed = Observed {
            deployment: Some(deployment_with(2, 2)),
            ingress: false,
        };
        app.status = Some(aggregate(&app, &Admission::Allowed, &observed, None, at(1)));

        // Same state later: timestamp must not move
        let unchanged = aggregate(&app, &Admission::Allowed, &observed, None, at(2));
        let ready = unchanged.conditions.iter().find(|c| c.r#type == READY).unwrap();
        assert_eq!(ready.last_transition_time, at(1));
        assert!(!status_changed(&app, &unchanged));

        // Availability loss flips Ready: timestamp moves
        app.status = Some(unchanged);
        let degraded_observed = Observed {
            deployment: Some(deployment_with(2, 0)),
            ingress: false,
        };
        let flipped = aggregate(&app, &Admission::Allowed, &degraded_observed, None, at(3));
        let ready = flipped.conditions.iter().find(|c| c.r#type == READY).unwrap();
        assert_eq!(ready.status, "False");
        assert_eq!(ready.last_transition_time, at(3));
        assert!(status_changed(&app, &flipped));
    }

    #[test]
    fn invalid_spec_is_pending_with_reason() {
        let app = application("web");
        let status = aggregate(
            &app,
            &Admission::Invalid {
                message: "spec.port must be in 1..=65535, got 0".to_string(),
            },
            &Observed::default(),
            None,
            at(1),
        );
        assert_eq!(status.phase, Phase::Pending);
        let ready = status.conditions.iter().find(|c| c.r#type == READY).unwrap();
        assert_eq!(ready.reason, "InvalidSpec");

        let progressing = status
            .conditions
            .iter()
            .find(|c| c.r#type == PROGRESSING)
            .unwrap();
        assert_eq!(progressing.status, "False");
        assert_eq!(progressing.reason, "InvalidSpec");
    }

    #[test]
    fn deletion_timestamp_forces_terminating() {
        let mut app = application("web");
        app.metadata.deletion_timestamp = Some(Time(at(1)));
        let status = aggregate(&app, &Admission::Allowed, &Observed::default(), None, at(1));
        assert_eq!(status.phase, Phase::Terminating);
    }

    #[test]
    fn endpoints_include_external_only_when_routed() {
        let mut app = application("web");
        let status = aggregate(&app, &Admission::Allowed, &Observed::default(), None, at(1));
        let endpoints = status.endpoints.expect("endpoints");
        assert_eq!(endpoints.internal, "web.default.svc.cluster.local:8080");
        assert!(endpoints.external.is_none());

        app.spec.ingress = Some(crds::IngressConfig {
            enabled: true,
            hostname: "web.example.com".to_string(),
            ..crds::IngressConfig::default()
        });
        let observed = Observed {
            deployment: None,
            ingress: true,
        };
        let status = aggregate(&app, &Admission::Allowed, &observed, None, at(1));
        assert_eq!(
            status.endpoints.expect("endpoints").external.as_deref(),
            Some("https://web.example.com")
        );
    }

    #[test]
    fn scan_summary_persists_after_the_block_clears() {
        let mut app = application("web");
        let summary = VulnerabilitySummary {
            critical: 2,
            ..VulnerabilitySummary::default()
        };
        let admission = Admission::Blocked(BlockCause::Vulnerabilities {
            severity: Severity::Critical,
            count: 2,
        });
        app.status = Some(aggregate(
            &app,
            &admission,
            &Observed::default(),
            Some(summary),
            at(1),
        ));

        let status = aggregate(&app, &Admission::Allowed, &Observed::default(), None, at(2));
        assert_eq!(
            status.vulnerability_summary.map(|s| s.critical),
            Some(2)
        );
    }
}
