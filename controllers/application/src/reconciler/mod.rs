//! Reconciliation logic for the Application CRD.
//!
//! Each pass runs the same level-triggered pipeline: validate the spec,
//! evaluate the security gate, synthesize the desired object set, converge
//! the cluster onto it, then aggregate and record status. The pass never
//! depends on which event woke it up.

pub mod apply;


use crate::backoff::FibonacciBackoff;
use crate::controller::Settings;
use crate::error::ControllerError;
use crate::gate::{self, GateDecision};
use crate::status::{self, Admission, BlockCause, Observed, AWAITING_SCAN, PROGRESSING};
use crate::synthesizer::{self, names};
use chrono::Utc;
use crds::{Application, ApplicationStatus, BucketClaim, Phase, VulnerabilityReport};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::events::{Event, EventType, Recorder};
use kube_runtime::finalizer::{finalizer, Error as FinalizerError, Event as FinalizerEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Finalizer guarding cleanup of claims the garbage collector cannot reach.
pub const FINALIZER: &str = "shipyard.io/cleanup";

/// Backoff bounds for transient errors, in seconds.
const BACKOFF_MIN_SECONDS: u64 = 5;
const BACKOFF_MAX_SECONDS: u64 = 300;

/// Fixed slow requeue for fatal errors, so a broken resource stays
/// observable without hot-looping.
const FATAL_REQUEUE: Duration = Duration::from_secs(600);

/// Reconciles Application resources.
pub struct Reconciler {
    pub(crate) client: Client,
    pub(crate) recorder: Recorder,
    pub(crate) settings: Settings,
    /// Consecutive transient-error count per resource (namespace/name)
    error_counts: Mutex<HashMap<String, u32>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(client: Client, recorder: Recorder, settings: Settings) -> Self {
        Self {
            client,
            recorder,
            settings,
            error_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Entry point invoked by the controller runtime for every Application
    /// event. Wraps the apply/cleanup split in finalizer handling.
    pub async fn reconcile(
        app: Arc<Application>,
        ctx: Arc<Reconciler>,
    ) -> Result<Action, ControllerError> {
        let namespace = app
            .namespace()
            .ok_or_else(|| ControllerError::Fatal("Application without a namespace".to_string()))?;
        let api: Api<Application> = Api::namespaced(ctx.client.clone(), &namespace);

        finalizer(&api, FINALIZER, app, |event| async {
            match event {
                FinalizerEvent::Apply(app) => ctx.apply(app, &namespace).await,
                FinalizerEvent::Cleanup(app) => ctx.cleanup(app, &namespace).await,
            }
        })
        .await
        .map_err(unwrap_finalizer_error)
    }

    /// Error policy invoked by the controller runtime.
    pub fn error_policy(
        app: Arc<Application>,
        error: &ControllerError,
        ctx: Arc<Reconciler>,
    ) -> Action {
        let key = resource_key(&app);
        if !error.is_transient() {
            error!("Fatal reconcile error for Application {}: {}", key, error);
            return Action::requeue(FATAL_REQUEUE);
        }

        let count = ctx.increment_errors(&key);
        let delay = FibonacciBackoff::calculate_for_error_count(
            count,
            BACKOFF_MIN_SECONDS,
            BACKOFF_MAX_SECONDS,
        );
        warn!(
            "Transient reconcile error for Application {} (attempt {}), retrying in {:?}: {}",
            key, count, delay, error
        );
        Action::requeue(delay)
    }

    /// The forward reconcile pass.
    async fn apply(&self, app: Arc<Application>, namespace: &str) -> Result<Action, ControllerError> {
        let name = app.name_any();
        let Some(uid) = app.uid() else {
            return Err(ControllerError::Fatal(format!(
                "Application {namespace}/{name} has no uid"
            )));
        };
        debug!("Reconciling Application {}/{}", namespace, name);

        // Terminal until the spec is edited; no retry, no backoff
        if let Err(validation) = app.spec.validate() {
            let error = ControllerError::Validation(validation);
            warn!(
                "Application {}/{} rejected: {}",
                namespace, name, error
            );
            let admission = Admission::Invalid {
                message: error.to_string(),
            };
            let next = status::aggregate(&app, &admission, &Observed::default(), None, Utc::now());
            self.patch_status(namespace, &name, next).await?;
            self.publish(&app, EventType::Warning, "InvalidSpec", error.to_string())
                .await;
            return Ok(Action::await_change());
        }

        let reports: Api<VulnerabilityReport> = Api::namespaced(self.client.clone(), namespace);
        // A failing report list is scan unavailability, not a generic API
        // error; it retries on the same backoff but stays distinguishable
        let scan = gate::latest_scan(&reports, &app.spec.image)
            .await
            .map_err(|e| ControllerError::ScanUnavailable(e.to_string()))?;
        let decision = gate::evaluate(app.spec.security.as_ref(), scan.as_ref());
        let admission = self.resolve_admission(&app, decision);
        let admitted = matches!(admission, Admission::Allowed);

        let desired = synthesizer::synthesize(&app, admitted);

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let bucket_claims: Api<BucketClaim> = Api::namespaced(self.client.clone(), namespace);
        let network_policies: Api<NetworkPolicy> = Api::namespaced(self.client.clone(), namespace);
        let autoscalers: Api<HorizontalPodAutoscaler> =
            Api::namespaced(self.client.clone(), namespace);
        let ingresses: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);

        apply::apply_object(&deployments, &desired.deployment).await?;
        apply::apply_object(&services, &desired.service).await?;

        match &desired.pvc {
            Some(pvc) => apply::apply_object(&pvcs, pvc).await?,
            None => apply::prune_object(&pvcs, &names::pvc(&name), &uid).await?,
        }
        match &desired.bucket_claim {
            Some(claim) => apply::apply_object(&bucket_claims, claim).await?,
            None => apply::prune_object(&bucket_claims, &names::bucket_claim(&name), &uid).await?,
        }
        match &desired.network_policy {
            Some(policy) => apply::apply_object(&network_policies, policy).await?,
            None => {
                apply::prune_object(&network_policies, &names::network_policy(&name), &uid).await?;
            }
        }
        match &desired.autoscaler {
            Some(hpa) => apply::apply_object(&autoscalers, hpa).await?,
            None => apply::prune_object(&autoscalers, &names::autoscaler(&name), &uid).await?,
        }
        match &desired.ingress {
            Some(ingress) => apply::apply_object(&ingresses, ingress).await?,
            None => apply::prune_object(&ingresses, &names::ingress(&name), &uid).await?,
        }

        let observed = Observed {
            deployment: deployments.get_opt(&names::workload(&name)).await?,
            ingress: ingresses.get_opt(&names::ingress(&name)).await?.is_some(),
        };

        let previous_phase = app.status.as_ref().map(|s| s.phase);
        let next = status::aggregate(&app, &admission, &observed, scan, Utc::now());
        let phase = next.phase;
        if status::status_changed(&app, &next) {
            self.patch_status(namespace, &name, next).await?;
        }

        if previous_phase != Some(phase) {
            self.publish_transition(&app, phase, &admission).await;
        }

        self.reset_errors(&resource_key(&app));
        Ok(requeue_for(phase))
    }

    /// Finalizer cleanup: the BucketClaim outlives garbage collection on
    /// some provisioners, so it is deleted explicitly before the
    /// Application is released.
    async fn cleanup(
        &self,
        app: Arc<Application>,
        namespace: &str,
    ) -> Result<Action, ControllerError> {
        let name = app.name_any();
        info!("Cleaning up Application {}/{}", namespace, name);

        let bucket_claims: Api<BucketClaim> = Api::namespaced(self.client.clone(), namespace);
        match bucket_claims
            .delete(&names::bucket_claim(&name), &DeleteParams::default())
            .await
        {
            Ok(_) => info!("Deleted BucketClaim for {}/{}", namespace, name),
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(ControllerError::Kube(e)),
        }

        self.publish(
            &app,
            EventType::Normal,
            "Cleanup",
            format!("released resources for {name}"),
        )
        .await;
        Ok(Action::await_change())
    }

    /// Applies the scan-wait policy to the raw gate decision.
    ///
    /// An unknown verdict stays `ScanPending` until the configured timeout,
    /// then resolves by policy: fail-open admits with a warning, fail-closed
    /// blocks as scan-unavailable.
    fn resolve_admission(&self, app: &Application, decision: GateDecision) -> Admission {
        match decision {
            GateDecision::Allow => Admission::Allowed,
            GateDecision::Block { severity, count } => {
                Admission::Blocked(BlockCause::Vulnerabilities { severity, count })
            }
            GateDecision::Unknown { reason } => {
                if !self.scan_wait_expired(app) {
                    return Admission::ScanPending { reason };
                }
                let waited = self.settings.scan_timeout.as_secs();
                if self.settings.fail_open {
                    warn!(
                        "No scan verdict for {} within {}s, admitting by fail-open policy",
                        app.name_any(),
                        waited
                    );
                    Admission::Allowed
                } else {
                    Admission::Blocked(BlockCause::ScanUnavailable {
                        reason: format!("no scan verdict within {waited}s ({reason})"),
                    })
                }
            }
        }
    }

    /// How long this Application has been waiting on scan results, judged
    /// from the Progressing condition raised when scanning started, falling
    /// back to the creation timestamp.
    fn scan_wait_expired(&self, app: &Application) -> bool {
        let since = app
            .status
            .as_ref()
            .and_then(|s| {
                s.conditions
                    .iter()
                    .find(|c| c.r#type == PROGRESSING && c.reason == AWAITING_SCAN)
                    .map(|c| c.last_transition_time)
            })
            .or_else(|| app.creation_timestamp().map(|t| t.0));
        let Some(since) = since else {
            return false;
        };
        match (Utc::now() - since).to_std() {
            Ok(elapsed) => elapsed >= self.settings.scan_timeout,
            Err(_) => false,
        }
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        next: ApplicationStatus,
    ) -> Result<(), ControllerError> {
        let api: Api<Application> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": next });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("Patched status of Application {}/{}", namespace, name);
        Ok(())
    }

    async fn publish_transition(&self, app: &Application, phase: Phase, admission: &Admission) {
        let (event_type, reason, note) = match (phase, admission) {
            (Phase::Blocked, Admission::Blocked(BlockCause::Vulnerabilities { severity, count })) => (
                EventType::Warning,
                "DeploymentBlocked",
                format!("scan found {count} {} vulnerabilities", severity.as_str()),
            ),
            (Phase::Blocked, Admission::Blocked(BlockCause::ScanUnavailable { reason })) => (
                EventType::Warning,
                "DeploymentBlocked",
                reason.clone(),
            ),
            (Phase::Scanning, _) => (
                EventType::Normal,
                "AwaitingScan",
                format!("waiting for scan results for {}", app.spec.image),
            ),
            (Phase::Ready, _) => (
                EventType::Normal,
                "Ready",
                "all desired replicas are available".to_string(),
            ),
            (Phase::Degraded, _) => (
                EventType::Warning,
                "Degraded",
                "available replicas fell below the desired count".to_string(),
            ),
            (phase, _) => (
                EventType::Normal,
                "PhaseChanged",
                format!("entered phase {}", phase.as_str()),
            ),
        };
        self.publish(app, event_type, reason, note).await;
    }

    /// Publishes a Kubernetes event; failures are logged, never propagated,
    /// since events are best-effort.
    async fn publish(&self, app: &Application, type_: EventType, reason: &str, note: String) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &app.object_ref(&())).await {
            warn!("Failed to publish event for {}: {}", resource_key(app), e);
        }
    }

    fn increment_errors(&self, key: &str) -> u32 {
        let mut counts = self
            .error_counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn reset_errors(&self, key: &str) {
        let mut counts = self
            .error_counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counts.remove(key);
    }
}

/// Requeue policy per phase. Ready resources are event-driven only; the
/// waiting phases poll at intervals matched to how fast they can resolve.
fn requeue_for(phase: Phase) -> Action {
    match phase {
        Phase::Scanning => Action::requeue(Duration::from_secs(30)),
        Phase::Blocked => Action::requeue(Duration::from_secs(300)),
        Phase::Deploying | Phase::Degraded => Action::requeue(Duration::from_secs(60)),
        Phase::Pending | Phase::Ready | Phase::Terminating => Action::await_change(),
    }
}

fn resource_key(app: &Application) -> String {
    format!(
        "{}/{}",
        app.namespace().unwrap_or_default(),
        app.name_any()
    )
}

/// Unwraps the finalizer wrapper so the error policy sees the original
/// classification: a fatal invariant violation inside apply/cleanup must
/// stay fatal, not retry as a transient finalizer failure.
fn unwrap_finalizer_error(error: FinalizerError<ControllerError>) -> ControllerError {
    match error {
        FinalizerError::ApplyFailed(inner) | FinalizerError::CleanupFailed(inner) => inner,
        other => ControllerError::Finalizer(other.to_string()),
    }
}
