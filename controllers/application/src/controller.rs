//! Main controller implementation.
//!
//! This module contains the `Controller` struct that orchestrates
//! reconciliation and resource watching for the Application Controller.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::synthesizer::MANAGED_BY;
use crate::watcher::Watcher;
use crds::{Application, BucketClaim, VulnerabilityReport};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use kube::{Api, Client};
use kube_runtime::events::{Recorder, Reporter};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Runtime configuration, resolved from the environment in `main`.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Namespace to watch; `None` falls back to `default`
    pub namespace: Option<String>,

    /// How long an Application may wait in Scanning before the fail
    /// policy resolves it
    pub scan_timeout: Duration,

    /// Admit when scan results never arrive (fail-open) instead of
    /// blocking (fail-closed, the default)
    pub fail_open: bool,
}

/// Main controller for Application lifecycle management.
pub struct Controller {
    application_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(settings: Settings) -> Result<Self, ControllerError> {
        info!("Initializing Application Controller");

        let client = Client::try_default().await.map_err(ControllerError::Kube)?;

        let ns = settings.namespace.clone().unwrap_or_else(|| "default".to_string());
        let application_api: Api<Application> = Api::namespaced(client.clone(), &ns);
        let report_api: Api<VulnerabilityReport> = Api::namespaced(client.clone(), &ns);
        let deployment_api: Api<Deployment> = Api::namespaced(client.clone(), &ns);
        let service_api: Api<Service> = Api::namespaced(client.clone(), &ns);
        let pvc_api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), &ns);
        let bucket_claim_api: Api<BucketClaim> = Api::namespaced(client.clone(), &ns);
        let network_policy_api: Api<NetworkPolicy> = Api::namespaced(client.clone(), &ns);
        let autoscaler_api: Api<HorizontalPodAutoscaler> = Api::namespaced(client.clone(), &ns);
        let ingress_api: Api<Ingress> = Api::namespaced(client.clone(), &ns);

        let reporter = Reporter {
            controller: MANAGED_BY.to_string(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        let recorder = Recorder::new(client.clone(), reporter);

        let reconciler = Arc::new(Reconciler::new(client, recorder, settings));

        let watcher_instance = Arc::new(Watcher::new(
            reconciler,
            application_api,
            report_api,
            deployment_api,
            service_api,
            pvc_api,
            bucket_claim_api,
            network_policy_api,
            autoscaler_api,
            ingress_api,
        ));

        let application_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_applications().await })
        };

        Ok(Self { application_watcher })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Application Controller running");

        let result = (&mut self.application_watcher).await;
        result
            .map_err(|e| ControllerError::Watch(format!("Application watcher panicked: {e}")))?
            .map_err(|e| ControllerError::Watch(format!("Application watcher error: {e}")))?;

        Ok(())
    }
}
