//! Kubernetes resource watchers.
//!
//! Wires the reconciler into `kube_runtime::Controller`: the Application
//! stream is the trigger, owned objects requeue their owner on change, and
//! VulnerabilityReports map back to every Application declaring the scanned
//! image so a fresh scan clears or raises a block without polling.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{Application, BucketClaim, VulnerabilityReport};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use kube::Api;
use kube_runtime::controller::Config as ControllerConfig;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Watches Application resources and everything that should wake them.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    application_api: Api<Application>,
    report_api: Api<VulnerabilityReport>,
    deployment_api: Api<Deployment>,
    service_api: Api<Service>,
    pvc_api: Api<PersistentVolumeClaim>,
    bucket_claim_api: Api<BucketClaim>,
    network_policy_api: Api<NetworkPolicy>,
    autoscaler_api: Api<HorizontalPodAutoscaler>,
    ingress_api: Api<Ingress>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        application_api: Api<Application>,
        report_api: Api<VulnerabilityReport>,
        deployment_api: Api<Deployment>,
        service_api: Api<Service>,
        pvc_api: Api<PersistentVolumeClaim>,
        bucket_claim_api: Api<BucketClaim>,
        network_policy_api: Api<NetworkPolicy>,
        autoscaler_api: Api<HorizontalPodAutoscaler>,
        ingress_api: Api<Ingress>,
    ) -> Self {
        Self {
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
        }
    }

    /// Runs the Application controller loop until shutdown.
    ///
    /// Debounce batches the burst of ownership events a single reconcile
    /// produces; concurrency bounds parallel reconciles against the API
    /// server.
    pub async fn watch_applications(&self) -> Result<(), ControllerError> {
        info!("Starting Application watcher");

        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(5))
            .concurrency(3);

        let controller = Controller::new(self.application_api.clone(), watcher::Config::default());

        // Reports carry no owner reference; match them to Applications by
        // the exact image they scanned.
        let store = controller.store();
        let map_report = move |report: VulnerabilityReport| {
            let image = report.spec.image.clone();
            store
                .state()
                .into_iter()
                .filter(|app| app.spec.image == image)
                .map(|app| ObjectRef::from_obj(app.as_ref()))
                .collect::<Vec<_>>()
        };

        controller
            .owns(self.deployment_api.clone(), watcher::Config::default())
            .owns(self.service_api.clone(), watcher::Config::default())
            .owns(self.pvc_api.clone(), watcher::Config::default())
            .owns(self.bucket_claim_api.clone(), watcher::Config::default())
            .owns(self.network_policy_api.clone(), watcher::Config::default())
            .owns(self.autoscaler_api.clone(), watcher::Config::default())
            .owns(self.ingress_api.clone(), watcher::Config::default())
            .watches(
                self.report_api.clone(),
                watcher::Config::default(),
                map_report,
            )
            .with_config(controller_config)
            .shutdown_on_signal()
            .run(
                Reconciler::reconcile,
                Reconciler::error_policy,
                self.reconciler.clone(),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => debug!("Reconciled Application {:?}", obj),
                    Err(e) => error!("Controller error for Application: {}", e),
                }
            })
            .await;

        Ok(())
    }
}
