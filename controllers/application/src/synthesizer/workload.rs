//! Workload synthesis: Deployment and HorizontalPodAutoscaler.

use super::{names, object_meta, selector_labels};
use crds::{Application, HealthCheckConfig, SecurityConfig};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec, MetricSpec,
    MetricTarget, ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, HTTPGetAction, PersistentVolumeClaimVolumeSource,
    PodSecurityContext, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SeccompProfile,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Scheduling floor applied when the spec declares no resources, so
/// workloads never schedule unbounded.
const CPU_REQUEST_FLOOR: &str = "100m";
const MEMORY_REQUEST_FLOOR: &str = "128Mi";
const CPU_LIMIT_FLOOR: &str = "500m";
const MEMORY_LIMIT_FLOOR: &str = "512Mi";

/// UID the container runs as when non-root is required.
const NON_ROOT_UID: i64 = 1000;

/// Data volume name used for the storage mount.
const DATA_VOLUME: &str = "data";

/// Builds the Deployment for an Application.
///
/// A blocked admission forces the replica count to zero: the object stays
/// visible in the cluster but schedules no pods. When scaling is enabled
/// the replica field is omitted entirely so the autoscaler owns it and
/// server-side apply never fights over the live count.
#[must_use]
pub fn deployment(app: &Application, admitted: bool) -> Deployment {
    let name = app.name_any();
    let security = app.spec.security.clone().unwrap_or_default();

    let mut container = Container {
        name: "app".to_string(),
        image: Some(app.spec.image.clone()),
        ports: Some(vec![ContainerPort {
            container_port: app.spec.port,
            protocol: Some("TCP".to_string()),
            ..ContainerPort::default()
        }]),
        env: env_vars(app),
        resources: Some(container_resources(app)),
        security_context: Some(SecurityContext {
            run_as_non_root: Some(security.run_as_non_root),
            read_only_root_filesystem: Some(security.read_only_root_filesystem),
            allow_privilege_escalation: Some(security.allow_privilege_escalation),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Capabilities::default()
            }),
            ..SecurityContext::default()
        }),
        ..Container::default()
    };

    if let Some((liveness, readiness)) = probes(app) {
        container.liveness_probe = Some(liveness);
        container.readiness_probe = Some(readiness);
    }

    let mut volumes = None;
    if let Some(storage) = &app.spec.storage {
        if storage.enabled {
            let mount_path = storage
                .mount_path
                .clone()
                .unwrap_or_else(|| "/data".to_string());
            container.volume_mounts = Some(vec![VolumeMount {
                name: DATA_VOLUME.to_string(),
                mount_path,
                ..VolumeMount::default()
            }]);
            volumes = Some(vec![Volume {
                name: DATA_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: names::pvc(&name),
                    ..PersistentVolumeClaimVolumeSource::default()
                }),
                ..Volume::default()
            }]);
        }
    }

    Deployment {
        metadata: object_meta(app, names::workload(&name)),
        spec: Some(DeploymentSpec {
            replicas: desired_replicas(app, admitted),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name)),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(super::labels(&name)),
                    annotations: pod_annotations(app),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    security_context: Some(pod_security_context(&security)),
                    containers: vec![container],
                    volumes,
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        status: None,
    }
}

/// Replica count carried on the Deployment.
///
/// `None` means the field is left unmanaged (autoscaler-owned).
#[must_use]
pub fn desired_replicas(app: &Application, admitted: bool) -> Option<i32> {
    if !admitted {
        return Some(0);
    }
    if app.spec.scaling.as_ref().is_some_and(|s| s.enabled) {
        return None;
    }
    Some(app.spec.replicas.unwrap_or(1))
}

/// Builds the autoscaler when scaling is enabled.
///
/// Min/max mirror the spec bounds exactly; if no utilization target is
/// declared, CPU at 80% is used so the autoscaler always has a signal.
#[must_use]
pub fn autoscaler(app: &Application) -> Option<HorizontalPodAutoscaler> {
    let scaling = app.spec.scaling.as_ref().filter(|s| s.enabled)?;
    let name = app.name_any();

    let mut metrics = Vec::new();
    if let Some(cpu) = scaling.target_cpu_utilization {
        metrics.push(utilization_metric("cpu", cpu));
    }
    if let Some(memory) = scaling.target_memory_utilization {
        metrics.push(utilization_metric("memory", memory));
    }
    if metrics.is_empty() {
        metrics.push(utilization_metric("cpu", 80));
    }

    Some(HorizontalPodAutoscaler {
        metadata: object_meta(app, names::autoscaler(&name)),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: names::workload(&name),
            },
            min_replicas: Some(scaling.min_replicas),
            max_replicas: scaling.max_replicas,
            metrics: Some(metrics),
            ..HorizontalPodAutoscalerSpec::default()
        }),
        status: None,
    })
}

fn utilization_metric(resource: &str, target: i32) -> MetricSpec {
    MetricSpec {
        type_: "Resource".to_string(),
        resource: Some(ResourceMetricSource {
            name: resource.to_string(),
            target: MetricTarget {
                type_: "Utilization".to_string(),
                average_utilization: Some(target),
                ..MetricTarget::default()
            },
        }),
        ..MetricSpec::default()
    }
}

fn env_vars(app: &Application) -> Option<Vec<EnvVar>> {
    if app.spec.env.is_empty() {
        return None;
    }
    Some(
        app.spec
            .env
            .iter()
            .map(|var| EnvVar {
                name: var.name.clone(),
                value: Some(var.value.clone()),
                value_from: None,
            })
            .collect(),
    )
}

fn container_resources(app: &Application) -> ResourceRequirements {
    let declared = app.spec.resources.clone().unwrap_or_default();
    let requests = declared.requests.unwrap_or_default();
    let limits = declared.limits.unwrap_or_default();

    ResourceRequirements {
        requests: Some(quantities(
            requests.cpu.as_deref().unwrap_or(CPU_REQUEST_FLOOR),
            requests.memory.as_deref().unwrap_or(MEMORY_REQUEST_FLOOR),
        )),
        limits: Some(quantities(
            limits.cpu.as_deref().unwrap_or(CPU_LIMIT_FLOOR),
            limits.memory.as_deref().unwrap_or(MEMORY_LIMIT_FLOOR),
        )),
        ..ResourceRequirements::default()
    }
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

fn pod_security_context(security: &SecurityConfig) -> PodSecurityContext {
    PodSecurityContext {
        run_as_non_root: Some(security.run_as_non_root),
        run_as_user: security.run_as_non_root.then_some(NON_ROOT_UID),
        seccomp_profile: security.seccomp_profile.as_ref().map(|profile| SeccompProfile {
            type_: profile.clone(),
            localhost_profile: None,
        }),
        ..PodSecurityContext::default()
    }
}

/// SSO requirements ride on the pod as annotations for the auth proxy.
fn pod_annotations(app: &Application) -> Option<BTreeMap<String, String>> {
    let auth = app.spec.auth.as_ref().filter(|a| a.enabled)?;
    let mut annotations = BTreeMap::from([(
        "auth.shipyard.io/required".to_string(),
        "true".to_string(),
    )]);
    if !auth.required_roles.is_empty() {
        annotations.insert(
            "auth.shipyard.io/required-roles".to_string(),
            auth.required_roles.join(","),
        );
    }
    if !auth.required_groups.is_empty() {
        annotations.insert(
            "auth.shipyard.io/required-groups".to_string(),
            auth.required_groups.join(","),
        );
    }
    if !auth.public_paths.is_empty() {
        annotations.insert(
            "auth.shipyard.io/public-paths".to_string(),
            auth.public_paths.join(","),
        );
    }
    Some(annotations)
}

/// Probe pair from the health-check block.
///
/// An absent block gets the platform defaults; an explicitly disabled
/// block gets no probes at all.
fn probes(app: &Application) -> Option<(Probe, Probe)> {
    let defaults = HealthCheckConfig {
        enabled: true,
        ..HealthCheckConfig::default()
    };
    let check = app.spec.health_check.as_ref().unwrap_or(&defaults);
    if !check.enabled {
        return None;
    }

    let path = check.path.clone().unwrap_or_else(|| "/health".to_string());
    let port = check.port.unwrap_or(app.spec.port);
    let period = check.period_seconds.unwrap_or(10);
    let timeout = check.timeout_seconds.unwrap_or(5);
    let failures = check.failure_threshold.unwrap_or(3);

    let http_get = HTTPGetAction {
        path: Some(path),
        port: IntOrString::Int(port),
        ..HTTPGetAction::default()
    };

    let liveness = Probe {
        http_get: Some(http_get.clone()),
        initial_delay_seconds: Some(check.initial_delay_seconds.unwrap_or(30)),
        period_seconds: Some(period),
        timeout_seconds: Some(timeout),
        failure_threshold: Some(failures),
        ..Probe::default()
    };
    // Readiness probes start early so traffic shifts as soon as the app is up
    let readiness = Probe {
        http_get: Some(http_get),
        initial_delay_seconds: Some(5),
        period_seconds: Some(period),
        timeout_seconds: Some(timeout),
        failure_threshold: Some(failures),
        ..Probe::default()
    };

    Some((liveness, readiness))
}
