use super::workload::{autoscaler, deployment, desired_replicas};
use super::{names, MANAGED_BY};
use crate::test_utils::application;
use crds::{
    AuthConfig, HealthCheckConfig, ResourceList, ResourceRequirements, ScalingConfig,
    SecurityConfig, StorageConfig,
};

#[test]
fn deployment_carries_owner_reference_and_labels() {
    let app = application("web");
    let deploy = deployment(&app, true);

    let owners = deploy
        .metadata
        .owner_references
        .as_ref()
        .expect("owner references");
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "Application");
    assert_eq!(owners[0].name, "web");
    assert_eq!(owners[0].controller, Some(true));

    let labels = deploy.metadata.labels.as_ref().expect("labels");
    assert_eq!(labels.get("app").map(String::as_str), Some("web"));
    assert_eq!(
        labels
            .get("app.kubernetes.io/managed-by")
            .map(String::as_str),
        Some(MANAGED_BY)
    );
}

#[test]
fn blocked_admission_holds_replicas_at_zero() {
    let app = application("web");
    assert_eq!(desired_replicas(&app, false), Some(0));
    let deploy = deployment(&app, false);
    assert_eq!(deploy.spec.expect("spec").replicas, Some(0));
}

#[test]
fn admitted_deployment_uses_declared_replicas() {
    let mut app = application("web");
    app.spec.replicas = Some(3);
    assert_eq!(desired_replicas(&app, true), Some(3));

    app.spec.replicas = None;
    assert_eq!(desired_replicas(&app, true), Some(1));
}

#[test]
fn scaling_enabled_leaves_replicas_to_the_autoscaler() {
    let mut app = application("web");
    app.spec.scaling = Some(ScalingConfig {
        enabled: true,
        min_replicas: 2,
        max_replicas: 6,
        ..ScalingConfig::default()
    });
    assert_eq!(desired_replicas(&app, true), None);
    // A block still overrides scaling
    assert_eq!(desired_replicas(&app, false), Some(0));
}

#[test]
fn resource_floors_apply_when_spec_declares_none() {
    let app = application("web");
    let deploy = deployment(&app, true);
    let container = &deploy.spec.expect("spec").template.spec.expect("pod").containers[0];
    let resources = container.resources.as_ref().expect("resources");

    let requests = resources.requests.as_ref().expect("requests");
    assert_eq!(requests["cpu"].0, "100m");
    assert_eq!(requests["memory"].0, "128Mi");
    let limits = resources.limits.as_ref().expect("limits");
    assert_eq!(limits["cpu"].0, "500m");
    assert_eq!(limits["memory"].0, "512Mi");
}

#[test]
fn declared_resources_override_the_floors() {
    let mut app = application("web");
    app.spec.resources = Some(ResourceRequirements {
        requests: Some(ResourceList {
            cpu: Some("250m".to_string()),
            memory: None,
        }),
        limits: None,
    });
    let deploy = deployment(&app, true);
    let container = &deploy.spec.expect("spec").template.spec.expect("pod").containers[0];
    let requests = container
        .resources
        .as_ref()
        .expect("resources")
        .requests
        .as_ref()
        .expect("requests");
    assert_eq!(requests["cpu"].0, "250m");
    assert_eq!(requests["memory"].0, "128Mi");
}

#[test]
fn default_probes_target_health_on_the_container_port() {
    let app = application("web");
    let deploy = deployment(&app, true);
    let container = &deploy.spec.expect("spec").template.spec.expect("pod").containers[0];

    let liveness = container.liveness_probe.as_ref().expect("liveness");
    let http = liveness.http_get.as_ref().expect("http probe");
    assert_eq!(http.path.as_deref(), Some("/health"));
    assert_eq!(liveness.initial_delay_seconds, Some(30));

    let readiness = container.readiness_probe.as_ref().expect("readiness");
    assert_eq!(readiness.initial_delay_seconds, Some(5));
}

#[test]
fn disabled_health_check_removes_probes() {
    let mut app = application("web");
    app.spec.health_check = Some(HealthCheckConfig {
        enabled: false,
        ..HealthCheckConfig::default()
    });
    let deploy = deployment(&app, true);
    let container = &deploy.spec.expect("spec").template.spec.expect("pod").containers[0];
    assert!(container.liveness_probe.is_none());
    assert!(container.readiness_probe.is_none());
}

#[test]
fn hardening_defaults_apply_without_a_security_block() {
    let app = application("web");
    let deploy = deployment(&app, true);
    let pod = deploy.spec.expect("spec").template.spec.expect("pod");

    let pod_security = pod.security_context.as_ref().expect("pod security");
    assert_eq!(pod_security.run_as_non_root, Some(true));
    assert_eq!(pod_security.run_as_user, Some(1000));

    let container_security = pod.containers[0]
        .security_context
        .as_ref()
        .expect("container security");
    assert_eq!(container_security.read_only_root_filesystem, Some(true));
    assert_eq!(container_security.allow_privilege_escalation, Some(false));
    let caps = container_security.capabilities.as_ref().expect("caps");
    assert_eq!(caps.drop.as_deref(), Some(&["ALL".to_string()][..]));
}

#[test]
fn root_permitted_when_hardening_is_relaxed() {
    let mut app = application("web");
    app.spec.security = Some(SecurityConfig {
        run_as_non_root: false,
        ..SecurityConfig::default()
    });
    let deploy = deployment(&app, true);
    let pod = deploy.spec.expect("spec").template.spec.expect("pod");
    let pod_security = pod.security_context.as_ref().expect("pod security");
    assert_eq!(pod_security.run_as_non_root, Some(false));
    assert_eq!(pod_security.run_as_user, None);
}

#[test]
fn enabled_storage_mounts_the_claim() {
    let mut app = application("web");
    app.spec.storage = Some(StorageConfig {
        enabled: true,
        size: "10Gi".to_string(),
        mount_path: Some("/var/lib/app".to_string()),
        ..StorageConfig::default()
    });
    let deploy = deployment(&app, true);
    let pod = deploy.spec.expect("spec").template.spec.expect("pod");

    let volumes = pod.volumes.as_ref().expect("volumes");
    assert_eq!(
        volumes[0]
            .persistent_volume_claim
            .as_ref()
            .expect("pvc source")
            .claim_name,
        names::pvc("web")
    );

    let mounts = pod.containers[0].volume_mounts.as_ref().expect("mounts");
    assert_eq!(mounts[0].mount_path, "/var/lib/app");
}

#[test]
fn auth_requirements_ride_as_pod_annotations() {
    let mut app = application("web");
    app.spec.auth = Some(AuthConfig {
        enabled: true,
        required_roles: vec!["admin".to_string(), "ops".to_string()],
        required_groups: Vec::new(),
        public_paths: vec!["/healthz".to_string()],
    });
    let deploy = deployment(&app, true);
    let template_meta = deploy
        .spec
        .expect("spec")
        .template
        .metadata
        .expect("template metadata");
    let annotations = template_meta.annotations.expect("annotations");
    assert_eq!(
        annotations.get("auth.shipyard.io/required").map(String::as_str),
        Some("true")
    );
    assert_eq!(
        annotations
            .get("auth.shipyard.io/required-roles")
            .map(String::as_str),
        Some("admin,ops")
    );
    assert_eq!(
        annotations
            .get("auth.shipyard.io/public-paths")
            .map(String::as_str),
        Some("/healthz")
    );
}

#[test]
fn autoscaler_absent_unless_scaling_enabled() {
    let app = application("web");
    assert!(autoscaler(&app).is_none());

    let mut app = application("web");
    app.spec.scaling = Some(ScalingConfig {
        enabled: false,
        min_replicas: 1,
        max_replicas: 4,
        ..ScalingConfig::default()
    });
    assert!(autoscaler(&app).is_none());
}

#[test]
fn autoscaler_mirrors_bounds_and_targets() {
    let mut app = application("web");
    app.spec.scaling = Some(ScalingConfig {
        enabled: true,
        min_replicas: 2,
        max_replicas: 8,
        target_cpu_utilization: Some(65),
        target_memory_utilization: Some(70),
    });
    let hpa = autoscaler(&app).expect("autoscaler");
    let spec = hpa.spec.expect("spec");
    assert_eq!(spec.min_replicas, Some(2));
    assert_eq!(spec.max_replicas, 8);
    assert_eq!(spec.scale_target_ref.name, names::workload("web"));

    let metrics = spec.metrics.expect("metrics");
    assert_eq!(metrics.len(), 2);
    assert_eq!(
        metrics[0].resource.as_ref().expect("cpu metric").name,
        "cpu"
    );
}

#[test]
fn autoscaler_defaults_to_cpu_target_when_none_declared() {
    let mut app = application("web");
    app.spec.scaling = Some(ScalingConfig {
        enabled: true,
        min_replicas: 1,
        max_replicas: 4,
        ..ScalingConfig::default()
    });
    let hpa = autoscaler(&app).expect("autoscaler");
    let metrics = hpa.spec.expect("spec").metrics.expect("metrics");
    assert_eq!(metrics.len(), 1);
    let resource = metrics[0].resource.as_ref().expect("resource metric");
    assert_eq!(resource.name, "cpu");
    assert_eq!(resource.target.average_utilization, Some(80));
}
