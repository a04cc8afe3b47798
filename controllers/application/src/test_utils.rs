//! Shared builders for unit tests.

use crds::{Application, ApplicationSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Minimal valid Application with metadata a live watch would carry.
pub fn application(name: &str) -> Application {
    let mut app = Application::new(
        name,
        ApplicationSpec {
            image: "registry.local/demo:1.0".to_string(),
            replicas: Some(2),
            port: 8080,
            env: Vec::new(),
            resources: None,
            security: None,
            auth: None,
            storage: None,
            object_storage: None,
            ingress: None,
            networking: None,
            health_check: None,
            scaling: None,
        },
    );
    app.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        uid: Some("11111111-2222-3333-4444-555555555555".to_string()),
        ..ObjectMeta::default()
    };
    app
}
