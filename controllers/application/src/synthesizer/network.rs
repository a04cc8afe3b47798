//! Network synthesis: Service, NetworkPolicy and Ingress.

use super::{names, object_meta, selector_labels};
use crds::Application;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, IPBlock, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, NetworkPolicy, NetworkPolicyEgressRule,
    NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec,
    ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Builds the cluster-local Service.
///
/// The Service always targets the declared container port; external
/// routing goes through the Ingress to the Service port, never straight
/// to the container.
#[must_use]
pub fn service(app: &Application) -> Service {
    let name = app.name_any();
    Service {
        metadata: object_meta(app, names::service(&name)),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&name)),
            ports: Some(vec![ServicePort {
                port: app.spec.port,
                target_port: Some(IntOrString::Int(app.spec.port)),
                protocol: Some("TCP".to_string()),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        status: None,
    }
}

/// Builds the NetworkPolicy, only when a networking block is declared.
///
/// No block means no policy at all (platform default posture), which is
/// deliberately distinct from a block that allows everything.
#[must_use]
pub fn network_policy(app: &Application) -> Option<NetworkPolicy> {
    let networking = app.spec.networking.as_ref()?;
    let name = app.name_any();

    // DNS egress is always required for the pod to function
    let mut egress = vec![NetworkPolicyEgressRule {
        ports: Some(vec![NetworkPolicyPort {
            protocol: Some("UDP".to_string()),
            port: Some(IntOrString::Int(53)),
            ..NetworkPolicyPort::default()
        }]),
        ..NetworkPolicyEgressRule::default()
    }];

    if networking.allow_internet_egress {
        egress.push(NetworkPolicyEgressRule {
            to: Some(vec![NetworkPolicyPeer {
                ip_block: Some(IPBlock {
                    cidr: "0.0.0.0/0".to_string(),
                    except: None,
                }),
                ..NetworkPolicyPeer::default()
            }]),
            ..NetworkPolicyEgressRule::default()
        });
    }

    if !networking.allowed_egress_cidrs.is_empty() || !networking.allowed_egress_ports.is_empty() {
        let to = (!networking.allowed_egress_cidrs.is_empty()).then(|| {
            networking
                .allowed_egress_cidrs
                .iter()
                .map(|cidr| NetworkPolicyPeer {
                    ip_block: Some(IPBlock {
                        cidr: cidr.clone(),
                        except: None,
                    }),
                    ..NetworkPolicyPeer::default()
                })
                .collect()
        });
        let ports = (!networking.allowed_egress_ports.is_empty()).then(|| {
            networking
                .allowed_egress_ports
                .iter()
                .map(|port| NetworkPolicyPort {
                    protocol: Some("TCP".to_string()),
                    port: Some(IntOrString::Int(*port)),
                    ..NetworkPolicyPort::default()
                })
                .collect()
        });
        egress.push(NetworkPolicyEgressRule {
            to,
            ports,
            ..NetworkPolicyEgressRule::default()
        });
    }

    let ingress = networking
        .allow_ingress_from
        .iter()
        .map(|namespace| NetworkPolicyIngressRule {
            from: Some(vec![NetworkPolicyPeer {
                namespace_selector: Some(LabelSelector {
                    match_labels: Some(BTreeMap::from([(
                        "kubernetes.io/metadata.name".to_string(),
                        namespace.clone(),
                    )])),
                    ..LabelSelector::default()
                }),
                ..NetworkPolicyPeer::default()
            }]),
            ..NetworkPolicyIngressRule::default()
        })
        .collect();

    Some(NetworkPolicy {
        metadata: object_meta(app, names::network_policy(&name)),
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(LabelSelector {
                match_labels: Some(selector_labels(&name)),
                ..LabelSelector::default()
            }),
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
            ingress: Some(ingress),
            egress: Some(egress),
        }),
    })
}

/// Builds the Ingress routing the declared hostname to the Service port.
#[must_use]
pub fn ingress(app: &Application) -> Option<Ingress> {
    let config = app.spec.ingress.as_ref().filter(|i| i.enabled)?;
    let name = app.name_any();

    let paths: Vec<String> = if config.paths.is_empty() {
        vec!["/".to_string()]
    } else {
        config.paths.clone()
    };

    let http_paths = paths
        .into_iter()
        .map(|path| HTTPIngressPath {
            path: Some(path),
            path_type: "Prefix".to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: names::service(&name),
                    port: Some(ServiceBackendPort {
                        number: Some(app.spec.port),
                        name: None,
                    }),
                }),
                ..IngressBackend::default()
            },
        })
        .collect();

    let tls = config.tls.then(|| {
        vec![IngressTLS {
            hosts: Some(vec![config.hostname.clone()]),
            secret_name: Some(names::tls_secret(&name)),
        }]
    });

    let mut meta = object_meta(app, names::ingress(&name));
    meta.annotations = edge_annotations(app);

    Some(Ingress {
        metadata: meta,
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(config.hostname.clone()),
                http: Some(HTTPIngressRuleValue { paths: http_paths }),
            }]),
            tls,
            ..IngressSpec::default()
        }),
        status: None,
    })
}

/// Rate-limit and CORS policy carried as edge annotations.
fn edge_annotations(app: &Application) -> Option<BTreeMap<String, String>> {
    let config = app.spec.ingress.as_ref()?;
    let mut annotations = BTreeMap::new();

    if let Some(rate_limit) = config.rate_limit.as_ref().filter(|r| r.enabled) {
        if let Some(rps) = rate_limit.requests_per_second.filter(|rps| *rps > 0) {
            annotations.insert(
                "nginx.ingress.kubernetes.io/limit-rps".to_string(),
                rps.to_string(),
            );
            if let Some(burst) = rate_limit.burst_size {
                // nginx expresses burst as a multiplier of the sustained rate
                let multiplier = (burst + rps - 1) / rps;
                annotations.insert(
                    "nginx.ingress.kubernetes.io/limit-burst-multiplier".to_string(),
                    multiplier.max(1).to_string(),
                );
            }
        }
    }

    if let Some(cors) = config.cors.as_ref().filter(|c| c.enabled) {
        annotations.insert(
            "nginx.ingress.kubernetes.io/enable-cors".to_string(),
            "true".to_string(),
        );
        if !cors.allow_origins.is_empty() {
            annotations.insert(
                "nginx.ingress.kubernetes.io/cors-allow-origin".to_string(),
                cors.allow_origins.join(", "),
            );
        }
        if !cors.allow_methods.is_empty() {
            annotations.insert(
                "nginx.ingress.kubernetes.io/cors-allow-methods".to_string(),
                cors.allow_methods.join(", "),
            );
        }
        if !cors.allow_headers.is_empty() {
            annotations.insert(
                "nginx.ingress.kubernetes.io/cors-allow-headers".to_string(),
                cors.allow_headers.join(", "),
            );
        }
    }

    (!annotations.is_empty()).then_some(annotations)
}
