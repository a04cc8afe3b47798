//! Application CRD
//!
//! The declarative root resource of the platform: a user (or an upstream
//! deployer service) declares the desired shape of a containerized
//! application, and the controller converges the cluster onto it.
//!
//! The spec is split into independently optional configuration blocks
//! (storage, object storage, ingress, networking, scaling). Absence of a
//! block means "not configured", which is distinct from a block configured
//! with permissive values.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "shipyard.io",
    version = "v1alpha1",
    kind = "Application",
    namespaced,
    status = "ApplicationStatus",
    shortname = "app"
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Container image reference (required)
    pub image: String,

    /// Desired replica count. Advisory only when scaling is enabled;
    /// the autoscaler then owns the live count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Container port the workload listens on (required)
    pub port: i32,

    /// Environment variables injected into the container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// CPU/memory requests and limits. Defaults to the platform floor
    /// when unset so workloads never schedule unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Scan gating and pod hardening flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityConfig>,

    /// SSO requirement and path exceptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    /// Persistent block storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    /// Object storage bucket claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_storage: Option<ObjectStorageConfig>,

    /// External HTTP routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressConfig>,

    /// Egress/ingress network restrictions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking: Option<NetworkingConfig>,

    /// Liveness/readiness probe configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckConfig>,

    /// Horizontal autoscaling bounds and targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<ScalingConfig>,
}

/// A single environment variable
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,

    /// Literal value
    #[serde(default)]
    pub value: String,
}

/// CPU/memory requests and limits
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Scheduling requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,

    /// Hard limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,
}

/// CPU and memory quantities as Kubernetes quantity strings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    /// CPU quantity, e.g. "100m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory quantity, e.g. "128Mi"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Vulnerability-scan gating and pod hardening flags
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Require a scan verdict before admitting the image
    #[serde(default)]
    pub scan_on_deploy: bool,

    /// Block deployment when the scan reports critical vulnerabilities
    #[serde(default)]
    pub block_critical_vulns: bool,

    /// Block deployment when the scan reports high vulnerabilities
    #[serde(default)]
    pub block_high_vulns: bool,

    /// Run the container as a non-root user
    #[serde(default = "default_true")]
    pub run_as_non_root: bool,

    /// Mount the root filesystem read-only
    #[serde(default = "default_true")]
    pub read_only_root_filesystem: bool,

    /// Permit privilege escalation (defaults to false)
    #[serde(default)]
    pub allow_privilege_escalation: bool,

    /// Seccomp profile type, e.g. "RuntimeDefault"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp_profile: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            scan_on_deploy: true,
            block_critical_vulns: true,
            block_high_vulns: false,
            run_as_non_root: true,
            read_only_root_filesystem: true,
            allow_privilege_escalation: false,
            seccomp_profile: Some("RuntimeDefault".to_string()),
        }
    }
}

fn default_true() -> bool {
    true
}

/// SSO requirement consumed by the platform's auth proxy
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Require authenticated access
    #[serde(default)]
    pub enabled: bool,

    /// Roles the caller must hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_roles: Vec<String>,

    /// Groups the caller must belong to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_groups: Vec<String>,

    /// Paths exempt from authentication
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_paths: Vec<String>,
}

/// Persistent block storage request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Provision a PersistentVolumeClaim for this application
    #[serde(default)]
    pub enabled: bool,

    /// Requested capacity as a Kubernetes quantity, e.g. "10Gi"
    #[serde(default)]
    pub size: String,

    /// StorageClass to provision from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Container mount path (defaults to /data)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,

    /// Access mode: ReadWriteOnce (default), ReadWriteMany or ReadOnlyMany
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<String>,
}

/// Object storage bucket request, fulfilled by the platform provisioner
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageConfig {
    /// Claim a bucket for this application
    #[serde(default)]
    pub enabled: bool,

    /// Bucket name (defaults to the application name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,

    /// Storage quota as a Kubernetes quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_size: Option<String>,
}

/// External HTTP routing through the cluster ingress
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    /// Route external traffic to this application
    #[serde(default)]
    pub enabled: bool,

    /// Public hostname
    #[serde(default)]
    pub hostname: String,

    /// Terminate TLS for the hostname
    #[serde(default)]
    pub tls: bool,

    /// HTTP path prefixes to route (defaults to "/")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,

    /// Request rate limiting at the edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    /// Cross-origin resource sharing policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsConfig>,
}

/// Edge rate limiting
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default)]
    pub enabled: bool,

    /// Sustained request rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<i32>,

    /// Burst allowance above the sustained rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<i32>,
}

/// CORS policy applied at the edge
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CorsConfig {
    /// Enable CORS headers
    #[serde(default)]
    pub enabled: bool,

    /// Allowed origins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_origins: Vec<String>,

    /// Allowed methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,

    /// Allowed headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,
}

/// Egress/ingress restrictions expressed as a NetworkPolicy.
///
/// When this block is absent no policy is synthesized at all; the
/// application inherits the platform default posture.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingConfig {
    /// Allow unrestricted internet egress
    #[serde(default)]
    pub allow_internet_egress: bool,

    /// Egress allowed only on these ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_egress_ports: Vec<i32>,

    /// Egress allowed only to these CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_egress_cidrs: Vec<String>,

    /// Namespaces allowed to reach this application
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_ingress_from: Vec<String>,
}

/// HTTP probe configuration for liveness/readiness
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Attach probes to the container
    #[serde(default)]
    pub enabled: bool,

    /// Probe path (defaults to /health)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Probe port (defaults to the container port)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Seconds before the first probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,

    /// Seconds between probes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,

    /// Probe timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,

    /// Failures before the container is considered unhealthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
}

/// Horizontal autoscaling bounds and utilization targets
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfig {
    /// Synthesize a HorizontalPodAutoscaler for the workload
    #[serde(default)]
    pub enabled: bool,

    /// Lower replica bound (> 0)
    #[serde(default)]
    pub min_replicas: i32,

    /// Upper replica bound (>= minReplicas)
    #[serde(default)]
    pub max_replicas: i32,

    /// Target average CPU utilization percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_cpu_utilization: Option<i32>,

    /// Target average memory utilization percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_memory_utilization: Option<i32>,
}

/// Observed state, written only by the controller via the status subresource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    /// Coarse lifecycle phase
    #[serde(default)]
    pub phase: Phase,

    /// Typed, timestamped health assertions; at most one entry per type.
    /// `lastTransitionTime` moves only when the status value or reason changes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Ready replica count reported by the owned workload
    #[serde(default)]
    pub available_replicas: i32,

    /// Counts from the most recent scan evaluation, kept after a block clears
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerability_summary: Option<VulnerabilitySummary>,

    /// Cluster-local and (if routed) external addresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Endpoints>,
}

/// Application lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum Phase {
    /// Observed, no admission decision yet
    #[default]
    Pending,

    /// Waiting for scan results for the declared image
    Scanning,

    /// Admission denied by the security gate; workload held at zero replicas
    Blocked,

    /// Admitted, converging toward the desired replica count
    Deploying,

    /// Available replicas meet the desired count
    Ready,

    /// Previously Ready, now below the desired count
    Degraded,

    /// Deletion in progress, finalizer cleanup running
    Terminating,
}

impl Phase {
    /// String form matching the serialized wire value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Scanning => "Scanning",
            Phase::Blocked => "Blocked",
            Phase::Deploying => "Deploying",
            Phase::Ready => "Ready",
            Phase::Degraded => "Degraded",
            Phase::Terminating => "Terminating",
        }
    }
}

/// A typed, timestamped boolean assertion about resource health
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. "Ready", "Progressing", "VulnerabilityBlocked"
    pub r#type: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    /// Machine-readable reason for the last transition
    #[serde(default)]
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,

    /// When the status or reason last changed (not when it was last observed)
    pub last_transition_time: chrono::DateTime<chrono::Utc>,
}

/// Severity counts from the most recent vulnerability scan
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilitySummary {
    /// Critical findings
    #[serde(default)]
    pub critical: i32,

    /// High findings
    #[serde(default)]
    pub high: i32,

    /// Medium findings
    #[serde(default)]
    pub medium: i32,

    /// Low findings
    #[serde(default)]
    pub low: i32,

    /// When the scan producing these counts ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Where the application can be reached
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    /// Cluster-local address, `<name>.<namespace>.svc.cluster.local:<port>`
    #[serde(default)]
    pub internal: String,

    /// External URL, present only when ingress routing is active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
}

/// Spec rejection reasons. Terminal until the spec is edited; the
/// controller surfaces these as a condition and does not retry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Image reference is required
    #[error("spec.image must not be empty")]
    EmptyImage,

    /// Port outside the valid TCP range
    #[error("spec.port must be in 1..=65535, got {0}")]
    InvalidPort(i32),

    /// Negative replica count
    #[error("spec.replicas must be >= 0, got {0}")]
    NegativeReplicas(i32),

    /// Storage enabled without a usable size
    #[error("spec.storage.size {0:?} is not a positive quantity")]
    InvalidStorageSize(String),

    /// Scaling bounds are inverted or non-positive
    #[error("spec.scaling requires 0 < minReplicas <= maxReplicas, got min={min} max={max}")]
    InvalidScalingBounds {
        /// Declared lower bound
        min: i32,
        /// Declared upper bound
        max: i32,
    },

    /// Ingress enabled without a hostname
    #[error("spec.ingress.hostname must not be empty when ingress is enabled")]
    MissingHostname,
}

impl ApplicationSpec {
    /// Validates the declared intent before any synthesis runs.
    ///
    /// The synthesizer is total over validated input, so every structural
    /// rejection lives here.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.image.trim().is_empty() {
            return Err(ValidationError::EmptyImage);
        }
        if self.port < 1 || self.port > 65535 {
            return Err(ValidationError::InvalidPort(self.port));
        }
        if let Some(replicas) = self.replicas {
            if replicas < 0 {
                return Err(ValidationError::NegativeReplicas(replicas));
            }
        }
        if let Some(storage) = &self.storage {
            if storage.enabled && !is_positive_quantity(&storage.size) {
                return Err(ValidationError::InvalidStorageSize(storage.size.clone()));
            }
        }
        if let Some(scaling) = &self.scaling {
            if scaling.enabled
                && (scaling.min_replicas <= 0 || scaling.min_replicas > scaling.max_replicas)
            {
                return Err(ValidationError::InvalidScalingBounds {
                    min: scaling.min_replicas,
                    max: scaling.max_replicas,
                });
            }
        }
        if let Some(ingress) = &self.ingress {
            if ingress.enabled && ingress.hostname.trim().is_empty() {
                return Err(ValidationError::MissingHostname);
            }
        }
        Ok(())
    }
}

/// Checks that a string parses as a positive Kubernetes quantity:
/// a non-zero decimal number with an optional binary/decimal SI suffix.
fn is_positive_quantity(value: &str) -> bool {
    const SUFFIXES: [&str; 11] = [
        "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "k", "M", "G", "T", "P",
    ];
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    let number = SUFFIXES
        .iter()
        .find_map(|suffix| trimmed.strip_suffix(suffix))
        .unwrap_or(trimmed);
    match number.parse::<f64>() {
        Ok(parsed) => parsed > 0.0,
        Err(_) => false,
    }
}
