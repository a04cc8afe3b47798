//! Controller-specific error types.
//!
//! The taxonomy separates terminal spec errors (never retried until the
//! spec changes) from transient API failures (retried with capped backoff)
//! and internal invariant violations (requeued slowly, kept observable).

use crds::ValidationError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Application Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Malformed spec; terminal until the spec is edited
    #[error("invalid spec: {0}")]
    Validation(#[from] ValidationError),

    /// Kubernetes API error (conflict, throttling, unavailability)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Scan results not yet present for the declared image
    #[error("scan results unavailable: {0}")]
    ScanUnavailable(String),

    /// Finalizer processing failed
    #[error("finalizer error: {0}")]
    Finalizer(String),

    /// Watch stream failed or exited
    #[error("watch error: {0}")]
    Watch(String),

    /// Unexpected internal invariant violation
    #[error("internal invariant violation: {0}")]
    Fatal(String),
}

impl ControllerError {
    /// Transient errors are retried with capped backoff; everything else
    /// gets a long fixed requeue to stay observable without hot-looping.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ControllerError::Kube(_)
                | ControllerError::ScanUnavailable(_)
                | ControllerError::Finalizer(_)
        )
    }
}
