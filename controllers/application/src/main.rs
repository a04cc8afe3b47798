//! Application Controller
//!
//! Converges the cluster onto declared Application resources:
//! - Synthesizes the owned object set (Deployment, Service, claims,
//!   policies, routing) from each spec
//! - Gates admission on vulnerability-scan results for the declared image
//! - Aggregates phase, conditions and endpoints into the status
//!   subresource
//!
//! Reconciliation is level-triggered and idempotent; manual drift in owned
//! objects is corrected on the next pass.

mod backoff;
mod controller;
mod error;
mod gate;
mod reconciler;
mod status;
mod synthesizer;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::controller::{Controller, Settings};
use crate::error::ControllerError;
use std::env;
use std::time::Duration;
use tracing::info;

/// Default seconds an Application may wait for scan results.
const DEFAULT_SCAN_TIMEOUT_SECONDS: u64 = 600;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting Application Controller");

    // Load configuration from environment variables
    let namespace = env::var("WATCH_NAMESPACE").ok();
    let scan_timeout_seconds = env::var("SCAN_TIMEOUT_SECONDS")
        .ok()
        .map(|raw| {
            raw.parse::<u64>().map_err(|_| {
                ControllerError::Fatal(format!(
                    "SCAN_TIMEOUT_SECONDS must be a number of seconds, got {raw:?}"
                ))
            })
        })
        .transpose()?
        .unwrap_or(DEFAULT_SCAN_TIMEOUT_SECONDS);
    let fail_open = env::var("SCAN_FAIL_OPEN")
        .map(|raw| raw.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    info!("Configuration:");
    info!("  Namespace: {}", namespace.as_deref().unwrap_or("default"));
    info!("  Scan timeout: {}s", scan_timeout_seconds);
    info!(
        "  Scan policy: {}",
        if fail_open { "fail-open" } else { "fail-closed" }
    );

    let settings = Settings {
        namespace,
        scan_timeout: Duration::from_secs(scan_timeout_seconds),
        fail_open,
    };

    // Initialize and run controller
    let controller = Controller::new(settings).await?;
    controller.run().await?;

    Ok(())
}
