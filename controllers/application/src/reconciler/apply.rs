//! Server-side apply helpers for owned objects.
//!
//! Every downstream object goes through the same path: create it if it is
//! missing, otherwise compare the desired form against what the API server
//! holds and patch only on drift. The comparison is a structural subset
//! check, so fields the server defaults (or other controllers inject, like
//! sidecars) never count as drift.

use crate::error::ControllerError;
use crate::synthesizer::MANAGED_BY;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use tracing::{debug, info};

/// Creates or converges one owned object.
pub async fn apply_object<K>(api: &Api<K>, desired: &K) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = desired.name_any();
    let kind = K::kind(&());

    match api.get_opt(&name).await? {
        None => {
            api.create(&PostParams::default(), desired).await?;
            info!("Created {} {}", kind, name);
        }
        Some(observed) => {
            let desired_json = apply_payload(desired)?;
            let observed_json = serde_json::to_value(&observed)
                .map_err(|e| ControllerError::Fatal(format!("serialize observed {kind} {name}: {e}")))?;
            if is_subset(&desired_json, &observed_json) {
                debug!("{} {} already converged, skipping patch", kind, name);
                return Ok(());
            }
            let params = PatchParams::apply(MANAGED_BY).force();
            api.patch(&name, &params, &Patch::Apply(&desired_json)).await?;
            info!("Patched drifted {} {}", kind, name);
        }
    }
    Ok(())
}

/// Deletes an owned object that the spec no longer calls for.
///
/// Only objects controller-owned by this Application are touched; anything
/// else with a colliding name is left alone.
pub async fn prune_object<K>(api: &Api<K>, name: &str, owner_uid: &str) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    let Some(observed) = api.get_opt(name).await? else {
        return Ok(());
    };
    let owned = observed
        .owner_references()
        .iter()
        .any(|r| r.controller == Some(true) && r.uid == owner_uid);
    if !owned {
        debug!("Skipping prune of {} {}: not controller-owned", K::kind(&()), name);
        return Ok(());
    }
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!("Pruned {} {}", K::kind(&()), name);
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(ControllerError::Kube(e)),
    }
}

/// Serializes the desired object for server-side apply.
///
/// Typed objects serialize without their TypeMeta, which apply requires,
/// so apiVersion and kind are injected; status is stripped because the
/// apply path never owns it.
pub(crate) fn apply_payload<K>(desired: &K) -> Result<Value, ControllerError>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut json = serde_json::to_value(desired)
        .map_err(|e| ControllerError::Fatal(format!("serialize desired {}: {e}", K::kind(&()))))?;
    if let Value::Object(map) = &mut json {
        map.insert(
            "apiVersion".to_string(),
            Value::String(K::api_version(&()).to_string()),
        );
        map.insert("kind".to_string(), Value::String(K::kind(&()).to_string()));
        map.remove("status");
    }
    Ok(json)
}

/// Structural subset check: every field the desired form declares must be
/// present with the same value in the observed form. Arrays compare
/// index-wise and tolerate extra observed entries.
pub(crate) fn is_subset(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Object(d), Value::Object(o)) => d.iter().all(|(key, value)| {
            if value.is_null() {
                o.get(key).is_none_or(Value::is_null)
            } else {
                o.get(key).is_some_and(|observed_value| is_subset(value, observed_value))
            }
        }),
        (Value::Array(d), Value::Array(o)) => {
            d.len() <= o.len() && d.iter().zip(o.iter()).all(|(dv, ov)| is_subset(dv, ov))
        }
        _ => desired == observed,
    }
}
