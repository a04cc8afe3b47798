//! Storage synthesis: PersistentVolumeClaim and BucketClaim.

use super::{names, object_meta};
use crds::{Application, BucketClaim, BucketClaimSpec};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Builds the PersistentVolumeClaim when block storage is enabled.
///
/// The size has already passed validation, so it is carried verbatim as a
/// Kubernetes quantity.
#[must_use]
pub fn pvc(app: &Application) -> Option<PersistentVolumeClaim> {
    let storage = app.spec.storage.as_ref().filter(|s| s.enabled)?;
    let name = app.name_any();

    let access_mode = storage
        .access_mode
        .clone()
        .unwrap_or_else(|| "ReadWriteOnce".to_string());

    Some(PersistentVolumeClaim {
        metadata: object_meta(app, names::pvc(&name)),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![access_mode]),
            storage_class_name: storage.storage_class.clone(),
            resources: Some(k8s_openapi::api::core::v1::VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(storage.size.clone()),
                )])),
                ..Default::default()
            }),
            ..PersistentVolumeClaimSpec::default()
        }),
        status: None,
    })
}

/// Builds the BucketClaim when object storage is enabled.
///
/// The bucket name defaults to the application name; the platform
/// provisioner owns uniqueness beyond that.
#[must_use]
pub fn bucket_claim(app: &Application) -> Option<BucketClaim> {
    let object_storage = app.spec.object_storage.as_ref().filter(|o| o.enabled)?;
    let name = app.name_any();

    Some(BucketClaim {
        metadata: object_meta(app, names::bucket_claim(&name)),
        spec: BucketClaimSpec {
            bucket_name: object_storage
                .bucket_name
                .clone()
                .unwrap_or_else(|| name.clone()),
            quota_size: object_storage.quota_size.clone(),
        },
        status: None,
    })
}
