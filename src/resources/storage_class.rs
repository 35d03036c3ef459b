//! Storage classes offered by the driver
//!
//! All variants defer binding until a consumer is scheduled, delete the
//! logical volume with its claim and allow expansion. Only the `type`
//! parameter differs.

use super::{cluster_meta, DRIVER_NAME};
use k8s_openapi::api::storage::v1::StorageClass;
use std::collections::BTreeMap;

/// LVM volume layout selected by a storage class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeType {
    Linear,
    Mirror,
    Striped,
}

impl std::fmt::Display for VolumeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeType::Linear => write!(f, "linear"),
            VolumeType::Mirror => write!(f, "mirror"),
            VolumeType::Striped => write!(f, "striped"),
        }
    }
}

/// The four storage classes: `csi-lvm` (linear) and one per volume type
pub fn storage_classes() -> Vec<StorageClass> {
    vec![
        storage_class("csi-lvm", VolumeType::Linear),
        storage_class("csi-driver-lvm-linear", VolumeType::Linear),
        storage_class("csi-driver-lvm-mirror", VolumeType::Mirror),
        storage_class("csi-driver-lvm-striped", VolumeType::Striped),
    ]
}

fn storage_class(name: &str, volume_type: VolumeType) -> StorageClass {
    StorageClass {
        metadata: cluster_meta(name),
        provisioner: DRIVER_NAME.into(),
        reclaim_policy: Some("Delete".into()),
        volume_binding_mode: Some("WaitForFirstConsumer".into()),
        allow_volume_expansion: Some(true),
        parameters: Some(BTreeMap::from([(
            "type".to_string(),
            volume_type.to_string(),
        )])),
        ..Default::default()
    }
}
