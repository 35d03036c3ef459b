//! Resource Set Builder
//!
//! Computes the cluster objects that make up a csi-driver-lvm deployment from
//! a merged driver configuration. The computation is pure: equal inputs and
//! equal image resolutions always give equal object sets.
//!
//! | Tier | Objects |
//! |------|---------|
//! | Controller | ServiceAccount, ClusterRole, ClusterRoleBinding, StatefulSet (attacher + resizer) |
//! | Plugin | CSIDriver, ServiceAccount, ClusterRole, ClusterRoleBinding, 4 StorageClasses, DaemonSet |

pub mod controller;
pub mod plugin;
pub mod rbac;
pub mod storage_class;

use crate::config::MergedConfig;
use crate::domain::ports::ImageResolver;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use k8s_openapi::api::apps::v1::{DaemonSet, StatefulSet};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::api::storage::v1::{CSIDriver, StorageClass};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Resource;
use tracing::debug;

/// Namespace all namespaced objects are deployed to
pub const NAMESPACE: &str = "kube-system";

/// Name the CSI driver registers under
pub const DRIVER_NAME: &str = "lvm.csi.metal-stack.io";

/// Volume group created by the driver on each node
pub const VOLUME_GROUP: &str = "csi-lvm";

/// Host directory holding the CSI socket
pub const PLUGIN_DIR: &str = "/var/lib/kubelet/plugins/csi-driver-lvm";

/// Port of the plugin liveness endpoint
pub const HEALTH_PORT: i32 = 9898;

/// Path of the plugin liveness endpoint
pub const HEALTH_PATH: &str = "/healthz";

/// Symbolic image names resolved during a build
pub mod images {
    pub const CSI_ATTACHER: &str = "csi-attacher";
    pub const CSI_RESIZER: &str = "csi-resizer";
    pub const CSI_NODE_DRIVER_REGISTRAR: &str = "csi-node-driver-registrar";
    pub const LIVENESS_PROBE: &str = "livenessprobe";
    pub const CSI_DRIVER_LVM: &str = "csi-driver-lvm";
    pub const CSI_DRIVER_LVM_PROVISIONER: &str = "csi-driver-lvm-provisioner";

    /// Resolution order
    pub const ALL: [&str; 6] = [
        CSI_ATTACHER,
        CSI_RESIZER,
        CSI_NODE_DRIVER_REGISTRAR,
        LIVENESS_PROBE,
        CSI_DRIVER_LVM,
        CSI_DRIVER_LVM_PROVISIONER,
    ];
}

// =============================================================================
// Resolved Images
// =============================================================================

/// Image references for every container of the deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverImages {
    pub attacher: String,
    pub resizer: String,
    pub node_driver_registrar: String,
    pub liveness_probe: String,
    pub driver: String,
    pub provisioner: String,
}

impl DriverImages {
    /// Resolve all images, stopping at the first failure
    pub fn resolve(resolver: &dyn ImageResolver) -> Result<Self> {
        let lookup = |name: &str| -> Result<String> {
            resolver
                .resolve(name)
                .map(|image| image.to_string())
                .map_err(|e| match e {
                    Error::ImageResolution { .. } => e,
                    other => Error::ImageResolution {
                        name: name.to_string(),
                        reason: other.to_string(),
                    },
                })
        };

        Ok(Self {
            attacher: lookup(images::CSI_ATTACHER)?,
            resizer: lookup(images::CSI_RESIZER)?,
            node_driver_registrar: lookup(images::CSI_NODE_DRIVER_REGISTRAR)?,
            liveness_probe: lookup(images::LIVENESS_PROBE)?,
            driver: lookup(images::CSI_DRIVER_LVM)?,
            provisioner: lookup(images::CSI_DRIVER_LVM_PROVISIONER)?,
        })
    }
}

// =============================================================================
// Desired Objects
// =============================================================================

/// A typed cluster object produced by the builder
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredObject {
    ServiceAccount(ServiceAccount),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    StatefulSet(StatefulSet),
    DaemonSet(DaemonSet),
    CsiDriver(CSIDriver),
    StorageClass(StorageClass),
}

macro_rules! desired_object_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for DesiredObject {
                fn from(object: $ty) -> Self {
                    DesiredObject::$variant(object)
                }
            }
        )*
    };
}

desired_object_from! {
    ServiceAccount => ServiceAccount,
    ClusterRole => ClusterRole,
    ClusterRoleBinding => ClusterRoleBinding,
    StatefulSet => StatefulSet,
    DaemonSet => DaemonSet,
    CsiDriver => CSIDriver,
    StorageClass => StorageClass,
}

impl DesiredObject {
    /// Kubernetes kind
    pub fn kind(&self) -> &'static str {
        match self {
            DesiredObject::ServiceAccount(_) => ServiceAccount::KIND,
            DesiredObject::ClusterRole(_) => ClusterRole::KIND,
            DesiredObject::ClusterRoleBinding(_) => ClusterRoleBinding::KIND,
            DesiredObject::StatefulSet(_) => StatefulSet::KIND,
            DesiredObject::DaemonSet(_) => DaemonSet::KIND,
            DesiredObject::CsiDriver(_) => CSIDriver::KIND,
            DesiredObject::StorageClass(_) => StorageClass::KIND,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            DesiredObject::ServiceAccount(o) => &o.metadata,
            DesiredObject::ClusterRole(o) => &o.metadata,
            DesiredObject::ClusterRoleBinding(o) => &o.metadata,
            DesiredObject::StatefulSet(o) => &o.metadata,
            DesiredObject::DaemonSet(o) => &o.metadata,
            DesiredObject::CsiDriver(o) => &o.metadata,
            DesiredObject::StorageClass(o) => &o.metadata,
        }
    }

    /// Object name
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Object namespace, `None` for cluster-scoped objects
    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// Dedup key of this object
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind(),
            name: self.name().to_string(),
        }
    }

    /// Serialize to a JSON value including `apiVersion` and `kind`
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            DesiredObject::ServiceAccount(o) => serde_json::to_value(o),
            DesiredObject::ClusterRole(o) => serde_json::to_value(o),
            DesiredObject::ClusterRoleBinding(o) => serde_json::to_value(o),
            DesiredObject::StatefulSet(o) => serde_json::to_value(o),
            DesiredObject::DaemonSet(o) => serde_json::to_value(o),
            DesiredObject::CsiDriver(o) => serde_json::to_value(o),
            DesiredObject::StorageClass(o) => serde_json::to_value(o),
        }
    }
}

/// Identity of an object within a set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: &'static str,
    pub name: String,
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Workload tier an object belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Singleton attach/resize coordination
    Controller,
    /// Per-node registration and volume operations
    Plugin,
}

// =============================================================================
// Desired Object Set
// =============================================================================

/// Ordered, deduplicated-by-(kind, name) set of desired objects.
///
/// Inserting an object whose key is already present replaces it in place,
/// keeping its original position and tier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredObjectSet {
    objects: IndexMap<ObjectKey, (Tier, DesiredObject)>,
}

impl DesiredObjectSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object into a tier
    pub fn insert(&mut self, tier: Tier, object: impl Into<DesiredObject>) {
        let object = object.into();
        let key = object.key();
        match self.objects.get_mut(&key) {
            Some(entry) => entry.1 = object,
            None => {
                self.objects.insert(key, (tier, object));
            }
        }
    }

    /// All objects in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &DesiredObject> {
        self.objects.values().map(|(_, object)| object)
    }

    /// Objects of one tier in insertion order
    pub fn tier(&self, tier: Tier) -> impl Iterator<Item = &DesiredObject> {
        self.objects
            .values()
            .filter(move |(t, _)| *t == tier)
            .map(|(_, object)| object)
    }

    /// Controller-tier objects
    pub fn controller_objects(&self) -> Vec<&DesiredObject> {
        self.tier(Tier::Controller).collect()
    }

    /// Plugin-tier objects
    pub fn plugin_objects(&self) -> Vec<&DesiredObject> {
        self.tier(Tier::Plugin).collect()
    }

    /// Look up an object by kind and name
    pub fn get(&self, kind: &str, name: &str) -> Option<&DesiredObject> {
        self.objects
            .iter()
            .find(|(key, _)| key.kind == kind && key.name == name)
            .map(|(_, (_, object))| object)
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

// =============================================================================
// Build
// =============================================================================

/// Build the desired object set for a merged configuration.
///
/// All images are resolved before any object is constructed, so a failed
/// resolution never yields a partial set.
pub fn build(
    merged: &MergedConfig,
    namespace: &str,
    resolver: &dyn ImageResolver,
) -> Result<DesiredObjectSet> {
    if merged.host_write_path.is_empty() {
        return Err(Error::InvalidConfiguration(
            "hostWritePath resolved to an empty string; set it on the extension or as operator default"
                .into(),
        ));
    }

    let images = DriverImages::resolve(resolver)?;

    let mut set = DesiredObjectSet::new();
    for object in controller::objects(namespace, &images) {
        set.insert(Tier::Controller, object);
    }
    for object in plugin::objects(namespace, merged, &images) {
        set.insert(Tier::Plugin, object);
    }

    debug!(
        objects = set.len(),
        host_write_path = %merged.host_write_path,
        device_pattern = %merged.device_pattern,
        "Built desired object set"
    );

    Ok(set)
}

/// Object metadata carrying only a name
pub(crate) fn cluster_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Object metadata carrying a name and namespace
pub(crate) fn namespaced_meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}
