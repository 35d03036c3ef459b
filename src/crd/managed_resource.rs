//! ManagedResource CRD
//!
//! A ManagedResource references Secrets holding serialized objects. The
//! resource manager applies those objects to the cluster and removes them
//! again when the ManagedResource is deleted.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Class of managed resources reconciled in the seed cluster
pub const SEED_CLASS: &str = "seed";

/// Condition set once all objects have been applied
pub const CONDITION_RESOURCES_APPLIED: &str = "ResourcesApplied";

/// Condition set once all objects report healthy
pub const CONDITION_RESOURCES_HEALTHY: &str = "ResourcesHealthy";

/// ManagedResource describes a list of objects that should be kept in sync
/// with the cluster.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "resources.gardener.cloud",
    version = "v1alpha1",
    kind = "ManagedResource",
    plural = "managedresources",
    shortname = "mr",
    status = "ManagedResourceStatus",
    printcolumn = r#"{"name": "Class", "type": "string", "jsonPath": ".spec.class"}"#,
    printcolumn = r#"{"name": "Applied", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"ResourcesApplied\")].status"}"#,
    printcolumn = r#"{"name": "Healthy", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"ResourcesHealthy\")].status"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceSpec {
    /// Secrets containing the serialized objects
    pub secret_refs: Vec<SecretReference>,

    /// Resource manager class responsible for this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    /// Keep the objects in the cluster when the ManagedResource is deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_objects: Option<bool>,

    /// Labels injected into every managed object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject_labels: Option<BTreeMap<String, String>>,
}

/// Reference to a Secret in the same namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecretReference {
    pub name: String,
}

/// Status of the ManagedResource
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceStatus {
    #[serde(default)]
    pub conditions: Vec<ManagedResourceCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Condition reported by the resource manager
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceCondition {
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False", "Unknown" or "Progressing"
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl ManagedResource {
    /// Whether the condition of the given type has status "True"
    pub fn condition_true(&self, type_: &str) -> bool {
        self.status
            .as_ref()
            .map(|status| {
                status
                    .conditions
                    .iter()
                    .any(|c| c.type_ == type_ && c.status == "True")
            })
            .unwrap_or(false)
    }

    /// Whether the resource manager has observed the latest spec
    pub fn is_observed(&self) -> bool {
        match (self.metadata.generation, self.status.as_ref()) {
            (Some(generation), Some(status)) => status.observed_generation == Some(generation),
            _ => false,
        }
    }
}
