//! Extension CRD
//!
//! The parent resource whose presence drives the csi-driver-lvm deployment.
//! Its `providerConfig` carries the optional driver configuration; its
//! status records the outcome of the last lifecycle operation.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Extension type handled by this controller
pub const EXTENSION_TYPE: &str = "csi-driver-lvm";

/// Finalizer guarding deletion of the managed resource
pub const FINALIZER: &str = "extensions.gardener.cloud/csi-driver-lvm";

/// Annotation requesting a specific lifecycle operation
pub const OPERATION_ANNOTATION: &str = "gardener.cloud/operation";

/// Operation annotation values
pub const OPERATION_RESTORE: &str = "restore";
pub const OPERATION_MIGRATE: &str = "migrate";
pub const OPERATION_FORCE_DELETE: &str = "force-delete";

// =============================================================================
// Extension CRD
// =============================================================================

/// Extension enables an optional add-on for the cluster it lives in.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "extensions.gardener.cloud",
    version = "v1alpha1",
    kind = "Extension",
    plural = "extensions",
    shortname = "ext",
    status = "ExtensionStatus",
    printcolumn = r#"{"name": "Type", "type": "string", "jsonPath": ".spec.type"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.lastOperation.state"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSpec {
    /// Extension type, e.g. `csi-driver-lvm`
    #[serde(rename = "type")]
    pub type_: String,

    /// Raw provider configuration, decoded by the actuator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub provider_config: Option<serde_json::Value>,
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema
        .extensions
        .insert("x-kubernetes-preserve-unknown-fields".into(), true.into());
    Schema::Object(schema)
}

// =============================================================================
// Status
// =============================================================================

/// Status of the Extension
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    /// Most recent lifecycle operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,

    /// Error of the most recent failed operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,

    /// Generation observed by the last operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Lifecycle operation recorded in the status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(rename = "type")]
    pub type_: OperationType,
    pub state: OperationState,
    #[serde(default)]
    pub description: String,
    #[schemars(with = "Option<String>")]
    #[serde(default)]
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Error recorded in the status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,
    /// Machine-readable error kinds
    #[serde(default)]
    pub codes: Vec<String>,
    #[schemars(with = "Option<String>")]
    #[serde(default)]
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Lifecycle operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OperationType {
    Reconcile,
    Delete,
    Restore,
    Migrate,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Reconcile => write!(f, "Reconcile"),
            OperationType::Delete => write!(f, "Delete"),
            OperationType::Restore => write!(f, "Restore"),
            OperationType::Migrate => write!(f, "Migrate"),
        }
    }
}

/// Outcome of a lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OperationState {
    Processing,
    Succeeded,
    Error,
}

impl Extension {
    /// Whether this Extension is handled by this controller
    pub fn is_handled(&self) -> bool {
        self.spec.type_ == EXTENSION_TYPE
    }

    /// Operation requested through the operation annotation
    pub fn requested_operation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(OPERATION_ANNOTATION))
            .map(String::as_str)
    }
}
