//! Domain Ports - Core trait definitions for the extension
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems. Adapters implement these traits to provide concrete
//! functionality.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Image Resolution
// =============================================================================

/// A concrete, pullable image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Symbolic name the reference was resolved from
    pub name: String,
    /// Repository, e.g. `registry.k8s.io/sig-storage/csi-attacher`
    pub repository: String,
    /// Tag or digest (`sha256:...`)
    pub tag: Option<String>,
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tag {
            Some(tag) if tag.starts_with("sha256:") => write!(f, "{}@{}", self.repository, tag),
            Some(tag) => write!(f, "{}:{}", self.repository, tag),
            None => write!(f, "{}", self.repository),
        }
    }
}

/// Port for resolving symbolic image names to pullable references
pub trait ImageResolver: Send + Sync {
    /// Resolve a symbolic image name
    fn resolve(&self, name: &str) -> Result<ImageReference>;
}

// =============================================================================
// Managed Resource Port
// =============================================================================

/// Serialized bundle of objects synchronized as one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// Bundle name
    pub name: String,
    /// Namespace the bundle lives in
    pub namespace: String,
    /// Serialized objects keyed by `<kind>__<namespace>__<name>.yaml`
    pub data: BTreeMap<String, Vec<u8>>,
    /// SHA-256 over the serialized objects
    pub checksum: String,
}

/// Observed state of a bundle in the orchestration API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleState {
    /// Checksum of the content last written
    pub checksum: Option<String>,
    /// Deletion has been requested but not yet completed
    pub deleting: bool,
    /// All constituent objects have been applied
    pub applied: bool,
    /// All constituent objects report healthy
    pub healthy: bool,
}

/// Port for bundle operations against the orchestration API
#[async_trait]
pub trait ManagedResourceClient: Send + Sync {
    /// Create or replace the bundle
    async fn upsert(&self, bundle: &Bundle) -> Result<()>;

    /// Request removal of the bundle; returns before removal completes
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Current state of the bundle, `None` once it is fully gone
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<BundleState>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ImageResolverRef = Arc<dyn ImageResolver>;
pub type ManagedResourceClientRef = Arc<dyn ManagedResourceClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_reference_display() {
        let tagged = ImageReference {
            name: "csi-attacher".into(),
            repository: "registry.k8s.io/sig-storage/csi-attacher".into(),
            tag: Some("v4.5.0".into()),
        };
        assert_eq!(
            tagged.to_string(),
            "registry.k8s.io/sig-storage/csi-attacher:v4.5.0"
        );

        let digest = ImageReference {
            tag: Some("sha256:abcd".into()),
            ..tagged.clone()
        };
        assert_eq!(
            digest.to_string(),
            "registry.k8s.io/sig-storage/csi-attacher@sha256:abcd"
        );

        let bare = ImageReference { tag: None, ..tagged };
        assert_eq!(bare.to_string(), "registry.k8s.io/sig-storage/csi-attacher");
    }
}
