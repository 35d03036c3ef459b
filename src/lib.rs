//! csi-driver-lvm Extension Controller
//!
//! Deploys csi-driver-lvm into a cluster as a single managed resource and
//! keeps it in sync with the owning Extension.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                 Extension Reconciler (kube runtime)                   │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                         Lifecycle Actuator                            │
//! │   Reconcile / Restore ──► decode ──► merge ──► build ──► apply        │
//! │   Delete ──► delete ──► wait_until_deleted                            │
//! ├───────────────────────┬──────────────────────┬───────────────────────┤
//! │  Configuration Merger │ Resource Set Builder │ Managed-Resource Sync │
//! │  (provider config +   │ (controller + plugin │ (Secret +             │
//! │   operator defaults)  │  tiers, images)      │  ManagedResource)     │
//! └───────────────────────┴──────────────────────┴───────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Operator configuration and driver config merging
//! - [`resources`]: Desired object set of a csi-driver-lvm deployment
//! - [`managedresources`]: Bundle serialization and synchronization
//! - [`controller`]: Lifecycle actuator and controller loop
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and traits
//! - [`imagevector`]: Container image table
//! - [`error`]: Error types and handling

pub mod config;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod imagevector;
pub mod managedresources;
pub mod resources;

// Re-export commonly used types
pub use config::{
    decode_provider_config, merge, ControllerConfiguration, DriverConfig, HealthCheckConfig,
    MergedConfig,
};

pub use controller::{Actuator, Context, ExtensionActuator, Metrics};

pub use crd::{
    Extension, ExtensionSpec, ExtensionStatus, ManagedResource, ManagedResourceSpec,
    OperationState, OperationType,
};

pub use domain::ports::{
    Bundle, BundleState, ImageReference, ImageResolver, ManagedResourceClient,
};

pub use error::{Error, ErrorAction, Result};

pub use imagevector::ImageVector;

pub use managedresources::{
    InMemoryManagedResourceClient, KubeManagedResourceClient, ManagedResourceSynchronizer,
    BUNDLE_NAME, DELETE_TIMEOUT,
};

pub use resources::{build, DesiredObject, DesiredObjectSet, Tier, NAMESPACE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
