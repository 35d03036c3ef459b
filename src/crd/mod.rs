//! Custom Resource Definitions
//!
//! This module contains the CRD types the extension works with:
//! - Extension: parent resource driving the deployment lifecycle
//! - ManagedResource: bundle of objects applied by the resource manager

pub mod extension;
pub mod managed_resource;

pub use extension::*;
pub use managed_resource::*;
