//! Domain layer - Port definitions
//!
//! This module defines the core traits (ports) that adapters implement:
//! image resolution and managed-resource synchronization.

pub mod ports;

pub use ports::*;
