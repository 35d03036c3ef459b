//! Extension Controller
//!
//! - [`actuator`]: lifecycle operations over the managed resource
//! - [`reconciler`]: kube-runtime controller loop driving the actuator
//! - [`metrics`]: Prometheus counters for lifecycle operations

pub mod actuator;
pub mod metrics;
pub mod reconciler;

pub use actuator::{Actuator, ExtensionActuator, ExtensionActuatorRef};
pub use metrics::Metrics;
pub use reconciler::{cancel_on, error_policy, reconcile, run, Context};
