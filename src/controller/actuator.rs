//! Lifecycle Actuator
//!
//! Drives an Extension through `Absent -> Applying -> Present -> Deleting ->
//! Absent`. Reconcile and Restore share one pipeline: decode the provider
//! config, merge it with the operator defaults, build the desired objects
//! and publish them as a single bundle.

use crate::config::{decode_provider_config_value, merge, ControllerConfiguration, MergedConfig};
use crate::controller::metrics::Metrics;
use crate::crd::{Extension, OperationType};
use crate::domain::ports::{Bundle, ImageResolverRef};
use crate::error::Result;
use crate::managedresources::{ManagedResourceSynchronizer, BUNDLE_NAME, DELETE_TIMEOUT};
use crate::resources::{self, DesiredObjectSet, NAMESPACE};
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Actuator Trait
// =============================================================================

/// Lifecycle operations of an extension
#[async_trait]
pub trait ExtensionActuator: Send + Sync {
    /// Bring the deployment to the desired state
    async fn reconcile(&self, ext: &Extension, cancel: &CancellationToken) -> Result<()>;

    /// Remove the deployment and wait until it is gone
    async fn delete(&self, ext: &Extension, cancel: &CancellationToken) -> Result<()>;

    /// Abandon the deployment without cleanup
    async fn force_delete(&self, ext: &Extension, cancel: &CancellationToken) -> Result<()>;

    /// Re-establish the deployment after a control plane move
    async fn restore(&self, ext: &Extension, cancel: &CancellationToken) -> Result<()>;

    /// Prepare for a control plane move
    async fn migrate(&self, ext: &Extension, cancel: &CancellationToken) -> Result<()>;
}

pub type ExtensionActuatorRef = Arc<dyn ExtensionActuator>;

// =============================================================================
// Actuator
// =============================================================================

/// Actuator deploying csi-driver-lvm through a managed resource
pub struct Actuator {
    config: Arc<ControllerConfiguration>,
    images: ImageResolverRef,
    synchronizer: ManagedResourceSynchronizer,
    delete_timeout: Duration,
    metrics: Option<Metrics>,
}

impl Actuator {
    /// Create an actuator
    pub fn new(
        config: Arc<ControllerConfiguration>,
        images: ImageResolverRef,
        synchronizer: ManagedResourceSynchronizer,
    ) -> Self {
        Self {
            config,
            images,
            synchronizer,
            delete_timeout: DELETE_TIMEOUT,
            metrics: None,
        }
    }

    /// Override how long Delete waits for the bundle to disappear
    pub fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = timeout;
        self
    }

    /// Record operations in the given metrics
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Decode and merge the driver configuration of an extension
    pub fn merged_config(&self, ext: &Extension) -> Result<MergedConfig> {
        let decoded = ext
            .spec
            .provider_config
            .as_ref()
            .map(decode_provider_config_value)
            .transpose()?;
        Ok(merge(decoded.as_ref(), &self.config))
    }

    /// Compute the desired objects of an extension without touching the API
    pub fn desired_state(&self, ext: &Extension) -> Result<DesiredObjectSet> {
        let merged = self.merged_config(ext)?;
        debug!(
            extension = %ext.name_any(),
            host_write_path = %merged.host_write_path,
            device_pattern = %merged.device_pattern,
            "Merged driver configuration"
        );
        resources::build(&merged, NAMESPACE, self.images.as_ref())
    }

    /// Compute the bundle an extension would publish
    pub fn render(&self, ext: &Extension) -> Result<Bundle> {
        let objects = self.desired_state(ext)?;
        self.synchronizer.render(BUNDLE_NAME, NAMESPACE, &objects)
    }

    /// Shared pipeline of Reconcile and Restore. The bundle is computed in
    /// full before the first API call.
    async fn apply_desired_state(&self, ext: &Extension) -> Result<Bundle> {
        let objects = self.desired_state(ext)?;
        self.synchronizer
            .apply(BUNDLE_NAME, NAMESPACE, &objects)
            .await
    }

    fn record(&self, operation: OperationType, started: Instant, result: &Result<()>) {
        if let Some(metrics) = &self.metrics {
            metrics.observe(operation, started.elapsed().as_secs_f64(), result);
        }
    }
}

#[async_trait]
impl ExtensionActuator for Actuator {
    async fn reconcile(&self, ext: &Extension, _cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        info!(extension = %ext.name_any(), namespace = ?ext.namespace(), "Reconciling csi-driver-lvm");

        let result = self.apply_desired_state(ext).await.map(|bundle| {
            info!(
                extension = %ext.name_any(),
                checksum = %bundle.checksum,
                "csi-driver-lvm reconciled"
            );
        });
        if let Err(e) = &result {
            warn!(extension = %ext.name_any(), error = %e, "Reconcile failed");
        }

        self.record(OperationType::Reconcile, started, &result);
        result
    }

    async fn delete(&self, ext: &Extension, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        info!(extension = %ext.name_any(), "Deleting csi-driver-lvm");

        let result = async {
            self.synchronizer.delete(BUNDLE_NAME, NAMESPACE).await?;
            self.synchronizer
                .wait_until_deleted(BUNDLE_NAME, NAMESPACE, self.delete_timeout, cancel)
                .await
        }
        .await;
        match &result {
            Ok(()) => info!(extension = %ext.name_any(), "csi-driver-lvm deleted"),
            Err(e) => warn!(extension = %ext.name_any(), error = %e, "Delete failed"),
        }

        self.record(OperationType::Delete, started, &result);
        result
    }

    async fn force_delete(&self, ext: &Extension, _cancel: &CancellationToken) -> Result<()> {
        debug!(extension = %ext.name_any(), "Force delete leaves the managed resource to its owner");
        self.record(OperationType::Delete, Instant::now(), &Ok(()));
        Ok(())
    }

    async fn restore(&self, ext: &Extension, _cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        info!(extension = %ext.name_any(), "Restoring csi-driver-lvm");

        let result = self.apply_desired_state(ext).await.map(|_| ());
        if let Err(e) = &result {
            warn!(extension = %ext.name_any(), error = %e, "Restore failed");
        }

        self.record(OperationType::Restore, started, &result);
        result
    }

    async fn migrate(&self, ext: &Extension, _cancel: &CancellationToken) -> Result<()> {
        debug!(extension = %ext.name_any(), "Nothing to migrate");
        self.record(OperationType::Migrate, Instant::now(), &Ok(()));
        Ok(())
    }
}
