//! Managed-Resource Synchronizer
//!
//! Publishes a desired object set as a single named bundle, removes it
//! again, and waits for the removal to complete. The bundle is the unit of
//! synchronization: objects are never applied individually.

pub mod kube_client;
pub mod memory;
pub mod registry;

pub use kube_client::KubeManagedResourceClient;
pub use memory::InMemoryManagedResourceClient;
pub use registry::Registry;

use crate::domain::ports::{Bundle, BundleState, ManagedResourceClientRef};
use crate::error::{Error, Result};
use crate::resources::DesiredObjectSet;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Name of the bundle carrying the csi-driver-lvm deployment
pub const BUNDLE_NAME: &str = "extension-csi-driver-lvm";

/// Upper bound on waiting for a bundle deletion
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default interval between observations while waiting
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Synchronizes desired object sets with the orchestration API
#[derive(Clone)]
pub struct ManagedResourceSynchronizer {
    client: ManagedResourceClientRef,
    poll_interval: Duration,
}

impl ManagedResourceSynchronizer {
    /// Create a synchronizer over the given client
    pub fn new(client: ManagedResourceClientRef) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the interval between observations
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Serialize the set into one bundle
    pub fn render(
        &self,
        name: &str,
        namespace: &str,
        objects: &DesiredObjectSet,
    ) -> Result<Bundle> {
        Ok(Registry::new().add_all(objects)?.into_bundle(name, namespace))
    }

    /// Create or replace the bundle. Returns once the API has accepted it,
    /// without waiting for the contained objects to become ready.
    pub async fn apply(
        &self,
        name: &str,
        namespace: &str,
        objects: &DesiredObjectSet,
    ) -> Result<Bundle> {
        let bundle = self.render(name, namespace, objects)?;
        self.client.upsert(&bundle).await?;

        info!(
            name = %name,
            namespace = %namespace,
            objects = objects.len(),
            checksum = %bundle.checksum,
            "Managed resource applied"
        );
        Ok(bundle)
    }

    /// Request removal of the bundle. Absent bundles are not an error.
    pub async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        self.client.delete(namespace, name).await?;
        info!(name = %name, namespace = %namespace, "Managed resource deletion requested");
        Ok(())
    }

    /// Whether the bundle currently exists
    pub async fn exists(&self, name: &str, namespace: &str) -> Result<bool> {
        Ok(self.client.get(namespace, name).await?.is_some())
    }

    /// Block until the bundle is gone.
    ///
    /// Fails with [`Error::DeleteTimeout`] once `timeout` elapses and with
    /// [`Error::Cancelled`] if `cancel` fires first.
    pub async fn wait_until_deleted(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let poll = self.poll_until(name, namespace, |state| state.is_none());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled {
                operation: format!("waiting for deletion of {}/{}", namespace, name),
            }),
            result = tokio::time::timeout(timeout, poll) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::DeleteTimeout {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    timeout,
                }),
            },
        }?;

        info!(name = %name, namespace = %namespace, "Managed resource deleted");
        Ok(())
    }

    /// Block until the resource manager reports the bundle applied and
    /// healthy.
    pub async fn wait_until_healthy(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let poll = self.poll_until(name, namespace, |state| {
            matches!(state, Some(s) if s.applied && s.healthy && !s.deleting)
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled {
                operation: format!("waiting for {}/{} to become healthy", namespace, name),
            }),
            result = tokio::time::timeout(timeout, poll) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::HealthTimeout {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    timeout,
                }),
            },
        }
    }

    async fn poll_until<F>(&self, name: &str, namespace: &str, done: F) -> Result<()>
    where
        F: Fn(Option<&BundleState>) -> bool,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let state = self.client.get(namespace, name).await?;
            if done(state.as_ref()) {
                return Ok(());
            }
            debug!(name = %name, namespace = %namespace, state = ?state, "Still waiting on managed resource");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::tests::{merged, FixedResolver};
    use crate::resources::{build, NAMESPACE};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn objects() -> DesiredObjectSet {
        build(&merged("/data/lvm", "/dev/sd*"), NAMESPACE, &FixedResolver::complete()).unwrap()
    }

    fn synchronizer(client: &Arc<InMemoryManagedResourceClient>) -> ManagedResourceSynchronizer {
        ManagedResourceSynchronizer::new(client.clone()).with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_apply_upserts_single_bundle() {
        let client = Arc::new(InMemoryManagedResourceClient::new());
        let sync = synchronizer(&client);

        let bundle = sync.apply(BUNDLE_NAME, NAMESPACE, &objects()).await.unwrap();

        assert_eq!(bundle.data.len(), 13);
        assert_eq!(client.upsert_count(), 1);
        assert_eq!(client.bundle(NAMESPACE, BUNDLE_NAME), Some(bundle));
        assert!(sync.exists(BUNDLE_NAME, NAMESPACE).await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_surfaces_api_rejection() {
        let client = Arc::new(InMemoryManagedResourceClient::new().fail_upserts("admission denied"));
        let sync = synchronizer(&client);

        let result = sync.apply(BUNDLE_NAME, NAMESPACE, &objects()).await;
        assert_matches!(result, Err(Error::Api(_)));
        assert!(client.bundle(NAMESPACE, BUNDLE_NAME).is_none());
    }

    #[tokio::test]
    async fn test_delete_absent_bundle_succeeds() {
        let client = Arc::new(InMemoryManagedResourceClient::new());
        let sync = synchronizer(&client);

        sync.delete(BUNDLE_NAME, NAMESPACE).await.unwrap();
        sync.wait_until_deleted(BUNDLE_NAME, NAMESPACE, DELETE_TIMEOUT, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_deleted_observes_completion() {
        let client = Arc::new(InMemoryManagedResourceClient::new().with_deletion_after(3));
        let sync = synchronizer(&client);

        sync.apply(BUNDLE_NAME, NAMESPACE, &objects()).await.unwrap();
        sync.delete(BUNDLE_NAME, NAMESPACE).await.unwrap();
        assert!(sync.exists(BUNDLE_NAME, NAMESPACE).await.unwrap());

        sync.wait_until_deleted(
            BUNDLE_NAME,
            NAMESPACE,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(!sync.exists(BUNDLE_NAME, NAMESPACE).await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_until_deleted_times_out() {
        let client = Arc::new(InMemoryManagedResourceClient::new().never_completing_deletion());
        let sync = synchronizer(&client);

        sync.apply(BUNDLE_NAME, NAMESPACE, &objects()).await.unwrap();
        sync.delete(BUNDLE_NAME, NAMESPACE).await.unwrap();

        let result = sync
            .wait_until_deleted(
                BUNDLE_NAME,
                NAMESPACE,
                Duration::from_millis(50),
                &CancellationToken::new(),
            )
            .await;
        assert_matches!(result, Err(Error::DeleteTimeout { ref name, .. }) if name == BUNDLE_NAME);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_timeout() {
        let client = Arc::new(InMemoryManagedResourceClient::new().never_completing_deletion());
        let sync = synchronizer(&client);

        sync.apply(BUNDLE_NAME, NAMESPACE, &objects()).await.unwrap();
        sync.delete(BUNDLE_NAME, NAMESPACE).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = sync
            .wait_until_deleted(BUNDLE_NAME, NAMESPACE, Duration::from_secs(30), &cancel)
            .await;
        assert_matches!(result, Err(Error::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_poll_error_surfaces_as_api_error() {
        let client = Arc::new(InMemoryManagedResourceClient::new().fail_gets("etcd unavailable"));
        let sync = synchronizer(&client);

        let result = sync
            .wait_until_deleted(
                BUNDLE_NAME,
                NAMESPACE,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await;
        assert_matches!(result, Err(Error::Api(_)));
    }

    #[tokio::test]
    async fn test_wait_until_healthy() {
        let client = Arc::new(InMemoryManagedResourceClient::new());
        let sync = synchronizer(&client);
        let cancel = CancellationToken::new();

        let result = sync
            .wait_until_healthy(BUNDLE_NAME, NAMESPACE, Duration::from_millis(30), &cancel)
            .await;
        assert_matches!(result, Err(Error::HealthTimeout { .. }));

        sync.apply(BUNDLE_NAME, NAMESPACE, &objects()).await.unwrap();
        sync.wait_until_healthy(BUNDLE_NAME, NAMESPACE, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
    }
}
