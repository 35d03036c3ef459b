//! In-Memory Managed Resource Client
//!
//! Keeps bundles in process memory. Used by the standalone render mode and
//! by tests. Deletions complete after a configurable number of
//! observations, which mimics the resource manager removing the contained
//! objects asynchronously.

use crate::domain::ports::{Bundle, BundleState, ManagedResourceClient};
use crate::error::Result;
use async_trait::async_trait;
use kube::error::ErrorResponse;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

type BundleKey = (String, String);

#[derive(Debug, Clone)]
struct StoredBundle {
    bundle: Bundle,
    /// Observations left before a pending deletion completes
    deletion: Option<Option<u32>>,
}

#[derive(Debug, Default)]
struct Failures {
    upsert: Option<String>,
    delete: Option<String>,
    get: Option<String>,
}

/// Managed resource client backed by a map
#[derive(Debug)]
pub struct InMemoryManagedResourceClient {
    bundles: RwLock<HashMap<BundleKey, StoredBundle>>,
    history: RwLock<Vec<Bundle>>,
    deletes: RwLock<Vec<BundleKey>>,
    /// `None` means deletions never complete
    deletion_after: Option<u32>,
    failures: Mutex<Failures>,
}

impl Default for InMemoryManagedResourceClient {
    fn default() -> Self {
        Self {
            bundles: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            deletes: RwLock::new(Vec::new()),
            deletion_after: Some(0),
            failures: Mutex::new(Failures::default()),
        }
    }
}

impl InMemoryManagedResourceClient {
    /// Create a client whose deletions complete on the next observation
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete deletions only after `observations` reads of the bundle
    pub fn with_deletion_after(mut self, observations: u32) -> Self {
        self.deletion_after = Some(observations);
        self
    }

    /// Leave deleted bundles in the deleting state forever
    pub fn never_completing_deletion(mut self) -> Self {
        self.deletion_after = None;
        self
    }

    /// Reject every upsert with the given message
    pub fn fail_upserts(self, message: &str) -> Self {
        self.failures.lock().upsert = Some(message.to_string());
        self
    }

    /// Reject every delete with the given message
    pub fn fail_deletes(self, message: &str) -> Self {
        self.failures.lock().delete = Some(message.to_string());
        self
    }

    /// Reject every read with the given message
    pub fn fail_gets(self, message: &str) -> Self {
        self.failures.lock().get = Some(message.to_string());
        self
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        *self.failures.lock() = Failures::default();
    }

    /// Current content of a bundle, including bundles pending deletion
    pub fn bundle(&self, namespace: &str, name: &str) -> Option<Bundle> {
        self.bundles
            .read()
            .get(&key(namespace, name))
            .map(|stored| stored.bundle.clone())
    }

    /// Whether a deletion of the bundle is pending
    pub fn is_deleting(&self, namespace: &str, name: &str) -> bool {
        self.bundles
            .read()
            .get(&key(namespace, name))
            .map(|stored| stored.deletion.is_some())
            .unwrap_or(false)
    }

    /// Every bundle accepted by `upsert`, oldest first
    pub fn upserts(&self) -> Vec<Bundle> {
        self.history.read().clone()
    }

    /// Number of accepted upserts
    pub fn upsert_count(&self) -> usize {
        self.history.read().len()
    }

    /// Number of delete requests
    pub fn delete_count(&self) -> usize {
        self.deletes.read().len()
    }
}

fn key(namespace: &str, name: &str) -> BundleKey {
    (namespace.to_string(), name.to_string())
}

fn rejected(message: &str) -> crate::error::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: message.to_string(),
        reason: "InternalError".into(),
        code: 500,
    })
    .into()
}

#[async_trait]
impl ManagedResourceClient for InMemoryManagedResourceClient {
    async fn upsert(&self, bundle: &Bundle) -> Result<()> {
        if let Some(message) = &self.failures.lock().upsert {
            return Err(rejected(message));
        }

        self.bundles.write().insert(
            key(&bundle.namespace, &bundle.name),
            StoredBundle {
                bundle: bundle.clone(),
                deletion: None,
            },
        );
        self.history.write().push(bundle.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        if let Some(message) = &self.failures.lock().delete {
            return Err(rejected(message));
        }

        self.deletes.write().push(key(namespace, name));
        if let Some(stored) = self.bundles.write().get_mut(&key(namespace, name)) {
            if stored.deletion.is_none() {
                stored.deletion = Some(self.deletion_after);
            }
        }
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<BundleState>> {
        if let Some(message) = &self.failures.lock().get {
            return Err(rejected(message));
        }

        let key = key(namespace, name);
        let mut bundles = self.bundles.write();

        let remove = match bundles.get_mut(&key) {
            None => return Ok(None),
            Some(stored) => match &mut stored.deletion {
                Some(Some(0)) => true,
                Some(Some(remaining)) => {
                    *remaining -= 1;
                    false
                }
                Some(None) | None => false,
            },
        };
        if remove {
            bundles.remove(&key);
            return Ok(None);
        }

        Ok(bundles.get(&key).map(|stored| BundleState {
            checksum: Some(stored.bundle.checksum.clone()),
            deleting: stored.deletion.is_some(),
            applied: stored.deletion.is_none(),
            healthy: stored.deletion.is_none(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    fn bundle(checksum: &str) -> Bundle {
        Bundle {
            name: "extension-csi-driver-lvm".into(),
            namespace: "kube-system".into(),
            data: BTreeMap::new(),
            checksum: checksum.into(),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_bundle() {
        let client = InMemoryManagedResourceClient::new();
        client.upsert(&bundle("a")).await.unwrap();
        client.upsert(&bundle("b")).await.unwrap();

        let state = client
            .get("kube-system", "extension-csi-driver-lvm")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.checksum.as_deref(), Some("b"));
        assert!(state.applied && state.healthy && !state.deleting);
        assert_eq!(client.upsert_count(), 2);
    }

    #[tokio::test]
    async fn test_deletion_completes_after_observations() {
        let client = InMemoryManagedResourceClient::new().with_deletion_after(2);
        client.upsert(&bundle("a")).await.unwrap();
        client
            .delete("kube-system", "extension-csi-driver-lvm")
            .await
            .unwrap();
        assert!(client.is_deleting("kube-system", "extension-csi-driver-lvm"));

        let observe = || client.get("kube-system", "extension-csi-driver-lvm");
        assert!(observe().await.unwrap().unwrap().deleting);
        assert!(observe().await.unwrap().is_some());
        assert!(observe().await.unwrap().is_none());
        assert!(client.bundle("kube-system", "extension-csi-driver-lvm").is_none());
    }

    #[tokio::test]
    async fn test_never_completing_deletion() {
        let client = InMemoryManagedResourceClient::new().never_completing_deletion();
        client.upsert(&bundle("a")).await.unwrap();
        client
            .delete("kube-system", "extension-csi-driver-lvm")
            .await
            .unwrap();

        for _ in 0..10 {
            let state = client
                .get("kube-system", "extension-csi-driver-lvm")
                .await
                .unwrap();
            assert!(state.unwrap().deleting);
        }
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let client = InMemoryManagedResourceClient::new().fail_deletes("forbidden");
        let err = client
            .delete("kube-system", "extension-csi-driver-lvm")
            .await
            .unwrap_err();
        assert_matches!(err, Error::Api(kube::Error::Api(ref response)) if response.code == 500);
        assert_eq!(client.delete_count(), 0);

        client.clear_failures();
        client
            .delete("kube-system", "extension-csi-driver-lvm")
            .await
            .unwrap();
        assert_eq!(client.delete_count(), 1);
    }
}
