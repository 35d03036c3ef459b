//! Kubernetes Managed Resource Client
//!
//! Stores a bundle as a Secret and a ManagedResource referencing it, both
//! written with server-side apply so repeated applies are idempotent.

use crate::crd::{
    ManagedResource, ManagedResourceSpec, SecretReference, CONDITION_RESOURCES_APPLIED,
    CONDITION_RESOURCES_HEALTHY, SEED_CLASS,
};
use crate::domain::ports::{Bundle, BundleState, ManagedResourceClient};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "csi-driver-lvm-extension";

/// Annotation carrying the bundle checksum on the ManagedResource
pub const CHECKSUM_ANNOTATION: &str = "checksum/secret-data";

/// Name of the Secret backing a managed resource
pub fn secret_name(name: &str) -> String {
    format!("managedresource-{}", name)
}

/// Managed resource client backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeManagedResourceClient {
    client: Client,
}

impl KubeManagedResourceClient {
    /// Create a new client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER).force()
    }
}

/// Secret holding the serialized bundle
pub fn bundle_secret(bundle: &Bundle) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(&bundle.name)),
            namespace: Some(bundle.namespace.clone()),
            ..Default::default()
        },
        type_: Some("Opaque".into()),
        data: Some(
            bundle
                .data
                .iter()
                .map(|(key, value)| (key.clone(), ByteString(value.clone())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// ManagedResource referencing the bundle secret
pub fn bundle_managed_resource(bundle: &Bundle) -> ManagedResource {
    let mut mr = ManagedResource::new(
        &bundle.name,
        ManagedResourceSpec {
            secret_refs: vec![SecretReference {
                name: secret_name(&bundle.name),
            }],
            class: Some(SEED_CLASS.into()),
            keep_objects: Some(false),
            inject_labels: None,
        },
    );
    mr.metadata.namespace = Some(bundle.namespace.clone());
    mr.metadata.annotations = Some(BTreeMap::from([(
        CHECKSUM_ANNOTATION.to_string(),
        bundle.checksum.clone(),
    )]));
    mr
}

/// Treat "not found" as success for deletions
fn ignore_not_found<T>(result: kube::Result<T>) -> kube::Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ManagedResourceClient for KubeManagedResourceClient {
    async fn upsert(&self, bundle: &Bundle) -> Result<()> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &bundle.namespace);
        let managed_resources: Api<ManagedResource> =
            Api::namespaced(self.client.clone(), &bundle.namespace);

        // The secret goes first so the ManagedResource never references
        // content older than its checksum annotation.
        let secret = bundle_secret(bundle);
        secrets
            .patch(&secret_name(&bundle.name), &Self::params(), &Patch::Apply(&secret))
            .await?;

        let mr = bundle_managed_resource(bundle);
        managed_resources
            .patch(&bundle.name, &Self::params(), &Patch::Apply(&mr))
            .await?;

        info!(
            name = %bundle.name,
            namespace = %bundle.namespace,
            checksum = %bundle.checksum,
            "Applied managed resource"
        );
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let managed_resources: Api<ManagedResource> =
            Api::namespaced(self.client.clone(), namespace);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        ignore_not_found(managed_resources.delete(name, &DeleteParams::default()).await)?;
        ignore_not_found(
            secrets
                .delete(&secret_name(name), &DeleteParams::default())
                .await,
        )?;

        debug!(name = %name, namespace = %namespace, "Requested managed resource deletion");
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<BundleState>> {
        let managed_resources: Api<ManagedResource> =
            Api::namespaced(self.client.clone(), namespace);

        let state = managed_resources.get_opt(name).await?.map(|mr| BundleState {
            checksum: mr
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(CHECKSUM_ANNOTATION).cloned()),
            deleting: mr.metadata.deletion_timestamp.is_some(),
            applied: mr.is_observed() && mr.condition_true(CONDITION_RESOURCES_APPLIED),
            healthy: mr.is_observed() && mr.condition_true(CONDITION_RESOURCES_HEALTHY),
        });
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> Bundle {
        Bundle {
            name: "extension-csi-driver-lvm".into(),
            namespace: "kube-system".into(),
            data: BTreeMap::from([("a.yaml".to_string(), b"kind: A\n".to_vec())]),
            checksum: "abc".into(),
        }
    }

    #[test]
    fn test_secret_holds_bundle_data() {
        let secret = bundle_secret(&bundle());
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("managedresource-extension-csi-driver-lvm")
        );
        assert_eq!(secret.metadata.namespace.as_deref(), Some("kube-system"));
        assert_eq!(
            secret.data.unwrap()["a.yaml"],
            ByteString(b"kind: A\n".to_vec())
        );
    }

    #[test]
    fn test_managed_resource_references_secret() {
        let mr = bundle_managed_resource(&bundle());
        assert_eq!(mr.metadata.namespace.as_deref(), Some("kube-system"));
        assert_eq!(mr.spec.class.as_deref(), Some("seed"));
        assert_eq!(mr.spec.keep_objects, Some(false));
        assert_eq!(
            mr.spec.secret_refs,
            vec![SecretReference {
                name: "managedresource-extension-csi-driver-lvm".into()
            }]
        );
        assert_eq!(
            mr.metadata.annotations.unwrap()[CHECKSUM_ANNOTATION],
            "abc"
        );
    }

    #[test]
    fn test_apply_payload_carries_type_meta() {
        let value = serde_json::to_value(bundle_managed_resource(&bundle())).unwrap();
        assert_eq!(value["apiVersion"], "resources.gardener.cloud/v1alpha1");
        assert_eq!(value["kind"], "ManagedResource");
    }
}
