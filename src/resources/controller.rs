//! Controller tier
//!
//! A single-replica StatefulSet running the external attacher and resizer
//! sidecars. Required pod anti-affinity on the hostname topology keeps at
//! most one controller pod per node.

use super::rbac::{cluster_role, cluster_role_binding, rule, service_account};
use super::{namespaced_meta, DesiredObject, DriverImages, PLUGIN_DIR};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, HostPathVolumeSource, PodAffinityTerm, PodAntiAffinity, PodSpec,
    PodTemplateSpec, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use std::collections::BTreeMap;

pub const NAME: &str = "csi-driver-lvm-controller";

const ALL_VERBS: &[&str] = &["get", "list", "watch", "update", "patch", "create", "delete"];
const READ_VERBS: &[&str] = &["get", "list", "watch"];
const MODIFY_VERBS: &[&str] = &["get", "list", "watch", "update", "patch"];

/// Controller-tier objects in apply order
pub fn objects(namespace: &str, images: &DriverImages) -> Vec<DesiredObject> {
    vec![
        service_account(NAME, namespace).into(),
        cluster_role(NAME, rules()).into(),
        cluster_role_binding(NAME, namespace).into(),
        stateful_set(namespace, images).into(),
    ]
}

fn rules() -> Vec<PolicyRule> {
    vec![
        rule("", "persistentvolumes", ALL_VERBS),
        rule("storage.k8s.io", "csinodes", READ_VERBS),
        rule("storage.k8s.io", "volumeattachments", MODIFY_VERBS),
        rule("", "persistentvolumeclaims", MODIFY_VERBS),
        rule("", "persistentvolumeclaims/status", &["update", "patch"]),
        rule("storage.k8s.io", "storageclasses", READ_VERBS),
        rule("", "events", ALL_VERBS),
        rule("", "nodes", READ_VERBS),
        rule("storage.k8s.io", "volumeattachments/status", &["patch"]),
        rule("", "pods", READ_VERBS),
    ]
}

fn stateful_set(namespace: &str, images: &DriverImages) -> StatefulSet {
    let socket_mount = vec![VolumeMount {
        mount_path: "/csi".into(),
        name: "socket-dir".into(),
        ..Default::default()
    }];

    let sidecar = |name: &str, image: &str, args: &[&str]| Container {
        name: name.into(),
        image: Some(image.into()),
        image_pull_policy: Some("IfNotPresent".into()),
        args: Some(args.iter().map(|a| a.to_string()).collect()),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(true),
            privileged: Some(true),
            ..Default::default()
        }),
        volume_mounts: Some(socket_mount.clone()),
        ..Default::default()
    };

    StatefulSet {
        metadata: namespaced_meta(NAME, namespace),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: NAME.into(),
            selector: LabelSelector {
                match_labels: Some(app_labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(anti_affinity()),
                    service_account_name: Some(NAME.into()),
                    containers: vec![
                        sidecar(
                            "csi-attacher",
                            &images.attacher,
                            &["--v=5", "--csi-address=/csi/csi.sock", "--feature-gates=Topology=true"],
                        ),
                        sidecar(
                            "csi-resizer",
                            &images.resizer,
                            &["--v=5", "--csi-address=/csi/csi.sock"],
                        ),
                    ],
                    volumes: Some(vec![Volume {
                        name: "socket-dir".into(),
                        host_path: Some(HostPathVolumeSource {
                            path: PLUGIN_DIR.into(),
                            type_: Some("DirectoryOrCreate".into()),
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), NAME.to_string())])
}

fn anti_affinity() -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_expressions: Some(vec![LabelSelectorRequirement {
                        key: "app".into(),
                        operator: "In".into(),
                        values: Some(vec![NAME.into()]),
                    }]),
                    ..Default::default()
                }),
                topology_key: "kubernetes.io/hostname".into(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
