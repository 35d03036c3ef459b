//! Plugin tier
//!
//! The CSIDriver registration, the storage classes and a DaemonSet running
//! one driver pod per node. The driver pod registers with the kubelet plugin
//! registry, manages the `csi-lvm` volume group on the devices matching the
//! configured pattern and keeps LVM metadata below the host write path.

use super::rbac::{cluster_role, cluster_role_binding, rule, service_account};
use super::storage_class::storage_classes;
use super::{
    cluster_meta, namespaced_meta, DesiredObject, DriverImages, DRIVER_NAME, HEALTH_PATH,
    HEALTH_PORT, NAMESPACE, PLUGIN_DIR, VOLUME_GROUP,
};
use crate::config::MergedConfig;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, HostPathVolumeSource,
    ObjectFieldSelector, PodSpec, PodTemplateSpec, Probe, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::api::storage::v1::{CSIDriver, CSIDriverSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

pub const NAME: &str = "csi-driver-lvm-plugin";

/// LVM metadata directories kept on the host, as (volume name, subdirectory)
const LVM_DIRS: [(&str, &str); 4] = [
    ("lvmcache", "cache"),
    ("lvmarchive", "archive"),
    ("lvmbackup", "backup"),
    ("lvmlock", "lock"),
];

// =============================================================================
// Liveness Probe Policy
// =============================================================================

/// Consecutive failures before the driver container is restarted
pub const PROBE_FAILURE_THRESHOLD: i32 = 5;
/// Seconds between probes
pub const PROBE_PERIOD_SECONDS: i32 = 2;
/// Seconds before the first probe
pub const PROBE_INITIAL_DELAY_SECONDS: i32 = 10;
const PROBE_TIMEOUT_SECONDS: i32 = 3;

/// Plugin-tier objects in apply order
pub fn objects(namespace: &str, merged: &MergedConfig, images: &DriverImages) -> Vec<DesiredObject> {
    let mut objects: Vec<DesiredObject> = vec![
        csi_driver().into(),
        service_account(NAME, namespace).into(),
        cluster_role(NAME, rules()).into(),
        cluster_role_binding(NAME, namespace).into(),
    ];
    objects.extend(storage_classes().into_iter().map(DesiredObject::from));
    objects.push(daemon_set(namespace, merged, images).into());
    objects
}

/// Host directory for one LVM metadata kind below the host write path
pub fn lvm_host_path(host_write_path: &str, dir: &str) -> String {
    format!("{}/{}", host_write_path.trim_end_matches('/'), dir)
}

/// Arguments of the driver container
pub fn driver_args(merged: &MergedConfig, provisioner_image: &str) -> Vec<String> {
    vec![
        format!("--drivername={}", DRIVER_NAME),
        "--endpoint=unix:///csi/csi.sock".to_string(),
        format!("--hostwritepath={}", merged.host_write_path),
        format!("--devices={}", merged.device_pattern),
        "--nodeid=$(KUBE_NODE_NAME)".to_string(),
        format!("--vgname={}", VOLUME_GROUP),
        format!("--namespace={}", NAMESPACE),
        format!("--provisionerImage={}", provisioner_image),
        "--pullpolicy=IfNotPresent".to_string(),
    ]
}

fn csi_driver() -> CSIDriver {
    CSIDriver {
        metadata: cluster_meta(DRIVER_NAME),
        spec: CSIDriverSpec {
            volume_lifecycle_modes: Some(vec!["Persistent".into(), "Ephemeral".into()]),
            pod_info_on_mount: Some(true),
            attach_required: Some(false),
            ..Default::default()
        },
    }
}

fn rules() -> Vec<PolicyRule> {
    vec![
        rule(
            "",
            "persistentvolumes",
            &["get", "list", "watch", "update", "patch", "create", "delete"],
        ),
        rule("", "persistentvolumeclaims", &["get", "list", "watch"]),
        rule("", "persistentvolumeclaims/status", &["update", "patch"]),
        rule("", "events", &["list", "watch", "update", "patch", "create"]),
        rule("", "nodes", &["get", "list", "watch"]),
        rule("", "pods", &["get", "list", "watch", "create", "delete"]),
    ]
}

fn daemon_set(namespace: &str, merged: &MergedConfig, images: &DriverImages) -> DaemonSet {
    let labels = BTreeMap::from([("app".to_string(), NAME.to_string())]);

    DaemonSet {
        metadata: namespaced_meta(NAME, namespace),
        spec: Some(DaemonSetSpec {
            revision_history_limit: Some(10),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(NAME.into()),
                    containers: vec![
                        registrar_container(images),
                        driver_container(merged, images),
                        liveness_container(images),
                    ],
                    volumes: Some(volumes(&merged.host_write_path)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn registrar_container(images: &DriverImages) -> Container {
    Container {
        name: "csi-node-driver-registrar".into(),
        image: Some(images.node_driver_registrar.clone()),
        image_pull_policy: Some("IfNotPresent".into()),
        args: Some(vec![
            "--v=5".into(),
            "--csi-address=/csi/csi.sock".into(),
            format!("--kubelet-registration-path={}/csi.sock", PLUGIN_DIR),
        ]),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(false),
            ..Default::default()
        }),
        env: Some(vec![node_name_env()]),
        volume_mounts: Some(vec![
            mount("/csi", "socket-dir"),
            mount(&format!("{}/csi.sock", PLUGIN_DIR), "socket-dir"),
            mount("/registration", "registration-dir"),
        ]),
        ..Default::default()
    }
}

fn driver_container(merged: &MergedConfig, images: &DriverImages) -> Container {
    let mut volume_mounts = vec![
        mount("/csi", "socket-dir"),
        bidirectional("/var/lib/kubelet/pods", "mountpoint-dir"),
        bidirectional("/var/lib/kubelet/plugins", "plugins-dir"),
        bidirectional("/dev", "dev-dir"),
        mount("/lib/modules", "mod-dir"),
    ];
    volume_mounts.extend(
        LVM_DIRS
            .iter()
            .map(|(volume, dir)| bidirectional(&format!("/etc/lvm/{}", dir), volume)),
    );

    Container {
        name: NAME.into(),
        image: Some(images.driver.clone()),
        image_pull_policy: Some("IfNotPresent".into()),
        args: Some(driver_args(merged, &images.provisioner)),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(false),
            privileged: Some(true),
            ..Default::default()
        }),
        env: Some(vec![node_name_env()]),
        liveness_probe: Some(Probe {
            failure_threshold: Some(PROBE_FAILURE_THRESHOLD),
            initial_delay_seconds: Some(PROBE_INITIAL_DELAY_SECONDS),
            period_seconds: Some(PROBE_PERIOD_SECONDS),
            success_threshold: Some(1),
            timeout_seconds: Some(PROBE_TIMEOUT_SECONDS),
            http_get: Some(HTTPGetAction {
                path: Some(HEALTH_PATH.into()),
                port: IntOrString::Int(HEALTH_PORT),
                scheme: Some("HTTP".into()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ports: Some(vec![ContainerPort {
            name: Some("healthz".into()),
            protocol: Some("TCP".into()),
            container_port: HEALTH_PORT,
            ..Default::default()
        }]),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

fn liveness_container(images: &DriverImages) -> Container {
    Container {
        name: "livenessprobe".into(),
        image: Some(images.liveness_probe.clone()),
        image_pull_policy: Some("IfNotPresent".into()),
        args: Some(vec![
            "--csi-address=/csi/csi.sock".into(),
            format!("--health-port={}", HEALTH_PORT),
        ]),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        volume_mounts: Some(vec![mount("/csi", "socket-dir")]),
        ..Default::default()
    }
}

fn volumes(host_write_path: &str) -> Vec<Volume> {
    let mut volumes = vec![
        host_path("socket-dir", PLUGIN_DIR, Some("DirectoryOrCreate")),
        host_path("mountpoint-dir", "/var/lib/kubelet/pods", Some("DirectoryOrCreate")),
        host_path("registration-dir", "/var/lib/kubelet/plugins_registry", Some("Directory")),
        host_path("plugins-dir", "/var/lib/kubelet/plugins", Some("Directory")),
        host_path("dev-dir", "/dev", Some("Directory")),
        host_path("mod-dir", "/lib/modules", None),
    ];
    volumes.extend(LVM_DIRS.iter().map(|(volume, dir)| {
        host_path(
            volume,
            &lvm_host_path(host_write_path, dir),
            Some("DirectoryOrCreate"),
        )
    }));
    volumes
}

fn host_path(name: &str, path: &str, type_: Option<&str>) -> Volume {
    Volume {
        name: name.into(),
        host_path: Some(HostPathVolumeSource {
            path: path.into(),
            type_: type_.map(String::from),
        }),
        ..Default::default()
    }
}

fn mount(path: &str, name: &str) -> VolumeMount {
    VolumeMount {
        mount_path: path.into(),
        name: name.into(),
        ..Default::default()
    }
}

fn bidirectional(path: &str, name: &str) -> VolumeMount {
    VolumeMount {
        mount_propagation: Some("Bidirectional".into()),
        ..mount(path, name)
    }
}

fn node_name_env() -> EnvVar {
    EnvVar {
        name: "KUBE_NODE_NAME".into(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".into()),
                field_path: "spec.nodeName".into(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::tests::{merged, FixedResolver};
    use crate::resources::{build, NAMESPACE};

    fn pod_spec(host: &str, devices: &str) -> PodSpec {
        let set = build(&merged(host, devices), NAMESPACE, &FixedResolver::complete()).unwrap();
        match set.get("DaemonSet", NAME) {
            Some(DesiredObject::DaemonSet(ds)) => ds.clone().spec.unwrap().template.spec.unwrap(),
            other => panic!("unexpected object: {:?}", other),
        }
    }

    fn host_paths(pod: &PodSpec) -> BTreeMap<String, String> {
        pod.volumes
            .as_ref()
            .unwrap()
            .iter()
            .map(|v| (v.name.clone(), v.host_path.as_ref().unwrap().path.clone()))
            .collect()
    }

    #[test]
    fn test_host_write_path_threaded_into_lvm_volumes() {
        let paths = host_paths(&pod_spec("/data/lvm", "/dev/sd*"));
        assert_eq!(paths["lvmcache"], "/data/lvm/cache");
        assert_eq!(paths["lvmarchive"], "/data/lvm/archive");
        assert_eq!(paths["lvmbackup"], "/data/lvm/backup");
        assert_eq!(paths["lvmlock"], "/data/lvm/lock");
    }

    #[test]
    fn test_trailing_slash_not_doubled() {
        assert_eq!(lvm_host_path("/data/lvm/", "lock"), "/data/lvm/lock");
        assert_eq!(lvm_host_path("/", "lock"), "/lock");
    }

    #[test]
    fn test_driver_args() {
        let args = driver_args(&merged("/data/lvm", "/dev/sd*"), "example.com/prov:v1");
        assert_eq!(
            args,
            vec![
                "--drivername=lvm.csi.metal-stack.io",
                "--endpoint=unix:///csi/csi.sock",
                "--hostwritepath=/data/lvm",
                "--devices=/dev/sd*",
                "--nodeid=$(KUBE_NODE_NAME)",
                "--vgname=csi-lvm",
                "--namespace=kube-system",
                "--provisionerImage=example.com/prov:v1",
                "--pullpolicy=IfNotPresent",
            ]
        );
    }

    #[test]
    fn test_driver_container_liveness_probe() {
        let pod = pod_spec("/data/lvm", "/dev/sd*");
        let driver = pod.containers.iter().find(|c| c.name == NAME).unwrap();
        let probe = driver.liveness_probe.as_ref().unwrap();

        assert_eq!(probe.failure_threshold, Some(5));
        assert_eq!(probe.period_seconds, Some(2));
        assert_eq!(probe.initial_delay_seconds, Some(10));

        let http = probe.http_get.as_ref().unwrap();
        assert_eq!(http.path.as_deref(), Some("/healthz"));
        assert_eq!(http.port, IntOrString::Int(9898));

        let port = &driver.ports.as_ref().unwrap()[0];
        assert_eq!(port.container_port, 9898);
    }

    #[test]
    fn test_driver_uses_resolved_provisioner_image() {
        let pod = pod_spec("/data/lvm", "");
        let driver = pod.containers.iter().find(|c| c.name == NAME).unwrap();
        assert!(driver
            .args
            .as_ref()
            .unwrap()
            .contains(&"--provisionerImage=example.com/csi-driver-lvm-provisioner:v1.0.0".to_string()));
        assert_eq!(
            driver.image.as_deref(),
            Some("example.com/csi-driver-lvm:v1.0.0")
        );
    }

    #[test]
    fn test_every_mount_has_a_volume() {
        let pod = pod_spec("/data/lvm", "");
        let paths = host_paths(&pod);
        for container in &pod.containers {
            for mount in container.volume_mounts.as_ref().unwrap() {
                assert!(
                    paths.contains_key(&mount.name),
                    "{} mounts unknown volume {}",
                    container.name,
                    mount.name
                );
            }
        }
    }

    #[test]
    fn test_csi_driver_spec() {
        let driver = csi_driver();
        assert_eq!(driver.metadata.name.as_deref(), Some(DRIVER_NAME));
        assert_eq!(driver.spec.attach_required, Some(false));
        assert_eq!(driver.spec.pod_info_on_mount, Some(true));
    }
}
