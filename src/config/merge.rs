//! Driver configuration decoding and merging
//!
//! The provider config attached to an Extension is decoded strictly into a
//! [`DriverConfig`] and then merged with the operator defaults into a
//! [`MergedConfig`] whose fields are always resolved.

use crate::config::ControllerConfiguration;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// API version of the provider config
pub const DRIVER_CONFIG_API_VERSION: &str =
    "csi-driver-lvm.metal.extensions.gardener.cloud/v1alpha1";

/// Kind of the provider config
pub const DRIVER_CONFIG_KIND: &str = "CsiDriverLvmConfig";

// =============================================================================
// Driver Configuration
// =============================================================================

/// Provider configuration of a csi-driver-lvm Extension.
///
/// Both fields are optional; an unset field means "use the operator default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DriverConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Filesystem root used by the driver on each node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_write_path: Option<String>,

    /// Glob selecting block devices eligible for the volume group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_pattern: Option<String>,
}

/// Decode raw provider config bytes (YAML or JSON).
///
/// Unknown fields and foreign type meta are rejected.
pub fn decode_provider_config(raw: &[u8]) -> Result<DriverConfig> {
    let config: DriverConfig =
        serde_yaml::from_slice(raw).map_err(|e| Error::Decode(e.to_string()))?;
    check_type_meta(&config)?;
    Ok(config)
}

/// Decode a provider config already parsed into a JSON value, as found in
/// the Extension resource.
pub fn decode_provider_config_value(value: &serde_json::Value) -> Result<DriverConfig> {
    let config: DriverConfig =
        serde_json::from_value(value.clone()).map_err(|e| Error::Decode(e.to_string()))?;
    check_type_meta(&config)?;
    Ok(config)
}

fn check_type_meta(config: &DriverConfig) -> Result<()> {
    if let Some(api_version) = &config.api_version {
        if api_version != DRIVER_CONFIG_API_VERSION {
            return Err(Error::Decode(format!(
                "no kind {} is registered for version {}",
                config.kind.as_deref().unwrap_or(DRIVER_CONFIG_KIND),
                api_version
            )));
        }
    }
    if let Some(kind) = &config.kind {
        if kind != DRIVER_CONFIG_KIND {
            return Err(Error::Decode(format!(
                "no kind {} is registered for version {}",
                kind, DRIVER_CONFIG_API_VERSION
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Merged Configuration
// =============================================================================

/// Driver configuration with every field resolved.
///
/// An empty string is a terminal value and is never re-resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedConfig {
    pub host_write_path: String,
    pub device_pattern: String,
}

/// Merge extension-supplied settings with the operator defaults.
///
/// For each field: a present extension value is kept verbatim, even when
/// empty, else the operator default, else the empty string. Never fails.
pub fn merge(extension: Option<&DriverConfig>, defaults: &ControllerConfiguration) -> MergedConfig {
    let (host_write_path, device_pattern) = match extension {
        Some(config) => (
            config.host_write_path.as_deref(),
            config.device_pattern.as_deref(),
        ),
        None => (None, None),
    };

    MergedConfig {
        host_write_path: resolve(host_write_path, defaults.default_host_write_path.as_deref()),
        device_pattern: resolve(device_pattern, defaults.default_device_pattern.as_deref()),
    }
}

fn resolve(explicit: Option<&str>, default: Option<&str>) -> String {
    explicit
        .or(default)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn defaults(host: Option<&str>, devices: Option<&str>) -> ControllerConfiguration {
        ControllerConfiguration {
            default_host_write_path: host.map(String::from),
            default_device_pattern: devices.map(String::from),
            ..Default::default()
        }
    }

    fn driver(host: Option<&str>, devices: Option<&str>) -> DriverConfig {
        DriverConfig {
            host_write_path: host.map(String::from),
            device_pattern: devices.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_explicit_value_wins_over_default() {
        let merged = merge(
            Some(&driver(Some("/data/lvm"), None)),
            &defaults(Some("/etc/lvm"), Some("/dev/sd*")),
        );
        assert_eq!(merged.host_write_path, "/data/lvm");
        assert_eq!(merged.device_pattern, "/dev/sd*");
    }

    #[test]
    fn test_absent_config_equals_empty_config() {
        let defaults = defaults(Some("/etc/lvm"), Some("/dev/nvme*"));
        assert_eq!(
            merge(None, &defaults),
            merge(Some(&DriverConfig::default()), &defaults)
        );
    }

    #[test]
    fn test_nothing_set_degenerates_to_empty_strings() {
        let merged = merge(None, &defaults(None, None));
        assert_eq!(merged, MergedConfig::default());
        assert_eq!(merged.host_write_path, "");
        assert_eq!(merged.device_pattern, "");
    }

    #[test]
    fn test_empty_explicit_value_is_kept() {
        let merged = merge(
            Some(&driver(Some(""), Some(""))),
            &defaults(Some("/etc/lvm"), Some("/dev/sd*")),
        );
        assert_eq!(merged.host_write_path, "");
        assert_eq!(merged.device_pattern, "");
    }

    #[test]
    fn test_merge_is_total() {
        let values = [None, Some(""), Some("x")];
        for ext_host in values {
            for ext_dev in values {
                for def_host in values {
                    for def_dev in values {
                        let ext = driver(ext_host, ext_dev);
                        let merged = merge(Some(&ext), &defaults(def_host, def_dev));

                        let want_host = ext_host.or(def_host).unwrap_or("");
                        let want_dev = ext_dev.or(def_dev).unwrap_or("");
                        assert_eq!(merged.host_write_path, want_host);
                        assert_eq!(merged.device_pattern, want_dev);
                    }
                }
            }
        }
    }

    #[test]
    fn test_decode_yaml_provider_config() {
        let raw = br#"
apiVersion: csi-driver-lvm.metal.extensions.gardener.cloud/v1alpha1
kind: CsiDriverLvmConfig
hostWritePath: /data/lvm
"#;
        let config = decode_provider_config(raw).unwrap();
        assert_eq!(config.host_write_path.as_deref(), Some("/data/lvm"));
        assert_eq!(config.device_pattern, None);
    }

    #[test]
    fn test_decode_json_provider_config() {
        let raw = br#"{"devicePattern": "/dev/sd*"}"#;
        let config = decode_provider_config(raw).unwrap();
        assert_eq!(config.device_pattern.as_deref(), Some("/dev/sd*"));
    }

    #[test]
    fn test_decode_rejects_unknown_fields() {
        let raw = br#"{"hostWritePath": "/data", "volumeGroup": "vg0"}"#;
        assert_matches!(decode_provider_config(raw), Err(Error::Decode(_)));

        let value = serde_json::json!({"devicepattern": "/dev/sd*"});
        assert_matches!(decode_provider_config_value(&value), Err(Error::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_foreign_kind() {
        let value = serde_json::json!({"kind": "Other", "hostWritePath": "/data"});
        assert_matches!(decode_provider_config_value(&value), Err(Error::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_malformed_bytes() {
        assert_matches!(decode_provider_config(b"hostWritePath: [unclosed"), Err(Error::Decode(_)));
    }
}
