//! Operator Configuration
//!
//! Process-wide configuration loaded once at startup and shared read-only by
//! every reconcile, plus the merge of extension-supplied driver settings with
//! those defaults.

pub mod merge;

pub use merge::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// API version accepted for the operator configuration file
pub const CONFIG_API_VERSION: &str =
    "csi-driver-lvm.metal.extensions.config.gardener.cloud/v1alpha1";

/// Kind accepted for the operator configuration file
pub const CONFIG_KIND: &str = "ControllerConfiguration";

// =============================================================================
// Controller Configuration
// =============================================================================

/// Operator-wide defaults for the csi-driver-lvm extension.
///
/// Loaded once before the first reconcile and never mutated afterwards, so
/// it can be shared behind an `Arc` without synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Host path used by the driver when the extension does not set one
    #[serde(default)]
    pub default_host_write_path: Option<String>,

    /// Device glob used by the driver when the extension does not set one
    #[serde(default)]
    pub default_device_pattern: Option<String>,

    /// Health check settings
    #[serde(default)]
    pub health_check_config: Option<HealthCheckConfig>,
}

/// Health check settings of the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Interval between health observations, e.g. "30s", "1m" or "5m0s"
    #[serde(default = "default_sync_period", with = "humantime_serde")]
    pub sync_period: Duration,
}

fn default_sync_period() -> Duration {
    Duration::from_secs(30)
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            sync_period: default_sync_period(),
        }
    }
}

impl ControllerConfiguration {
    /// Parse a configuration document (YAML or JSON)
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ControllerConfiguration = serde_yaml::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid controller configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Reject foreign type meta
    pub fn validate(&self) -> Result<()> {
        if let Some(api_version) = &self.api_version {
            if api_version != CONFIG_API_VERSION {
                return Err(Error::Configuration(format!(
                    "unsupported apiVersion {}",
                    api_version
                )));
            }
        }
        if let Some(kind) = &self.kind {
            if kind != CONFIG_KIND {
                return Err(Error::Configuration(format!("unsupported kind {}", kind)));
            }
        }
        Ok(())
    }

    /// Health check settings, falling back to the defaults
    pub fn health_check(&self) -> HealthCheckConfig {
        self.health_check_config.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_parse_full_configuration() {
        let yaml = r#"
apiVersion: csi-driver-lvm.metal.extensions.config.gardener.cloud/v1alpha1
kind: ControllerConfiguration
defaultHostWritePath: /etc/lvm
defaultDevicePattern: /dev/nvme[0-9]n[0-9]
healthCheckConfig:
  syncPeriod: 1m
"#;
        let config = ControllerConfiguration::from_yaml(yaml).unwrap();
        assert_eq!(config.default_host_write_path.as_deref(), Some("/etc/lvm"));
        assert_eq!(
            config.default_device_pattern.as_deref(),
            Some("/dev/nvme[0-9]n[0-9]")
        );
        assert_eq!(
            config.health_check().sync_period,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_empty_configuration_uses_defaults() {
        let config = ControllerConfiguration::from_yaml("{}").unwrap();
        assert_eq!(config.default_host_write_path, None);
        assert_eq!(config.default_device_pattern, None);
        assert_eq!(
            config.health_check().sync_period,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let err = ControllerConfiguration::from_yaml("kind: Something\n").unwrap_err();
        assert_matches!(err, Error::Configuration(_));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "defaultHostWritePath: /var/lvm").unwrap();

        let config = ControllerConfiguration::load(file.path()).unwrap();
        assert_eq!(config.default_host_write_path.as_deref(), Some("/var/lvm"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ControllerConfiguration::load("/nonexistent/config.yaml").unwrap_err();
        assert_matches!(err, Error::Configuration(_));
    }

    #[test]
    fn test_go_style_sync_periods() {
        for (raw, expected) in [
            ("1m30s", Duration::from_secs(90)),
            ("5m0s", Duration::from_secs(300)),
            ("1h0m0s", Duration::from_secs(3600)),
            ("500ms", Duration::from_millis(500)),
        ] {
            let yaml = format!("healthCheckConfig:\n  syncPeriod: {}\n", raw);
            let config = ControllerConfiguration::from_yaml(&yaml).unwrap();
            assert_eq!(config.health_check().sync_period, expected, "{}", raw);
        }
    }

    #[test]
    fn test_invalid_sync_period_rejected() {
        for raw in ["soon", "10x", "18446744073709551615h"] {
            let yaml = format!("healthCheckConfig:\n  syncPeriod: {}\n", raw);
            let err = ControllerConfiguration::from_yaml(&yaml).unwrap_err();
            assert_matches!(err, Error::Configuration(_));
        }
    }
}
