//! Runtime configuration
//!
//! Loaded from a TOML file with serde defaults for every field, so an
//! empty file (or no file at all) yields a working configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorralConfig {
    /// Seconds without a heartbeat before a node is classified Unhealthy
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,

    /// Interval of the liveness probe loop (logs health transitions)
    #[serde(default = "default_probe_interval")]
    pub heartbeat_probe_interval_seconds: u64,

    /// Interval at which each node's emitter stamps the liveness detector
    #[serde(default = "default_emit_interval")]
    pub heartbeat_emit_interval_seconds: u64,

    /// Interval between repair-controller reconciliation cycles
    #[serde(default = "default_repair_interval")]
    pub repair_interval_seconds: u64,

    /// CPU capacity assumed when an add-node request omits one
    #[serde(default = "default_node_cpu")]
    pub default_node_cpu: u32,

    /// CPU request assumed when a schedule-pod request omits one
    #[serde(default = "default_pod_cpu")]
    pub default_pod_cpu: u32,

    /// Backing-resource configuration
    #[serde(default)]
    pub backing: BackingConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_heartbeat_timeout() -> u64 {
    10
}

fn default_probe_interval() -> u64 {
    5
}

fn default_emit_interval() -> u64 {
    5
}

fn default_repair_interval() -> u64 {
    5
}

fn default_node_cpu() -> u32 {
    100
}

fn default_pod_cpu() -> u32 {
    10
}

impl Default for CorralConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
            heartbeat_probe_interval_seconds: default_probe_interval(),
            heartbeat_emit_interval_seconds: default_emit_interval(),
            repair_interval_seconds: default_repair_interval(),
            default_node_cpu: default_node_cpu(),
            default_pod_cpu: default_pod_cpu(),
            backing: BackingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl CorralConfig {
    /// Load from a TOML file, writing the defaults out if the file does
    /// not exist yet
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            let config: CorralConfig =
                toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            let config = CorralConfig::default();
            let raw =
                toml::to_string_pretty(&config).map_err(|e| Error::Config(e.to_string()))?;
            fs::write(path, raw)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            Ok(config)
        }
    }

    /// Reject configurations no component can run under
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_timeout_seconds == 0 {
            return Err(Error::Config(
                "heartbeat_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.default_node_cpu == 0 || self.default_pod_cpu == 0 {
            return Err(Error::Config(
                "default_node_cpu and default_pod_cpu must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_probe_interval_seconds)
    }

    pub fn emit_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_emit_interval_seconds)
    }

    pub fn repair_interval(&self) -> Duration {
        Duration::from_secs(self.repair_interval_seconds)
    }
}

/// How node backing resources are provisioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackingMode {
    /// No external resource; handles are synthesized in-process
    #[default]
    Simulated,
    /// A wired [`BackingProvider`](crate::BackingProvider) owns the resource
    External,
}

/// What to do when the backing provider fails to create a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackingErrorPolicy {
    /// Fall back to a simulated handle and flag the node as degraded
    #[default]
    Degrade,
    /// Reject the registration; no record is kept
    Reject,
}

/// Backing-resource configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BackingConfig {
    #[serde(default)]
    pub mode: BackingMode,

    #[serde(default)]
    pub on_error: BackingErrorPolicy,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CorralConfig::default();
        assert_eq!(config.heartbeat_timeout_seconds, 10);
        assert_eq!(config.heartbeat_probe_interval_seconds, 5);
        assert_eq!(config.heartbeat_emit_interval_seconds, 5);
        assert_eq!(config.repair_interval_seconds, 5);
        assert_eq!(config.default_node_cpu, 100);
        assert_eq!(config.default_pod_cpu, 10);
        assert_eq!(config.backing.mode, BackingMode::Simulated);
        assert_eq!(config.backing.on_error, BackingErrorPolicy::Degrade);
        assert_eq!(config.server.bind_addr, "127.0.0.1:8000");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: CorralConfig = toml::from_str(
            r#"
            heartbeat_timeout_seconds = 3

            [backing]
            on_error = "reject"
            "#,
        )
        .unwrap();

        assert_eq!(config.heartbeat_timeout_seconds, 3);
        assert_eq!(config.backing.on_error, BackingErrorPolicy::Reject);
        // Untouched fields keep their defaults
        assert_eq!(config.repair_interval_seconds, 5);
        assert_eq!(config.default_node_cpu, 100);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corral.toml");

        let created = CorralConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.heartbeat_timeout_seconds, 10);

        // Second load reads the file back
        let loaded = CorralConfig::load_or_create(&path).unwrap();
        assert_eq!(loaded.server.bind_addr, created.server.bind_addr);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = CorralConfig {
            heartbeat_timeout_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = CorralConfig::default();
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(10));
        assert_eq!(config.emit_interval(), Duration::from_secs(5));
    }
}
