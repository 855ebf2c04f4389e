//! Operator configuration
//!
//! Loaded from a YAML file (default: `~/.workerpool/config.yaml`). A missing
//! file yields the defaults; CLI flags override individual fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default field manager / event reporter name
pub const DEFAULT_REPORTER: &str = "workerpool-controller";

/// Default config file location: ~/.workerpool/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".workerpool")
        .join("config.yaml")
}

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level operator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Namespace to watch (all namespaces when unset)
    #[serde(default)]
    pub namespace: Option<String>,

    /// Requeue delay after a successful pass (periodic resync)
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Requeue delay after a failed pass
    #[serde(default = "default_error_requeue")]
    pub error_requeue_secs: u64,

    /// Maximum number of pools reconciled concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: u16,

    /// Update retries on optimistic-concurrency conflicts within one pass
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    /// Reporter name attached to emitted events
    #[serde(default = "default_reporter")]
    pub reporter: String,

    /// Publish Kubernetes Events; when false, events only go to the log
    #[serde(default = "default_publish_events")]
    pub publish_events: bool,

    /// Container and storage settings for built workloads
    #[serde(default)]
    pub workload: WorkloadSettings,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            resync_interval_secs: default_resync_interval(),
            error_requeue_secs: default_error_requeue(),
            concurrency: default_concurrency(),
            max_conflict_retries: default_max_conflict_retries(),
            reporter: default_reporter(),
            publish_events: default_publish_events(),
            workload: WorkloadSettings::default(),
        }
    }
}

impl OperatorConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    /// Reject values the controller cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resync_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "resyncIntervalSecs must be greater than 0".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.workload.image.is_empty() {
            return Err(ConfigError::Invalid("workload.image must not be empty".to_string()));
        }
        Ok(())
    }
}

fn default_resync_interval() -> u64 {
    300
}

fn default_error_requeue() -> u64 {
    15
}

fn default_concurrency() -> u16 {
    4
}

fn default_max_conflict_retries() -> u32 {
    3
}

fn default_reporter() -> String {
    DEFAULT_REPORTER.to_string()
}

fn default_publish_events() -> bool {
    true
}

/// Settings shared by every workload the operator builds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSettings {
    /// Container name inside launcher and worker pods
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Image holding the UPC++ graph library and application
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_image_pull_policy")]
    pub image_pull_policy: String,

    /// Informational port exposed by services and containers
    #[serde(default = "default_port")]
    pub port: i32,

    /// Storage requested by each worker's volume claim
    #[serde(default = "default_storage_request")]
    pub storage_request: String,

    #[serde(default = "default_mount_path")]
    pub mount_path: String,

    /// Value of `UPCXX_NETWORK`
    #[serde(default = "default_network")]
    pub network: String,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            container_name: default_container_name(),
            image: default_image(),
            image_pull_policy: default_image_pull_policy(),
            port: default_port(),
            storage_request: default_storage_request(),
            mount_path: default_mount_path(),
            network: default_network(),
        }
    }
}

fn default_container_name() -> String {
    "pgasgraph".to_string()
}

fn default_image() -> String {
    "pgasgraph:v0.1".to_string()
}

fn default_image_pull_policy() -> String {
    "Never".to_string()
}

fn default_port() -> i32 {
    80
}

fn default_storage_request() -> String {
    "500".to_string()
}

fn default_mount_path() -> String {
    "/vmount".to_string()
}

fn default_network() -> String {
    "udp".to_string()
}

// ============================================================================
// Parsing (no I/O)
// ============================================================================

/// Parse config from a YAML string
pub fn parse_config(content: &str) -> Result<OperatorConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(OperatorConfig::default());
    }
    let config: OperatorConfig =
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Load config from a specific path, falling back to defaults when absent
pub fn load_config_from(path: &Path) -> Result<OperatorConfig, ConfigError> {
    if !path.exists() {
        return Ok(OperatorConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.namespace, None);
        assert_eq!(config.resync_interval(), Duration::from_secs(300));
        assert_eq!(config.error_requeue(), Duration::from_secs(15));
        assert_eq!(config.max_conflict_retries, 3);
        assert!(config.publish_events);
        assert_eq!(config.workload.image, "pgasgraph:v0.1");
        assert_eq!(config.workload.network, "udp");
        assert_eq!(config.workload.storage_request, "500");
    }

    #[test]
    fn test_parse_partial_config() {
        let yaml = r#"
namespace: graphs
concurrency: 8
workload:
  image: registry.local/pgasgraph:v0.2
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.namespace.as_deref(), Some("graphs"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.workload.image, "registry.local/pgasgraph:v0.2");
        // Untouched fields keep their defaults
        assert_eq!(config.workload.mount_path, "/vmount");
        assert_eq!(config.resync_interval_secs, 300);
    }

    #[test]
    fn test_parse_empty_config() {
        assert_eq!(parse_config("").unwrap(), OperatorConfig::default());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_config("concurrency: [");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let result = parse_config("concurrency: 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_config_file() {
        let file = create_temp_file("resyncIntervalSecs: 60\nmaxConflictRetries: 5\n");
        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config.resync_interval_secs, 60);
        assert_eq!(config.max_conflict_retries, 5);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = load_config_from(Path::new("/nonexistent/workerpool.yaml")).unwrap();
        assert_eq!(config, OperatorConfig::default());
    }
}
