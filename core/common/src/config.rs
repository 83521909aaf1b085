//! Daemon configuration contract.
//!
//! This mirrors the YAML schema the (external, out of scope) configuration
//! loader reads. We only fix the shape: validation, defaulting, and hot
//! reload belong to that external loader.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub fuse: FuseConfig,
    pub caching: CachingConfig,
    pub services: ServicesConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dev: DevConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub uds_socket: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuseConfig {
    pub root_mount_path: PathBuf,
    pub backing_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachingConfig {
    pub thumbnails: ThumbnailConfig,
    pub http: HttpCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    pub sizes: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCacheConfig {
    pub enabled: bool,
    pub max_preview_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub db_sweeper: DbSweeperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSweeperConfig {
    pub sweep_interval_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_rotation_days: u32,
    pub audit_log_rotation_days: u32,
    pub levels: LogLevels,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLevels {
    pub console_log_level: String,
    #[serde(flatten)]
    pub per_subsystem: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Subsystems recognized in `logging.levels`, matching the daemon's tracing
/// targets one-for-one.
pub const SUBSYSTEMS: &[&str] = &[
    "vaulthalla",
    "fuse",
    "filesystem",
    "crypto",
    "cloud",
    "auth",
    "websocket",
    "http",
    "shell",
    "db",
    "sync",
    "thumb",
    "storage",
    "types",
];

impl Config {
    /// Parse the configuration contract's shape from a YAML document.
    ///
    /// This performs no defaulting or cross-field validation; that is the
    /// external loader's responsibility.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
server:
  uds_socket: /run/vaulthalla.sock
fuse:
  root_mount_path: /mnt/vaulthalla
  backing_path: /var/lib/vaulthalla
caching:
  thumbnails:
    sizes: [64, 256]
  http:
    enabled: true
    max_preview_size_bytes: 1048576
services:
  db_sweeper:
    sweep_interval_minutes: 30
logging:
  log_rotation_days: 7
  audit_log_rotation_days: 30
  levels:
    console_log_level: info
    sync: debug
"#;
        let cfg = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.caching.thumbnails.sizes, vec![64, 256]);
        assert_eq!(
            cfg.logging.levels.per_subsystem.get("sync").map(String::as_str),
            Some("debug")
        );
        assert!(!cfg.dev.enabled);
    }
}
