//! Cluster configuration
//!
//! `ClusterConfig` is the single configuration struct consumed by the pool,
//! the capability detector, the DDL orchestrator and the bulk loader. It is
//! loaded from environment variables or from a YAML file, with defaults for
//! every field except the host list.

use crate::constants::*;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// HOST ADDRESS
// ============================================================================

/// `host:port` address of one cluster member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostAddress(String);

impl HostAddress {
    /// Build an address, appending `default_port` when `raw` has no port.
    pub fn new(raw: impl Into<String>, default_port: u16) -> Self {
        let raw = raw.into();
        let raw = raw.trim();
        if Self::split(raw).1.is_some() {
            Self(raw.to_string())
        } else {
            Self(format!("{}:{}", raw, default_port))
        }
    }

    /// Host part without the port.
    pub fn host(&self) -> &str {
        Self::split(&self.0).0
    }

    /// Port part, if present.
    pub fn port(&self) -> Option<u16> {
        Self::split(&self.0).1
    }

    /// Same host on another port.
    pub fn with_port(&self, port: u16) -> Self {
        Self(format!("{}:{}", self.host(), port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(raw: &str) -> (&str, Option<u16>) {
        match raw.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
                match port.parse::<u16>() {
                    Ok(port) => (host, Some(port)),
                    Err(_) => (raw, None),
                }
            }
            _ => (raw, None),
        }
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HostAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// CLUSTER CONFIGURATION
// ============================================================================

/// ClickHouse cluster configuration.
///
/// `use_replicated`, `use_distributed` and `table_suffix` are written by
/// capability detection; everything else is read-only after loading.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster members, `host:tcp_port`
    pub hosts: Vec<HostAddress>,
    /// Default port appended to bare host names
    pub tcp_port: u16,
    /// Port of the HTTP interface on every host
    pub http_port: u16,
    /// Cluster name used by Distributed tables (empty disables them)
    pub cluster_name: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub table_prefix: String,
    pub table_suffix: String,
    /// Maximum rows per block sent by the server
    pub block_size: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// Drop tables before creating them
    pub drop_table: bool,
    pub use_distributed: bool,
    pub use_replicated: bool,
    /// Verbose connection strings and debug logging
    pub debug: bool,
    /// ZooKeeper root for ReplicatedMergeTree paths
    pub zookeeper_path: String,
    pub health_check_interval_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            tcp_port: DEFAULT_TCP_PORT,
            http_port: DEFAULT_HTTP_PORT,
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: String::new(),
            table_prefix: String::new(),
            table_suffix: String::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
            drop_table: false,
            use_distributed: false,
            use_replicated: false,
            debug: false,
            zookeeper_path: DEFAULT_ZOOKEEPER_PATH.to_string(),
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
        }
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("hosts", &self.hosts)
            .field("tcp_port", &self.tcp_port)
            .field("http_port", &self.http_port)
            .field("cluster_name", &self.cluster_name)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("table_prefix", &self.table_prefix)
            .field("table_suffix", &self.table_suffix)
            .field("block_size", &self.block_size)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("write_timeout_secs", &self.write_timeout_secs)
            .field("drop_table", &self.drop_table)
            .field("use_distributed", &self.use_distributed)
            .field("use_replicated", &self.use_replicated)
            .field("debug", &self.debug)
            .field("zookeeper_path", &self.zookeeper_path)
            .field("health_check_interval_secs", &self.health_check_interval_secs)
            .finish()
    }
}

impl ClusterConfig {
    /// Create ClusterConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CHPRO_HOSTS`: Comma-separated `host[:port]` list
    /// - `CHPRO_TCP_PORT`: Default port for bare hosts (default: 9000)
    /// - `CHPRO_HTTP_PORT`: HTTP interface port (default: 8123)
    /// - `CHPRO_CLUSTER_NAME`: Cluster for Distributed tables (default: "default")
    /// - `CHPRO_DATABASE`, `CHPRO_USERNAME`, `CHPRO_PASSWORD`
    /// - `CHPRO_TABLE_PREFIX`, `CHPRO_TABLE_SUFFIX`
    /// - `CHPRO_BLOCK_SIZE` (default: 100000)
    /// - `CHPRO_READ_TIMEOUT_SECS`, `CHPRO_WRITE_TIMEOUT_SECS` (default: 600)
    /// - `CHPRO_DROP_TABLE`, `CHPRO_DEBUG`: "true" or "false"
    /// - `CHPRO_ZOOKEEPER_PATH` (default: "/clickhouse")
    /// - `CHPRO_HEALTH_CHECK_INTERVAL_SECS` (default: 60)
    ///
    /// Hosts are normalised; call [`ClusterConfig::validate`] before use.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tcp_port = env_parse("CHPRO_TCP_PORT").unwrap_or(defaults.tcp_port);

        let hosts = std::env::var("CHPRO_HOSTS")
            .ok()
            .map(|s| parse_host_list(&s, tcp_port))
            .unwrap_or_default();

        Self {
            hosts,
            tcp_port,
            http_port: env_parse("CHPRO_HTTP_PORT").unwrap_or(defaults.http_port),
            cluster_name: std::env::var("CHPRO_CLUSTER_NAME").unwrap_or(defaults.cluster_name),
            database: std::env::var("CHPRO_DATABASE").unwrap_or(defaults.database),
            username: std::env::var("CHPRO_USERNAME").unwrap_or(defaults.username),
            password: std::env::var("CHPRO_PASSWORD").unwrap_or_default(),
            table_prefix: std::env::var("CHPRO_TABLE_PREFIX").unwrap_or_default(),
            table_suffix: std::env::var("CHPRO_TABLE_SUFFIX").unwrap_or_default(),
            block_size: env_parse("CHPRO_BLOCK_SIZE").unwrap_or(defaults.block_size),
            read_timeout_secs: env_parse("CHPRO_READ_TIMEOUT_SECS")
                .unwrap_or(defaults.read_timeout_secs),
            write_timeout_secs: env_parse("CHPRO_WRITE_TIMEOUT_SECS")
                .unwrap_or(defaults.write_timeout_secs),
            drop_table: env_flag("CHPRO_DROP_TABLE"),
            use_distributed: false,
            use_replicated: false,
            debug: env_flag("CHPRO_DEBUG"),
            zookeeper_path: std::env::var("CHPRO_ZOOKEEPER_PATH")
                .unwrap_or(defaults.zookeeper_path),
            health_check_interval_secs: env_parse("CHPRO_HEALTH_CHECK_INTERVAL_SECS")
                .unwrap_or(defaults.health_check_interval_secs),
        }
    }

    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseFailed {
                source_name: "cluster config".to_string(),
                reason: e.to_string(),
            })?;
        config.normalize_hosts();
        Ok(config)
    }

    /// Load and parse a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Check required fields and normalise host ports.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "hosts".to_string(),
            });
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "database".to_string(),
            });
        }
        if self.http_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http_port".to_string(),
                value: self.http_port.to_string(),
                reason: "must be a non-zero port".to_string(),
            });
        }
        if self.health_check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health_check_interval_secs".to_string(),
                value: "0".to_string(),
                reason: "must be at least one second".to_string(),
            });
        }
        self.normalize_hosts();
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// `<prefix><name><suffix>` for a logical table name.
    pub fn full_table_name(&self, table: &str) -> String {
        format!("{}{}{}", self.table_prefix, table, self.table_suffix)
    }

    fn normalize_hosts(&mut self) {
        let port = self.tcp_port;
        self.hosts = self
            .hosts
            .iter()
            .map(|h| HostAddress::new(h.as_str(), port))
            .collect();
    }
}

/// Split a comma-separated host list, dropping empty entries.
pub fn parse_host_list(raw: &str, default_port: u16) -> Vec<HostAddress> {
    raw.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(|h| HostAddress::new(h, default_port))
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_address_appends_default_port() {
        let host = HostAddress::new("ch1", 9000);
        assert_eq!(host.as_str(), "ch1:9000");
        assert_eq!(host.host(), "ch1");
        assert_eq!(host.port(), Some(9000));
    }

    #[test]
    fn test_host_address_keeps_explicit_port() {
        let host = HostAddress::new(" 10.0.0.5:9440 ", 9000);
        assert_eq!(host.as_str(), "10.0.0.5:9440");
        assert_eq!(host.with_port(8123).as_str(), "10.0.0.5:8123");
    }

    #[test]
    fn test_host_address_ipv6_literal_without_port() {
        let host = HostAddress::new("[::1]", 9000);
        assert_eq!(host.as_str(), "[::1]:9000");
        assert_eq!(host.host(), "[::1]");
    }

    #[test]
    fn test_parse_host_list() {
        let hosts = parse_host_list("ch1, ch2:9001,,", 9000);
        assert_eq!(
            hosts,
            vec![HostAddress::new("ch1:9000", 9000), HostAddress::new("ch2:9001", 9000)]
        );
    }

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::default();
        assert!(config.hosts.is_empty());
        assert_eq!(config.tcp_port, 9000);
        assert_eq!(config.http_port, 8123);
        assert_eq!(config.cluster_name, "default");
        assert_eq!(config.block_size, 100_000);
        assert_eq!(config.read_timeout(), Duration::from_secs(600));
        assert_eq!(config.health_check_interval(), Duration::from_secs(60));
        assert!(!config.use_replicated);
        assert!(!config.use_distributed);
    }

    #[test]
    fn test_validate_rejects_empty_hosts() {
        let mut config = ClusterConfig::default();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingRequired {
                field: "hosts".to_string()
            })
        );
    }

    #[test]
    fn test_yaml_defaults_and_normalisation() {
        let config = ClusterConfig::from_yaml_str(
            "hosts: [ch1, 'ch2:9440']\ndatabase: stats\ntable_prefix: ym_\n",
        )
        .unwrap();
        assert_eq!(config.hosts[0].as_str(), "ch1:9000");
        assert_eq!(config.hosts[1].as_str(), "ch2:9440");
        assert_eq!(config.database, "stats");
        assert_eq!(config.full_table_name("hits"), "ym_hits");
        assert_eq!(config.http_port, 8123);
    }

    #[test]
    fn test_yaml_parse_error() {
        let err = ClusterConfig::from_yaml_str("hosts: {").unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ClusterConfig {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "hosts: ['127.0.0.1:9000']\ncluster_name: ''\n").unwrap();
        let config = ClusterConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.hosts.len(), 1);
        assert!(config.cluster_name.is_empty());

        let missing = ClusterConfig::from_yaml_file(dir.path().join("absent.yml"));
        assert!(matches!(missing, Err(ConfigError::ReadFailed { .. })));
    }
}
