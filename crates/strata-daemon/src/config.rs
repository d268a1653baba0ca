//! Configuration file management.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Outbound stack settings.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Local SOCKS listener.
    #[serde(default)]
    pub socks: SocksConfig,
    /// Upstream SOCKS proxy used by `socks_over_tcpip`.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Resolver and descriptor caches.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Advanced settings.
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Outbound stack configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Layer id relays go through: "tcpip" | "socks_over_tcpip" | "nop".
    #[serde(default = "default_outbound")]
    pub outbound: String,
    /// TCP connect bound in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// SOCKS listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocksConfig {
    /// Run the local SOCKS server.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Listen address, `host:port`.
    #[serde(default = "default_socks_listen")]
    pub listen: String,
    /// Bound on opening a relay destination, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Upstream proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Proxy address, `host:port`.
    #[serde(default = "default_upstream_proxy")]
    pub proxy: String,
    /// SOCKS version spoken to the proxy: 4 or 5.
    #[serde(default = "default_socks_version")]
    pub version: u8,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Resolver cache entries per direction.
    #[serde(default = "default_resolver_entries")]
    pub resolver_entries: usize,
    /// Lifetime of positive resolver answers, in seconds.
    #[serde(default = "default_positive_ttl_secs")]
    pub positive_ttl_secs: u64,
    /// Lifetime of negative resolver answers, in seconds.
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,
    /// Hidden-service descriptors kept.
    #[serde(default = "default_descriptor_entries")]
    pub descriptor_entries: usize,
    /// Descriptor cache entry lifetime, in seconds.
    #[serde(default = "default_descriptor_ttl_secs")]
    pub descriptor_ttl_secs: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions

fn default_outbound() -> String {
    "tcpip".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_socks_listen() -> String {
    "127.0.0.1:1080".to_string()
}

fn default_upstream_proxy() -> String {
    "127.0.0.1:9050".to_string()
}

fn default_socks_version() -> u8 {
    5
}

fn default_resolver_entries() -> usize {
    1024
}

fn default_positive_ttl_secs() -> u64 {
    600
}

fn default_negative_ttl_secs() -> u64 {
    30
}

fn default_descriptor_entries() -> usize {
    1000
}

fn default_descriptor_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            outbound: default_outbound(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for SocksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_socks_listen(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            proxy: default_upstream_proxy(),
            version: default_socks_version(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resolver_entries: default_resolver_entries(),
            positive_ttl_secs: default_positive_ttl_secs(),
            negative_ttl_secs: default_negative_ttl_secs(),
            descriptor_entries: default_descriptor_entries(),
            descriptor_ttl_secs: default_descriptor_ttl_secs(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl SocksConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("STRATA_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Strata")
        }
        #[cfg(target_os = "windows")]
        {
            dirs_fallback("Strata")
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            dirs_fallback(".strata")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/strata"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.network.outbound, "tcpip");
        assert_eq!(config.network.connect_timeout(), Duration::from_secs(60));
        assert!(config.socks.enabled);
        assert_eq!(config.socks.listen, "127.0.0.1:1080");
        assert_eq!(config.upstream.version, 5);
        assert_eq!(config.cache.descriptor_ttl_secs, 86_400);
        assert_eq!(config.advanced.log_level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = DaemonConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let parsed: DaemonConfig = toml::from_str(&toml_str).expect("parse");
        assert_eq!(parsed.cache.resolver_entries, config.cache.resolver_entries);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: DaemonConfig = toml::from_str(
            r#"
            [socks]
            listen = "0.0.0.0:9150"

            [network]
            outbound = "socks_over_tcpip"
            "#,
        )
        .expect("parse");
        assert_eq!(parsed.socks.listen, "0.0.0.0:9150");
        assert!(parsed.socks.enabled);
        assert_eq!(parsed.network.outbound, "socks_over_tcpip");
        assert_eq!(parsed.network.connect_timeout_ms, 60_000);
        assert_eq!(parsed.upstream.proxy, "127.0.0.1:9050");
    }

    #[test]
    fn test_explicit_data_dir() {
        let mut config = DaemonConfig::default();
        config.storage.data_dir = "/var/lib/strata".to_string();
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/strata"));
    }
}
