//! Configuration management for the media vault

use crate::error::{MediaError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    /// Address the HTTP server binds to (default: 0.0.0.0:3000)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Remote cache endpoint, e.g. `redis://cache:6379/0`
    /// When unset the remote tier is disabled for the process lifetime
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Byte store backend (default: local)
    #[serde(default)]
    pub storage_type: StorageType,

    /// Base directory of the local byte store (default: uploads)
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    /// Cache TTL in seconds (default: 60)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,

    /// Interval of the expired-entry sweep in seconds (default: 30)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,

    /// Maximum accepted upload size in bytes (default: 10MB)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// MIME types accepted by the upload endpoint
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,

    /// Persist uploads in the background after the cache write (default: true)
    #[serde(default = "default_true")]
    pub write_behind: bool,

    /// Remote cache connection tuning
    #[serde(default)]
    pub remote: RemoteCacheConfig,

    /// Log filter used when RUST_LOG is unset (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for `error.log` and `combined.log`; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// Byte store backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Files under `uploads_dir`
    #[default]
    Local,
    /// Process memory, lost on restart
    Memory,
}

impl FromStr for StorageType {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageType::Local),
            "memory" => Ok(StorageType::Memory),
            other => Err(MediaError::Config(format!(
                "Unsupported storage type '{}', must be 'local' or 'memory'",
                other
            ))),
        }
    }
}

/// Connection policy for the remote cache tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteCacheConfig {
    /// Bound on establishing the connection (default: 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on a single command round trip (default: 2000ms)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Fixed delay before each reconnection attempt (default: 5000ms)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Reconnection attempts before staying memory-only (default: 3)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl RemoteCacheConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

// Default value functions for serde
fn default_listen_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_max_upload_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "video/mp4",
        "video/avi",
        "video/mov",
        "video/wmv",
        "video/flv",
        "video/webm",
        "video/mkv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_command_timeout_ms() -> u64 {
    2000
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

impl Default for MediaConfig {
    fn default() -> Self {
        MediaConfig {
            listen_address: default_listen_address(),
            redis_url: None,
            storage_type: StorageType::default(),
            uploads_dir: default_uploads_dir(),
            cache_ttl: default_cache_ttl(),
            sweep_interval: default_sweep_interval(),
            max_upload_size: default_max_upload_size(),
            allowed_mime_types: default_allowed_mime_types(),
            write_behind: default_true(),
            remote: RemoteCacheConfig::default(),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl MediaConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(MediaConfig)` if loading and validation succeed
    /// * `Err(MediaError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            MediaError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: MediaConfig = serde_yaml::from_str(&content).map_err(|e| {
            MediaError::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults, an optional YAML file and the
    /// process environment, in that order of precedence
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment-style variables
    ///
    /// `lookup` returns the value of a variable, if set. Empty values are
    /// treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            let port: u16 = parse_env("PORT", &port)?;
            self.listen_address = format!("0.0.0.0:{}", port);
        }
        if let Some(addr) = get("LISTEN_ADDRESS") {
            self.listen_address = addr;
        }
        if let Some(url) = get("REDIS_URL") {
            self.redis_url = Some(url);
        }
        if let Some(kind) = get("STORAGE_TYPE") {
            self.storage_type = kind.parse()?;
        }
        if let Some(dir) = get("UPLOADS_DIR") {
            self.uploads_dir = PathBuf::from(dir);
        }
        if let Some(ttl) = get("CACHE_TTL") {
            self.cache_ttl = parse_env("CACHE_TTL", &ttl)?;
        }
        if let Some(interval) = get("CACHE_SWEEP_INTERVAL") {
            self.sweep_interval = parse_env("CACHE_SWEEP_INTERVAL", &interval)?;
        }
        if let Some(size) = get("MAX_UPLOAD_SIZE") {
            self.max_upload_size = parse_env("MAX_UPLOAD_SIZE", &size)?;
        }
        if let Some(types) = get("ALLOWED_MIME_TYPES") {
            self.allowed_mime_types = types
                .split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Some(flag) = get("WRITE_BEHIND") {
            self.write_behind = parse_env("WRITE_BEHIND", &flag)?;
        }
        if let Some(ms) = get("REDIS_CONNECT_TIMEOUT_MS") {
            self.remote.connect_timeout_ms = parse_env("REDIS_CONNECT_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = get("REDIS_COMMAND_TIMEOUT_MS") {
            self.remote.command_timeout_ms = parse_env("REDIS_COMMAND_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = get("REDIS_RECONNECT_DELAY_MS") {
            self.remote.reconnect_delay_ms = parse_env("REDIS_RECONNECT_DELAY_MS", &ms)?;
        }
        if let Some(n) = get("REDIS_MAX_RECONNECT_ATTEMPTS") {
            self.remote.max_reconnect_attempts = parse_env("REDIS_MAX_RECONNECT_ATTEMPTS", &n)?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(dir) = get("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - listen_address must be a socket address
    /// - cache_ttl, sweep_interval and max_upload_size must be > 0
    /// - at least one MIME type must be allowed
    /// - uploads_dir must be set for the local store
    /// - remote timeouts must be > 0
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.cache_ttl == 0 {
            return Err(MediaError::Config(
                "cache_ttl must be greater than 0".to_string(),
            ));
        }

        if self.sweep_interval == 0 {
            return Err(MediaError::Config(
                "sweep_interval must be greater than 0".to_string(),
            ));
        }

        if self.max_upload_size == 0 {
            return Err(MediaError::Config(
                "max_upload_size must be greater than 0".to_string(),
            ));
        }

        if self.allowed_mime_types.is_empty() {
            return Err(MediaError::Config(
                "allowed_mime_types must contain at least one type".to_string(),
            ));
        }

        if self.storage_type == StorageType::Local && self.uploads_dir.as_os_str().is_empty() {
            return Err(MediaError::Config(
                "uploads_dir must not be empty for the local store".to_string(),
            ));
        }

        if self.remote.connect_timeout_ms == 0 || self.remote.command_timeout_ms == 0 {
            return Err(MediaError::Config(
                "remote cache timeouts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_address.parse().map_err(|e| {
            MediaError::Config(format!(
                "Invalid listen_address '{}': {}",
                self.listen_address, e
            ))
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| MediaError::Config(format!("Invalid value for {}: '{}' ({})", key, value, e)))
}
