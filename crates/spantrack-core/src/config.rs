//! Configuration system for Spantrack
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpantrackConfig {
    /// HTTP server settings
    pub server: ServerSettings,

    /// Span store settings
    pub storage: StorageSettings,

    /// Realtime broadcast settings
    pub broadcast: BroadcastSettings,

    /// Client projection settings
    pub projection: ProjectionSettings,
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind
    pub host: String,

    /// Port to bind
    pub port: u16,

    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
            log_level: "info".to_string(),
        }
    }
}

/// Span store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Durable SQLite database
    #[default]
    Sqlite,
    /// Process-local map, lost on restart
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(StorageBackend::Sqlite),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(ConfigError::ValidationError(format!(
                "Invalid storage backend: {}. Must be one of: [\"sqlite\", \"memory\"]",
                other
            ))),
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,

    /// SQLite database path
    pub path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: dirs::data_dir()
                .map(|d| d.join("spantrack").join("spans.db"))
                .unwrap_or_else(|| PathBuf::from("spans.db"))
                .to_string_lossy()
                .to_string(),
        }
    }
}

/// Realtime broadcast settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Messages buffered per observer before it starts lagging
    pub buffer_size: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self { buffer_size: 1024 }
    }
}

/// Upper bound on the seed window and the GC TTL (ten years)
pub const MAX_WINDOW_HOURS: i64 = 24 * 365 * 10;

/// Client projection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionSettings {
    /// Base URL of the Spantrack server
    pub endpoint: String,

    /// Seed window for running spans, in hours
    pub lookback_hours: i64,

    /// Idle bookkeeping TTL, in hours
    pub gc_ttl_hours: i64,

    /// Replay the seed query after every realtime reconnect
    pub reseed_on_reconnect: bool,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Enable automatic reconnection
    pub reconnect_enabled: bool,

    /// Initial reconnection delay in milliseconds
    pub reconnect_initial_delay_ms: u64,

    /// Max reconnection delay in milliseconds
    pub reconnect_max_delay_ms: u64,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:7878".to_string(),
            lookback_hours: 24,
            gc_ttl_hours: crate::projection::DEFAULT_GC_TTL_HOURS,
            reseed_on_reconnect: true,
            connect_timeout_ms: 10000,
            reconnect_enabled: true,
            reconnect_initial_delay_ms: 500,
            reconnect_max_delay_ms: 30000,
        }
    }
}

impl ProjectionSettings {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get initial reconnect delay as Duration
    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    /// Get max reconnect delay as Duration
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Seed window, clamped to `[1, MAX_WINDOW_HOURS]` hours
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.lookback_hours.clamp(1, MAX_WINDOW_HOURS))
    }

    /// Idle bookkeeping TTL, clamped to `[1, MAX_WINDOW_HOURS]` hours
    pub fn gc_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.gc_ttl_hours.clamp(1, MAX_WINDOW_HOURS))
    }

    /// Validate the projection settings on their own
    pub fn validate(&self) -> ConfigResult<()> {
        let in_range = |hours: i64| (1..=MAX_WINDOW_HOURS).contains(&hours);
        if !in_range(self.lookback_hours) || !in_range(self.gc_ttl_hours) {
            return Err(ConfigError::ValidationError(format!(
                "Projection lookback and GC TTL must be between 1 and {} hours",
                MAX_WINDOW_HOURS
            )));
        }

        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "Projection endpoint must be an http(s) URL: {}",
                self.endpoint
            )));
        }

        Ok(())
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. SPANTRACK_CONFIG environment variable
    /// 3. ~/.config/spantrack/config.toml
    /// 4. /etc/spantrack/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<SpantrackConfig> {
        let config_path = self.find_config_file();

        let mut config = if let Some(path) = config_path {
            info!("Loading configuration from: {}", path.display());
            Self::load_from_file(&path)?
        } else {
            debug!("No config file found, using defaults");
            SpantrackConfig::default()
        };

        self.apply_env_overrides(&mut config);
        Self::validate(&config)?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("SPANTRACK_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("SPANTRACK_CONFIG path does not exist: {}", env_path);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("spantrack").join("config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/spantrack/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<SpantrackConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: SpantrackConfig = toml::from_str(&content)?;
        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut SpantrackConfig) {
        if let Ok(val) = std::env::var("SPANTRACK_LOG_LEVEL") {
            config.server.log_level = val;
        }
        if let Ok(val) = std::env::var("SPANTRACK_HOST") {
            config.server.host = val;
        }
        if let Ok(val) = std::env::var("SPANTRACK_PORT") {
            if let Ok(port) = val.parse() {
                config.server.port = port;
            }
        }

        if let Ok(val) = std::env::var("SPANTRACK_STORAGE_BACKEND") {
            match val.parse() {
                Ok(backend) => config.storage.backend = backend,
                Err(e) => warn!("Ignoring SPANTRACK_STORAGE_BACKEND: {}", e),
            }
        }
        if let Ok(val) = std::env::var("SPANTRACK_DB_PATH") {
            config.storage.path = val;
        }

        if let Ok(val) = std::env::var("SPANTRACK_BROADCAST_BUFFER") {
            if let Ok(size) = val.parse() {
                config.broadcast.buffer_size = size;
            }
        }

        if let Ok(val) = std::env::var("SPANTRACK_ENDPOINT") {
            config.projection.endpoint = val;
        }
        if let Ok(val) = std::env::var("SPANTRACK_LOOKBACK_HOURS") {
            if let Ok(hours) = val.parse() {
                config.projection.lookback_hours = hours;
            }
        }
        if let Ok(val) = std::env::var("SPANTRACK_RESEED_ON_RECONNECT") {
            config.projection.reseed_on_reconnect =
                val.parse().unwrap_or(config.projection.reseed_on_reconnect);
        }
    }

    /// Validate configuration
    pub fn validate(config: &SpantrackConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.server.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.server.log_level, valid_levels
            )));
        }

        if config.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port cannot be 0".to_string(),
            ));
        }

        if config.storage.backend == StorageBackend::Sqlite && config.storage.path.is_empty() {
            return Err(ConfigError::ValidationError(
                "SQLite storage requires a path".to_string(),
            ));
        }

        if config.broadcast.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "Broadcast buffer size cannot be 0".to_string(),
            ));
        }

        config.projection.validate()?;

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(config: &SpantrackConfig, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("spantrack").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    fn home() -> Option<PathBuf> {
        std::env::var("HOME").ok().map(PathBuf::from)
    }

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(target_os = "windows"))]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| home().map(|h| h.join(".config")))
        }
    }

    /// Get the user's data directory
    pub fn data_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(target_os = "windows"))]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| home().map(|h| h.join(".local").join("share")))
        }
    }
}
