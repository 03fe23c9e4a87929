//! `cw_config` - Configuration parsing and validation for Cableward
//!
//! This crate provides:
//! - TOML configuration parsing
//! - Default value handling
//! - Environment variable overrides
//! - Path expansion (`~/` to home directory)
//! - Auto-discovery from standard config paths
//!
//! Engine tuning keys left unset in the file fall back to persisted settings
//! rows, then built-in defaults; the authority chain is
//! flags > environment > config file > persisted settings > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Valid log level strings (trace, debug, info, warn, error)
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Global settings
    pub global: GlobalConfig,

    /// Engine tuning (all optional; persisted settings fill the gaps)
    pub engine: EngineSection,

    /// Management API settings
    pub web: WebConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Path to the SQLite database file
    pub db_path: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: "info".to_string(),
        }
    }
}

/// Default database path using XDG directories
fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cableward")
        .join("cableward.db")
}

/// Engine tuning knobs. Everything is optional here: anything the operator
/// does not pin in the file is read from the settings table at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineSection {
    /// Worker pool size (process-start only)
    pub workers: Option<usize>,

    /// Pending-sweep tick in seconds
    pub poll_interval_secs: Option<u64>,

    /// Discovery tick in seconds
    pub discovery_interval_secs: Option<u64>,

    /// Rule-evaluation tick in seconds (default 2x discovery)
    pub evaluation_interval_secs: Option<u64>,

    /// Per-job wall-clock ceiling in seconds
    pub job_timeout_secs: Option<u64>,

    /// Default max_retries stamped on new jobs
    pub retry_attempts: Option<u32>,

    /// Eligibility window, dBmV
    pub signal_level_min: Option<f64>,
    pub signal_level_max: Option<f64>,

    /// Per-CMTS concurrent upgrade cap
    pub max_upgrades_per_cmts: Option<usize>,
}

/// Management API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,

    /// Port
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,

    /// Static dashboard directory (optional)
    pub static_dir: Option<PathBuf>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8420,
            cors_enabled: false,
            cors_origins: vec![],
            static_dir: None,
            request_timeout_secs: 15,
        }
    }
}

impl WebConfig {
    /// Request timeout as a Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Expand tilde in path to home directory
#[must_use]
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    path.to_path_buf()
}

impl AppConfig {
    /// Standard config file paths, in order of precedence
    #[must_use]
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            // 1. Current directory (deployment-local)
            PathBuf::from("cableward.toml"),
        ];

        // 2. User config directory (~/.config/cableward/cableward.toml)
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("cableward").join("cableward.toml"));
        }

        // 3. System config
        paths.push(PathBuf::from("/etc/cableward/cableward.toml"));

        paths
    }

    /// Discover and load configuration from standard paths.
    ///
    /// Returns defaults if no config file is found.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a discovered config file cannot be loaded.
    pub fn discover() -> Result<Self, ConfigError> {
        for path in Self::config_paths() {
            if path.exists() {
                info!(path = %path.display(), "Loading config from");
                return Self::load(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Discover config and apply environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if config discovery or validation fails.
    pub fn discover_with_env() -> Result<Self, ConfigError> {
        let mut config = Self::discover()?;
        config.apply_env_overrides();
        config.expand_all_paths();
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.expand_all_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or
    /// validated.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Expand all paths in configuration (resolve `~/` to home directory)
    pub fn expand_all_paths(&mut self) {
        self.global.db_path = expand_path(&self.global.db_path);
        if let Some(dir) = &self.web.static_dir {
            self.web.static_dir = Some(expand_path(dir));
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CABLEWARD_DB_PATH") {
            self.global.db_path = expand_path(&PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("CABLEWARD_LOG_LEVEL") {
            self.global.log_level = val;
        }
        if let Ok(val) = std::env::var("CABLEWARD_WEB_BIND") {
            self.web.bind_address = val;
        }
        if let Ok(val) = std::env::var("CABLEWARD_WEB_PORT") {
            if let Ok(port) = val.parse() {
                self.web.port = port;
            }
        }
        if let Ok(val) = std::env::var("CABLEWARD_WORKERS") {
            if let Ok(workers) = val.parse() {
                self.engine.workers = Some(workers);
            }
        }
        if let Ok(val) = std::env::var("CABLEWARD_DISCOVERY_INTERVAL") {
            if let Ok(secs) = val.parse() {
                self.engine.discovery_interval_secs = Some(secs);
            }
        }
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when validation rules are violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.global.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.global.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.web.port == 0 {
            return Err(ConfigError::ValidationError(
                "web.port must be > 0".to_string(),
            ));
        }

        if let Some(0) = self.engine.workers {
            return Err(ConfigError::ValidationError(
                "engine.workers must be > 0".to_string(),
            ));
        }

        if let Some(0) = self.engine.poll_interval_secs {
            return Err(ConfigError::ValidationError(
                "engine.poll_interval_secs must be > 0".to_string(),
            ));
        }

        if let Some(0) = self.engine.discovery_interval_secs {
            return Err(ConfigError::ValidationError(
                "engine.discovery_interval_secs must be > 0".to_string(),
            ));
        }

        if let (Some(min), Some(max)) =
            (self.engine.signal_level_min, self.engine.signal_level_max)
        {
            if min > max {
                return Err(ConfigError::ValidationError(
                    "engine.signal_level_min must be <= signal_level_max".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Generate a minimal default configuration as TOML string.
    #[must_use]
    pub fn generate_default_toml() -> String {
        r#"# Cableward Configuration

[global]
# Path to the SQLite database (default: ~/.local/share/cableward/cableward.db)
# db_path = "~/.local/share/cableward/cableward.db"

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

[engine]
# Everything below is optional. Keys left commented out are read from the
# persisted settings table (editable through the API) and fall back to
# built-in defaults.

# workers = 5
# poll_interval_secs = 30
# discovery_interval_secs = 60
# evaluation_interval_secs = 120
# job_timeout_secs = 300
# retry_attempts = 3
# signal_level_min = -15.0
# signal_level_max = 15.0
# max_upgrades_per_cmts = 10

[web]
bind_address = "127.0.0.1"
port = 8420
cors_enabled = false
# static_dir = "/usr/share/cableward/dashboard"
request_timeout_secs = 15
"#
        .to_string()
    }

    /// Generate a TOML representation of this config.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(format!("Failed to serialize config: {e}")))
    }
}
