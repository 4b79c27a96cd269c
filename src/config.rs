//! Configuration management for e2ekeys

use crate::crypto::KdfHash;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default per-request timeout (seconds)
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 30;

/// Default TCP connect timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

/// Default timeout for starting a migration, which decrypts every legacy record server-side (seconds)
pub const DEFAULT_MIGRATION_TIMEOUT: u64 = 120;

/// Default PBKDF2 iterations for the local key cache
pub const DEFAULT_CACHE_KDF_ITERATIONS: u32 = 100_000;

/// Lowest accepted PBKDF2 iteration count for the local key cache
pub const MIN_CACHE_KDF_ITERATIONS: u32 = 10_000;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backend API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Local key cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the backend, e.g. `https://api.example.com`
    pub base_url: String,

    /// Timeout applied to every request (seconds)
    pub request_timeout_secs: u64,

    /// TCP connect timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Timeout for the start-migration call (seconds)
    pub migration_timeout_secs: u64,

    /// Retry attempts for idempotent reads
    pub retry_attempts: u32,

    /// Base delay for exponential backoff (ms)
    pub retry_base_delay_ms: u64,
}

/// Local key cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one cache file per user
    pub cache_dir: PathBuf,

    /// PBKDF2 iterations for the cache storage key
    pub kdf_iterations: u32,

    /// PBKDF2 hash for the cache storage key
    pub kdf_hash: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "http://localhost:3000".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT,
            migration_timeout_secs: DEFAULT_MIGRATION_TIMEOUT,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            cache_dir: default_cache_dir(),
            kdf_iterations: DEFAULT_CACHE_KDF_ITERATIONS,
            kdf_hash: KdfHash::Sha256.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("e2ekeys")
        .join("keys")
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn migration_timeout(&self) -> Duration {
        Duration::from_secs(self.migration_timeout_secs)
    }
}

impl CacheConfig {
    /// Parsed KDF hash
    pub fn hash(&self) -> Result<KdfHash> {
        KdfHash::from_str(&self.kdf_hash)
            .map_err(|_| Error::InvalidConfig(format!("Unknown KDF hash: {}", self.kdf_hash)))
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl Config {
    /// Load configuration from a file (YAML or JSON by extension), with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = if is_yaml(path_ref) {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Create a config from defaults plus environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("E2EKEYS_API_URL") {
            let url = url.trim().to_string();
            if !url.is_empty() {
                self.api.base_url = url;
            }
        }

        if let Ok(dir) = std::env::var("E2EKEYS_CACHE_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.cache.cache_dir = PathBuf::from(dir);
            }
        }

        if let Ok(timeout) = std::env::var("E2EKEYS_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.trim().parse::<u64>() {
                self.api.request_timeout_secs = secs;
            }
        }

        if let Ok(level) = std::env::var("E2EKEYS_LOG_LEVEL") {
            let level = level.trim().to_string();
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if is_yaml(path_ref) {
            serde_yaml::to_string(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config to YAML: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config to JSON: {}", e)))?
        };

        std::fs::write(path_ref, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = self.api.base_url.trim();
        if url.is_empty() {
            return Err(Error::InvalidConfig("API base URL is required".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "API base URL must be http(s): {}",
                url
            )));
        }

        if self.api.request_timeout_secs == 0 || self.api.connect_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "Request timeouts must be greater than 0".to_string(),
            ));
        }

        if self.api.migration_timeout_secs < self.api.request_timeout_secs {
            return Err(Error::InvalidConfig(
                "Migration timeout must not be shorter than the request timeout".to_string(),
            ));
        }

        if self.cache.kdf_iterations < MIN_CACHE_KDF_ITERATIONS {
            return Err(Error::InvalidConfig(format!(
                "Cache KDF iterations must be at least {}",
                MIN_CACHE_KDF_ITERATIONS
            )));
        }

        self.cache.hash()?;

        Ok(())
    }
}
