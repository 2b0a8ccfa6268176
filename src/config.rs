//! Configuration file parser for the `feedrelay` TOML config.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`; unknown keys are accepted but logged as warnings so
//! typos do not go unnoticed.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration
// ============================================================================

/// Ingestion settings.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file, or `:memory:`.
    pub database_path: PathBuf,

    /// `User-Agent` header sent with every feed request.
    pub user_agent: String,

    /// Upper bound on one feed's request plus body read.
    pub fetch_timeout_secs: u64,

    /// Largest accepted feed body in bytes.
    pub max_feed_bytes: usize,

    /// Entries kept from a single fetch; the rest are ignored.
    pub max_items_per_fetch: usize,

    /// A feed is due again once this many minutes passed since its last fetch.
    pub min_refetch_interval_minutes: i64,

    /// Due feeds processed per scheduled run.
    pub max_feeds_per_run: usize,

    /// Consecutive failures after which a feed moves to `error`.
    pub error_threshold: i64,

    /// Feeds fetched in parallel during a run.
    pub concurrency: usize,

    /// Skip the private/loopback host checks (local development only).
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("feedrelay.db"),
            user_agent: format!("feedrelay/{} (RSS ingestion)", env!("CARGO_PKG_VERSION")),
            fetch_timeout_secs: 30,
            max_feed_bytes: 10 * 1024 * 1024,
            max_items_per_fetch: 50,
            min_refetch_interval_minutes: 15,
            max_feeds_per_run: 20,
            error_threshold: 5,
            concurrency: 1,
            allow_private_hosts: false,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "database_path",
        "user_agent",
        "fetch_timeout_secs",
        "max_feed_bytes",
        "max_items_per_fetch",
        "min_refetch_interval_minutes",
        "max_feeds_per_run",
        "error_threshold",
        "concurrency",
        "allow_private_hosts",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        tracing::info!(
            database = %config.database_path.display(),
            concurrency = config.concurrency,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, u64); 5] = [
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("max_feed_bytes", self.max_feed_bytes as u64),
            ("max_items_per_fetch", self.max_items_per_fetch as u64),
            ("max_feeds_per_run", self.max_feeds_per_run as u64),
            ("concurrency", self.concurrency as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than 0".to_string(),
                });
            }
        }

        if self.error_threshold < 1 {
            return Err(ConfigError::Invalid {
                key: "error_threshold",
                reason: format!("must be at least 1, got {}", self.error_threshold),
            });
        }
        if self.min_refetch_interval_minutes < 0 {
            return Err(ConfigError::Invalid {
                key: "min_refetch_interval_minutes",
                reason: format!("must not be negative, got {}", self.min_refetch_interval_minutes),
            });
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "user_agent",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Refetch interval in seconds
    pub fn min_refetch_interval_secs(&self) -> i64 {
        self.min_refetch_interval_minutes.saturating_mul(60)
    }
}

// ============================================================================
// Tests
// ============================================================================
