//! Configuration loading
//!
//! Configuration comes from a single TOML file. Every field has a built-in
//! default, so a missing file (or a missing section) is never fatal: the
//! overlay starts with defaults and logs a warning.
//!
//! # Resolution order
//! 1. Explicit path passed by the host
//! 2. `QTAG_CONFIG` environment variable
//! 3. `<config dir>/qtag/config.toml`
//! 4. Compiled defaults
//!
//! Environment overrides (`QTAG_SERVER_URL`, `QTAG_API_KEY`, `QTAG_USER_ID`,
//! `QTAG_CACHE_VERSION`, `QTAG_LOG_LEVEL`) are applied after the file.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "QTAG_CONFIG";

/// Top-level overlay configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct OverlayConfig {
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub scheduler: SchedulerSettings,
    pub visibility: VisibilitySettings,
    pub reconciler: ReconcilerSettings,
    pub logging: LoggingConfig,
}

/// Upstream metadata server
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// Base URL of the media server, e.g. `http://localhost:8096`
    pub base_url: Option<String>,
    /// API token sent as `X-Emby-Token`
    pub api_key: Option<String>,
    /// User to resolve items as; resolution is suspended while absent
    pub user_id: Option<String>,
}

/// Persistent tag cache
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// Schema version embedded in the storage key
    pub version: String,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
    /// Periodic flush interval in seconds
    pub flush_interval_secs: u64,
    /// Flush after every successful write
    pub flush_on_write: bool,
    /// Directory for file-backed storage (defaults to the data dir)
    pub storage_dir: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            version: "v15".to_string(),
            ttl_secs: 7 * 24 * 60 * 60,
            flush_interval_secs: 60,
            flush_on_write: true,
            storage_dir: None,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

/// Fetch scheduling, backoff and rate limiting
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub priority_delay_ms: u64,
    /// Upper bound on the exponent in `base * 2^errors`
    pub backoff_exponent_cap: u32,
    pub jitter_min: f64,
    pub jitter_max: f64,
    /// Wall-clock bound on one resolution attempt
    pub request_timeout_ms: u64,
    /// Token release rate; 0 disables rate limiting
    pub max_requests_per_second: u32,
    /// Resolutions allowed to wait for their delay at once
    pub max_queue_size: usize,
    /// Whether a successful resolution resets the error counter
    pub reset_on_success: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            priority_delay_ms: 200,
            backoff_exponent_cap: 10,
            jitter_min: 0.8,
            jitter_max: 1.2,
            request_timeout_ms: 5000,
            max_requests_per_second: 15,
            max_queue_size: 1000,
            reset_on_success: true,
        }
    }
}

impl SchedulerSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn priority_delay(&self) -> Duration {
        Duration::from_millis(self.priority_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Viewport proximity detection
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct VisibilitySettings {
    /// Margin added around the viewport on every side, in logical pixels
    pub root_margin_px: f64,
    /// Minimum visible fraction of an element's area
    pub threshold: f64,
}

impl Default for VisibilitySettings {
    fn default() -> Self {
        Self {
            root_margin_px: 300.0,
            threshold: 0.01,
        }
    }
}

/// Document scanning and pass scheduling
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcilerSettings {
    pub initial_delay_ms: u64,
    pub mutation_debounce_ms: u64,
    pub back_control_delay_ms: u64,
    /// Selector enumerating card elements
    pub card_selector: String,
    /// Selector for the badge container inside a card
    pub container_selector: String,
    /// Class name given to badge elements
    pub badge_class: String,
    /// Subtrees where badges are not wanted
    pub ignore_selectors: Vec<String>,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1500,
            mutation_debounce_ms: 300,
            back_control_delay_ms: 500,
            card_selector: "a.cardImageContainer, div.listItemImage, .card".to_string(),
            container_selector: "a.cardImageContainer, div.listItemImage".to_string(),
            badge_class: "quality-overlay-label".to_string(),
            ignore_selectors: vec![
                "#castCollapsible".to_string(),
                "#homeTab .homeSectionsContainer .MyMedia".to_string(),
            ],
        }
    }
}

impl ReconcilerSettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn mutation_debounce(&self) -> Duration {
        Duration::from_millis(self.mutation_debounce_ms)
    }

    pub fn back_control_delay(&self) -> Duration {
        Duration::from_millis(self.back_control_delay_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl OverlayConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: OverlayConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Resolve, load and apply environment overrides
    ///
    /// A missing file falls back to defaults with a warning. A file that
    /// exists but does not parse or validate is an error.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(explicit_path) {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading overlay config");
                Self::from_file(&path)?
            }
            Some(path) => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => {
                warn!("No config file location available, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `QTAG_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = env_non_empty("QTAG_SERVER_URL") {
            self.server.base_url = Some(url);
        }
        if let Some(key) = env_non_empty("QTAG_API_KEY") {
            self.server.api_key = Some(key);
        }
        if let Some(user) = env_non_empty("QTAG_USER_ID") {
            self.server.user_id = Some(user);
        }
        if let Some(version) = env_non_empty("QTAG_CACHE_VERSION") {
            self.cache.version = version;
        }
        if let Some(level) = env_non_empty("QTAG_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.base_delay_ms == 0 {
            return Err(Error::Config("scheduler.base_delay_ms must be > 0".into()));
        }
        if s.max_delay_ms < s.base_delay_ms {
            return Err(Error::Config(format!(
                "scheduler.max_delay_ms ({}) is below base_delay_ms ({})",
                s.max_delay_ms, s.base_delay_ms
            )));
        }
        if !(s.jitter_min.is_finite() && s.jitter_max.is_finite())
            || s.jitter_min <= 0.0
            || s.jitter_min > s.jitter_max
        {
            return Err(Error::Config(format!(
                "scheduler jitter bounds invalid: [{}, {}]",
                s.jitter_min, s.jitter_max
            )));
        }
        let version = &self.cache.version;
        if version.trim().is_empty() {
            return Err(Error::Config("cache.version must not be empty".into()));
        }
        // The version ends up in a storage key
        if !version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(Error::Config(format!(
                "cache.version {:?} may only contain letters, digits, '.', '_' and '-'",
                version
            )));
        }
        let v = &self.visibility;
        if !v.root_margin_px.is_finite() || !v.threshold.is_finite() || v.threshold < 0.0 {
            return Err(Error::Config(format!(
                "visibility settings invalid: margin {}, threshold {}",
                v.root_margin_px, v.threshold
            )));
        }
        if self.reconciler.card_selector.trim().is_empty() {
            return Err(Error::Config("reconciler.card_selector must not be empty".into()));
        }
        Ok(())
    }
}

/// Work out which config file to read
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_non_empty(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("qtag").join("config.toml"))
}

/// Default directory for file-backed cache storage
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("qtag"))
        .unwrap_or_else(|| PathBuf::from("./qtag_data"))
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
