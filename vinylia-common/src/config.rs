//! Configuration loading and config file resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "VINYLIA_CONFIG";
/// Environment variable overriding the backend URL
pub const SUPABASE_URL_ENV: &str = "VINYLIA_SUPABASE_URL";
/// Environment variable overriding the backend anon key
pub const SUPABASE_ANON_KEY_ENV: &str = "VINYLIA_SUPABASE_ANON_KEY";

const DEFAULT_AUTOSAVE_DELAY_MS: u64 = 2000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EVENT_BUS_CAPACITY: usize = 100;
const DEFAULT_FEED_PAGE_SIZE: u32 = 20;

/// Hosted backend connection and client tuning
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`
    pub supabase_url: String,
    /// Public anon key sent as the `apikey` header
    pub anon_key: String,
    /// Quiet period before story text is persisted
    pub autosave_delay_ms: u64,
    /// Per-request timeout applied by the HTTP client
    pub request_timeout_secs: u64,
    /// Buffered events per EventBus subscriber
    pub event_bus_capacity: usize,
    /// Stories fetched per feed page
    pub feed_page_size: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            anon_key: String::new(),
            autosave_delay_ms: DEFAULT_AUTOSAVE_DELAY_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
            feed_page_size: DEFAULT_FEED_PAGE_SIZE,
        }
    }
}

impl BackendConfig {
    /// Load configuration following the priority order:
    /// 1. Command-line config path (highest priority, must exist)
    /// 2. `VINYLIA_CONFIG` environment variable
    /// 3. Platform config file (`<config_dir>/vinylia/config.toml`)
    /// 4. Compiled defaults
    ///
    /// `VINYLIA_SUPABASE_URL` / `VINYLIA_SUPABASE_ANON_KEY` override whatever
    /// the file provided. The result is validated before returning.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path)? {
            Some(path) => {
                debug!("Loading config from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML content; absent keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay backend URL and key from the environment
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(SUPABASE_URL_ENV) {
            self.supabase_url = url;
        }
        if let Ok(key) = std::env::var(SUPABASE_ANON_KEY_ENV) {
            self.anon_key = key;
        }
    }

    /// Reject configurations the gateway cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.supabase_url.trim().is_empty() {
            return Err(Error::Config(format!(
                "Backend URL not configured. Set supabase_url or {}",
                SUPABASE_URL_ENV
            )));
        }
        if !self.supabase_url.starts_with("http://") && !self.supabase_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "Backend URL must be http(s): {}",
                self.supabase_url
            )));
        }
        if self.anon_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "Anon key not configured. Set anon_key or {}",
                SUPABASE_ANON_KEY_ENV
            )));
        }
        if self.event_bus_capacity == 0 {
            return Err(Error::Config("event_bus_capacity must be at least 1".to_string()));
        }
        if self.feed_page_size == 0 {
            return Err(Error::Config("feed_page_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.supabase_url.trim_end_matches('/')
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Find the config file to load, if any
///
/// An explicit CLI path that does not exist is an error; a missing
/// environment or platform file just means "use defaults".
pub fn resolve_config_path(cli_path: Option<&Path>) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(Error::Config(format!("Config file not found: {}", path.display())));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(Some(path));
        }
        warn!("{} points at missing file {}", CONFIG_PATH_ENV, path.display());
    }

    // Priority 3: Platform config file
    Ok(default_config_file().filter(|path| path.exists()))
}

/// Get default configuration file path for the platform
fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vinylia").join("config.toml"))
}
