use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, ScoutError};

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// Throttling and lifecycle knobs for crawl runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    /// Pause between companies when the whole batch goes through provider APIs.
    pub api_delay_ms: u64,
    /// Pause between companies when the batch may drive the browser.
    pub browser_delay_ms: u64,
    /// Close and relaunch the browser after this many companies.
    pub browser_restart_interval: usize,
    /// A `running` crawl log older than this is considered abandoned.
    pub stale_after_minutes: i64,
    pub recalc_batch_size: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            api_delay_ms: 1_000,
            browser_delay_ms: 3_000,
            browser_restart_interval: 10,
            stale_after_minutes: 30,
            recalc_batch_size: 500,
        }
    }
}

impl CrawlSettings {
    pub fn company_delay(&self, browser_involved: bool) -> Duration {
        if browser_involved {
            Duration::from_millis(self.browser_delay_ms)
        } else {
            Duration::from_millis(self.api_delay_ms)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: Option<PathBuf>,
    pub webdriver_url: String,
    pub crawl: CrawlSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: None,
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            crawl: CrawlSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file. A missing file yields defaults; a
    /// malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            ScoutError::config(format!("Invalid config file {}: {}", path.display(), e))
        })
    }

    pub fn default_config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "scout") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            PathBuf::from("scout.toml")
        }
    }

    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.database_path {
            return path.clone();
        }
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "scout") {
            proj_dirs.data_dir().join("scout.db")
        } else {
            PathBuf::from("scout.db")
        }
    }
}
