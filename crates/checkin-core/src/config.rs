//! CheckIn configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CheckinError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckinConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl CheckinConfig {
    /// Load config from the default path (~/.checkin/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from a specific path, without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CheckinError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CheckinError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CheckinError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `NOTIFY_API_URL`, `NOTIFY_KEY` and `CHECKIN_DB` overrides.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("NOTIFY_API_URL") {
            self.notify.url = url;
        }
        if let Some(key) = lookup("NOTIFY_KEY") {
            self.notify.key = key;
        }
        if let Some(db) = lookup("CHECKIN_DB").filter(|v| !v.is_empty()) {
            self.database.path = db;
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the CheckIn home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".checkin")
    }
}

/// Task and log storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.checkin/checkin.db".into() }

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).into_owned())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Outbound requests made by the flow executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Applies to every request of a run (login and sign-in alike).
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    /// Characters of response body kept in run output.
    #[serde(default = "default_body_excerpt")]
    pub body_excerpt_chars: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout() -> u64 { 30 }
fn default_body_excerpt() -> usize { 3000 }
fn default_user_agent() -> String { format!("checkin/{}", env!("CARGO_PKG_VERSION")) }

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            body_excerpt_chars: default_body_excerpt(),
            user_agent: default_user_agent(),
        }
    }
}

/// Notification hub webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub url: String,
    /// Sent as `X-Project-Key`.
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

fn default_project_name() -> String { "CheckIn Tasks".into() }
fn default_notify_timeout() -> u64 { 5 }

impl NotifyConfig {
    /// Both the URL and the key are required to send anything.
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.key.trim().is_empty()
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key: String::new(),
            project_name: default_project_name(),
            timeout_secs: default_notify_timeout(),
        }
    }
}

/// Clock used to interpret cron expressions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleTimezone {
    #[default]
    Local,
    Utc,
}

/// Job scheduler driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the driver checks for due jobs.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    #[serde(default)]
    pub timezone: ScheduleTimezone,
    /// Periodic resync for task changes written by other processes. 0 disables it.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
}

fn default_tick_millis() -> u64 { 1000 }
fn default_resync_interval_secs() -> u64 { 5 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
            timezone: ScheduleTimezone::default(),
            resync_interval_secs: default_resync_interval_secs(),
        }
    }
}
