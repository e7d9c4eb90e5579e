//! Application configuration and persisted settings.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Global configuration for the export subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Preview refresh tuning.
    pub preview: PreviewConfig,

    /// Export job tuning.
    pub export: ExportJobConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cap_export_engine=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

/// Preview estimator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Quiescence window before a settings change triggers a preview fetch.
    pub debounce_ms: u64,

    /// Additional attempts after the first failed preview request.
    pub max_retries: u32,

    /// Backoff unit; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

/// Export job tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportJobConfig {
    /// Recordings at least this long need an upgraded plan to be shared.
    pub free_share_limit_secs: f64,

    /// Pause after opening the upgrade window before ending the job.
    pub upgrade_redirect_delay_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            max_retries: 2,
            retry_backoff_ms: 200,
        }
    }
}

impl PreviewConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(attempt as u64))
    }
}

impl Default for ExportJobConfig {
    fn default() -> Self {
        Self {
            free_share_limit_secs: 300.0,
            upgrade_redirect_delay_ms: 1000,
        }
    }
}

impl ExportJobConfig {
    pub fn upgrade_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.upgrade_redirect_delay_ms)
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_dir().join("config.json"))
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(path: &Path) -> Self {
        read_json(path).unwrap_or_default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        write_json(&config_dir().join("config.json"), self)
    }
}

/// JSON-backed store for a persisted settings value.
///
/// Missing or unreadable files yield `T::default()`; the caller never sees
/// a parse failure, only a warning in the log.
#[derive(Debug, Clone)]
pub struct SettingsStore<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T> SettingsStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Store named `<name>.json` in the standard config directory.
    pub fn named(name: &str) -> Self {
        Self::at(config_dir().join(format!("{name}.json")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> T {
        read_json(&self.path).unwrap_or_default()
    }

    pub fn save(&self, value: &T) -> Result<(), std::io::Error> {
        write_json(&self.path, value)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Failed to parse {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read {:?}: {}", path, e);
            None
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

/// Standard config directory.
fn config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("cap")
}
