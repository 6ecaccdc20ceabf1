//! Configuration loading and management
//!
//! Handles parsing of `taskflow.toml` in the data directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::lock::DEFAULT_LOCK_TIMEOUT_MS;
use crate::view::{Filter, FilteredView, Order};

pub const CONFIG_FILE: &str = "taskflow.toml";

/// Environment variable overriding the data directory
pub const DIR_ENV: &str = "TASKFLOW_DIR";

const MAX_DEBOUNCE_MS: u64 = 60_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Durable store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Default view for `list` and `watch`
    #[serde(default)]
    pub view: ViewConfig,

    /// External change following
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Journal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a writer waits for `tasks.lock`
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Compact once the journal holds this many entries beyond the live tasks
    #[serde(default = "default_compact_after")]
    pub compact_after: usize,
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_compact_after() -> usize {
    256
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            compact_after: default_compact_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default = "default_order")]
    pub order: String,
}

fn default_filter() -> String {
    Filter::All.as_str().to_string()
}

fn default_order() -> String {
    Order::CreatedDesc.as_str().to_string()
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            order: default_order(),
        }
    }
}

impl ViewConfig {
    pub fn view(&self) -> Result<FilteredView> {
        let filter = self
            .filter
            .parse::<Filter>()
            .map_err(|err| Error::InvalidConfig(format!("view.filter: {err}")))?;
        let order = self
            .order
            .parse::<Order>()
            .map_err(|err| Error::InvalidConfig(format!("view.order: {err}")))?;
        Ok(FilteredView::new(filter, order))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Quiet period before reloading after the journal changes on disk
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    150
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a `taskflow.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a data directory, or return defaults. A
    /// present but unusable file comes back as a warning.
    pub fn load_from_dir(dir: &Path) -> (Self, Option<String>) {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return (Self::default(), None);
        }
        match Self::load(&config_path) {
            Ok(config) => (config, None),
            Err(err) => {
                tracing::warn!(
                    path = %config_path.display(),
                    error = %err,
                    "ignoring unreadable configuration"
                );
                let warning = format!(
                    "ignored {} ({err}); using defaults",
                    config_path.display()
                );
                (Self::default(), Some(warning))
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.lock_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "store.lock_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.store.compact_after == 0 {
            return Err(Error::InvalidConfig(
                "store.compact_after must be >= 1".to_string(),
            ));
        }
        self.view.view()?;
        if self.watch.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(Error::InvalidConfig(format!(
                "watch.debounce_ms must be <= {MAX_DEBOUNCE_MS}"
            )));
        }
        Ok(())
    }
}

/// Resolve the data directory: explicit flag, then `TASKFLOW_DIR`, then the
/// platform data directory.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    if let Some(dir) = std::env::var_os(DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", "taskflow")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| {
            Error::InvalidConfig(format!(
                "no home directory found; pass --dir or set {DIR_ENV}"
            ))
        })
}
