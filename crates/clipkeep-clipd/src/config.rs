use anyhow::Context;
use clipkeep_core::reader::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub capture: Capture,
    #[serde(default)]
    pub images: Images,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Storage {
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Capture {
    /// Quiet period after the last clipboard notification (default: 300)
    pub debounce_ms: Option<u64>,
    /// Whole-read attempts before giving up (default: 3)
    pub read_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    /// Record HTML/RTF as plain text
    pub copy_plain: Option<bool>,
    /// Keep at most this many non-favorite records
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Images {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Log {
    /// tracing filter directive, e.g. "info" or "clipkeep_core=debug"
    pub level: Option<String>,
}

impl Settings {
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage
            .db_path
            .clone()
            .unwrap_or_else(|| config_dir().join("db").join("clipkeep.db"))
    }

    pub fn images_dir(&self) -> PathBuf {
        match &self.images.dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => config_dir().join("data").join("imgs"),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.capture
            .debounce_ms
            .map(Duration::from_millis)
            .unwrap_or(clipkeep_core::debounce::DEFAULT_DELAY)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let default = RetryPolicy::default();
        RetryPolicy {
            attempts: self.capture.read_attempts.unwrap_or(default.attempts).max(1),
            delay: self
                .capture
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(default.delay),
        }
    }

    pub fn copy_plain(&self) -> bool {
        self.capture.copy_plain.unwrap_or(false)
    }

    pub fn max_items(&self) -> Option<usize> {
        self.capture.max_items.filter(|n| *n > 0)
    }

    pub fn log_level(&self) -> &str {
        self.log.level.as_deref().unwrap_or("info")
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(bd) = directories::BaseDirs::new() {
        bd.config_dir().join("clipkeep")
    } else {
        PathBuf::from("./.config/clipkeep")
    }
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.toml")
}

/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(settings_path);
    match std::fs::read_to_string(&path) {
        Ok(s) => Settings::from_toml(&s)
            .with_context(|| format!("parsing settings file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(e).with_context(|| format!("reading settings file {}", path.display())),
    }
}
