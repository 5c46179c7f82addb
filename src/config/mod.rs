//! Typed server configuration, layered defaults → `config.toml` → env vars
//! (highest precedence), following the same layering idiom as the
//! codebase this crate is adapted from.

use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "prodigy", "prodigy-router")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".prodigy-router"))
}

/// Raw, partially-specified configuration as read from `config.toml`; every
/// field is optional so a file may override just one setting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub db_filename: Option<String>,
    pub max_concurrent_executions: Option<ConcurrencyLimit>,
    pub agent_binary: Option<String>,
    pub agent_args: Option<Vec<String>>,
    pub default_timeout_minutes: Option<i64>,
    pub lock_stale_after_ms: Option<i64>,
    pub max_retries: Option<i64>,
    pub retry_backoff_ms: Option<u64>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

/// `max_concurrent_executions` is explicitly nullable in the spec (absent
/// or `"unlimited"` means no cap), distinct from "not set in this layer".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConcurrencyLimit {
    Unlimited,
    Bounded(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Fully resolved configuration used throughout the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_filename: String,
    pub max_concurrent_executions: Option<usize>,
    pub agent_binary: String,
    pub agent_args: Vec<String>,
    pub default_timeout_minutes: Option<i64>,
    pub lock_stale_after_ms: i64,
    pub max_retries: i64,
    pub retry_backoff_ms: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_filename: "router.sqlite3".to_string(),
            max_concurrent_executions: Some(4),
            agent_binary: "claude".to_string(),
            agent_args: vec!["--output-format".into(), "stream-json".into(), "--dangerously-skip-permissions".into()],
            default_timeout_minutes: None,
            lock_stale_after_ms: crate::domain::LOCK_STALE_AFTER_MS,
            max_retries: crate::domain::MAX_RETRIES,
            retry_backoff_ms: 1000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Loads defaults, overlays `<data_dir-independent location>/config.toml`
    /// if present, then applies environment variable overrides, then
    /// validates the result.
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            if path.exists() {
                let contents = std::fs::read_to_string(path)?;
                let file_config: FileConfig = toml::from_str(&contents)
                    .map_err(|e| Error::Validation(format!("invalid config.toml: {e}")))?;
                config.apply_file(file_config);
            }
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.db_filename {
            self.db_filename = v;
        }
        if let Some(v) = file.max_concurrent_executions {
            self.max_concurrent_executions = match v {
                ConcurrencyLimit::Unlimited => None,
                ConcurrencyLimit::Bounded(n) => Some(n),
            };
        }
        if let Some(v) = file.agent_binary {
            self.agent_binary = v;
        }
        if let Some(v) = file.agent_args {
            self.agent_args = v;
        }
        if let Some(v) = file.default_timeout_minutes {
            self.default_timeout_minutes = Some(v);
        }
        if let Some(v) = file.lock_stale_after_ms {
            self.lock_stale_after_ms = v;
        }
        if let Some(v) = file.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = file.retry_backoff_ms {
            self.retry_backoff_ms = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
        if let Some(v) = file.log_format {
            self.log_format = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("PRODIGY_ROUTER_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PRODIGY_ROUTER_MAX_CONCURRENT") {
            self.max_concurrent_executions = match v.as_str() {
                "unlimited" | "" => None,
                n => n.parse().ok(),
            };
        }
        if let Ok(v) = std::env::var("PRODIGY_ROUTER_AGENT_BINARY") {
            self.agent_binary = v;
        }
        if let Ok(v) = std::env::var("PRODIGY_ROUTER_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("PRODIGY_ROUTER_LOG_FORMAT") {
            if v.eq_ignore_ascii_case("json") {
                self.log_format = LogFormat::Json;
            } else if v.eq_ignore_ascii_case("pretty") {
                self.log_format = LogFormat::Pretty;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.agent_binary.trim().is_empty() {
            return Err(Error::Validation("agent_binary must not be empty".into()));
        }
        if let Some(0) = self.max_concurrent_executions {
            return Err(Error::Validation(
                "max_concurrent_executions must be positive or unset".into(),
            ));
        }
        if self.max_retries < 0 {
            return Err(Error::Validation("max_retries must be non-negative".into()));
        }
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_filename)
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.data_dir.join("attachments")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        std::fs::remove_dir_all(&config.data_dir).ok();
    }

    #[test]
    fn file_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "agent_binary = \"my-agent\"\nmax_concurrent_executions = 2\n").unwrap();

        let config = Config::load(Some(&config_path)).unwrap();
        assert_eq!(config.agent_binary, "my-agent");
        assert_eq!(config.max_concurrent_executions, Some(2));
        std::fs::remove_dir_all(&config.data_dir).ok();
    }

    #[test]
    fn empty_agent_binary_is_rejected() {
        let mut config = Config::default();
        config.agent_binary = "   ".to_string();
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }
}
