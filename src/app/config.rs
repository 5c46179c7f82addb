//! Application-wide configuration derived from CLI flags, distinct from
//! the server's own [`crate::config::Config`] (which this loads once a
//! [`AppContext`](super::AppContext) is built).

use std::path::PathBuf;

use crate::error::Result;

/// Process-level configuration: just enough to initialize logging and
/// locate a `config.toml` before the full [`crate::config::Config`] is
/// loaded.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub verbose: u8,
    pub working_dir: PathBuf,
    pub config_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn new(verbose: u8) -> Result<Self> {
        let working_dir = std::env::current_dir()?;
        Ok(Self {
            verbose,
            working_dir,
            config_path: None,
        })
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            working_dir: PathBuf::from("."),
            config_path: None,
        }
    }
}
