//! Logging configuration and initialization.

use tracing::debug;

use super::config::AppConfig;

/// Initializes `tracing-subscriber`'s `fmt` layer with an `EnvFilter`
/// derived from verbosity, matching the `pretty`/`json` choice in
/// [`crate::config::Config::log_format`] once that's loaded.
pub fn init_logging(config: &AppConfig) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level().to_string());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.verbose >= 2)
        .with_thread_ids(config.verbose >= 3)
        .with_line_number(config.verbose >= 3)
        .init();

    debug!(verbose = config.verbose, "logging initialized");
}
