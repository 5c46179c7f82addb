//! Process startup: logging first, then a log line announcing we're alive.
//! Opening the store and wiring services happens per-command in
//! [`super::AppContext::build`], since most subcommands are one-shot.

use crate::error::Result;
use tracing::info;

use super::{config::AppConfig, logging::init_logging};

pub async fn initialize_app(config: AppConfig) -> Result<()> {
    init_logging(&config);
    info!(working_dir = %config.working_dir.display(), "prodigy-router starting");
    Ok(())
}
