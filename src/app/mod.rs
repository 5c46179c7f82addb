//! Application-level wiring: configuration, logging, and the services the
//! CLI commands drive — persistence, the executor, the routing engine,
//! the event bus, and the lifecycle coordinator.

pub mod config;
pub mod context;
pub mod error_handling;
pub mod logging;
pub mod runtime;

pub use config::AppConfig;
pub use context::AppContext;
pub use error_handling::handle_fatal_error;
pub use logging::init_logging;
pub use runtime::initialize_app;
