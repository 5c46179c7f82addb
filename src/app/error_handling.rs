//! Centralized fatal-error handling for the CLI entry point.

use tracing::error;

use crate::error::Error;

/// Prints a user-facing message and exits with a status code derived
/// from the error's [`crate::error::ErrorCode`].
pub fn handle_fatal_error(err: Error) -> ! {
    error!(code = err.code().as_str(), "fatal error: {}", err);
    eprintln!("Error: {err}");

    let exit_code = match err.code() {
        crate::error::ErrorCode::ValidationError => 2,
        crate::error::ErrorCode::NotFound => 3,
        crate::error::ErrorCode::Conflict => 4,
        crate::error::ErrorCode::DatabaseError | crate::error::ErrorCode::InternalError => 1,
    };
    std::process::exit(exit_code)
}
