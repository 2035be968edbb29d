// Error types for the feedback detection pipeline
//
// This module defines custom error types for frame processing, settings
// handling and the session boundary, providing structured error handling
// with numeric codes suitable for the outbound `error` event of the session
// protocol.

mod pipeline;
mod session;
mod settings;

pub use pipeline::{log_pipeline_error, PipelineError, PipelineErrorCodes};
pub use session::{log_session_error, SessionError, SessionErrorCodes};
pub use settings::{log_settings_error, SettingsError, SettingsErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the session boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
