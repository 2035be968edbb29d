// Session error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Session error code constants
///
/// Error code range: 1001-1003
pub struct SessionErrorCodes {}

impl SessionErrorCodes {
    /// The worker has stopped and no longer accepts commands
    pub const CLOSED: i32 = 1001;

    /// The worker thread could not be started
    pub const SPAWN_FAILED: i32 = 1002;

    /// The worker thread panicked
    pub const WORKER_PANICKED: i32 = 1003;
}

/// Log a session error with structured context
pub fn log_session_error(err: &SessionError, context: &str) {
    error!(
        "Session error in {}: code={}, component=Session, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised at the host side of the session boundary
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    Closed,
    SpawnFailed { reason: String },
    WorkerPanicked,
}

impl ErrorCode for SessionError {
    fn code(&self) -> i32 {
        match self {
            SessionError::Closed => SessionErrorCodes::CLOSED,
            SessionError::SpawnFailed { .. } => SessionErrorCodes::SPAWN_FAILED,
            SessionError::WorkerPanicked => SessionErrorCodes::WORKER_PANICKED,
        }
    }

    fn message(&self) -> String {
        match self {
            SessionError::Closed => "Session closed. Spawn a new session.".to_string(),
            SessionError::SpawnFailed { reason } => {
                format!("Failed to start session worker: {}", reason)
            }
            SessionError::WorkerPanicked => "Session worker panicked".to_string(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_codes() {
        assert_eq!(SessionError::Closed.code(), 1001);
        assert_eq!(
            SessionError::SpawnFailed {
                reason: "test".to_string()
            }
            .code(),
            1002
        );
        assert_eq!(SessionError::WorkerPanicked.code(), 1003);
        assert!(format!("{}", SessionError::Closed).contains("1001"));
    }
}
