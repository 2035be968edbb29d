// Pipeline error types and constants

use crate::error::{ErrorCode, SettingsError};
use log::error;
use std::fmt;

/// Pipeline error code constants
///
/// Single source of truth for the codes carried by outbound `error` events.
///
/// Error code range: 2001-2008
pub struct PipelineErrorCodes {}

impl PipelineErrorCodes {
    /// Frame has zero or inconsistent bin count
    pub const BIN_COUNT_MISMATCH: i32 = 2001;

    /// Frame contains NaN or +inf magnitudes
    pub const NON_FINITE_VALUES: i32 = 2002;

    /// Frame arrived before `init`
    pub const NOT_INITIALIZED: i32 = 2003;

    /// Internal invariant broken; the session is reset
    pub const INVARIANT_VIOLATION: i32 = 2004;

    /// Settings rejected during `init`
    pub const INVALID_SETTINGS: i32 = 2005;

    /// Frame timestamp went backwards
    pub const OUT_OF_ORDER: i32 = 2006;

    /// Frame sample rate differs from the one fixed by `init`
    pub const SAMPLE_RATE_MISMATCH: i32 = 2007;

    /// Host-supplied peak is non-finite or outside the spectrum
    pub const INVALID_PEAK: i32 = 2008;
}

/// Log a pipeline error with structured context
///
/// Logs the numeric code, the component, and the message. The logging is
/// non-blocking and will not panic on failure.
pub fn log_pipeline_error(err: &PipelineError, context: &str) {
    error!(
        "Pipeline error in {}: code={}, component=FeedbackPipeline, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Pipeline errors
///
/// Malformed and out-of-order frames are dropped and the session continues.
/// Invariant violations are fatal for the session state, which is reset.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Bin count is zero or does not match `fft_size / 2`
    BinCountMismatch { expected: usize, actual: usize },

    /// A bin holds NaN or +inf
    NonFiniteValues { bin: usize },

    /// Frame arrived before `init`
    NotInitialized,

    /// Internal invariant broken (e.g. duplicate track id)
    InvariantViolation { details: String },

    /// Settings supplied with `init` failed validation
    InvalidSettings(SettingsError),

    /// Timestamp earlier than the previous frame
    OutOfOrder { previous_ms: f64, current_ms: f64 },

    /// Frame sample rate differs from the initialized stream
    SampleRateMismatch { expected: u32, actual: u32 },

    /// Peak passed to `process_peak` cannot be tracked
    InvalidPeak { bin: usize, reason: String },
}

impl PipelineError {
    /// Whether the session state must be reset after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::InvariantViolation { .. })
    }
}

impl ErrorCode for PipelineError {
    fn code(&self) -> i32 {
        match self {
            PipelineError::BinCountMismatch { .. } => PipelineErrorCodes::BIN_COUNT_MISMATCH,
            PipelineError::NonFiniteValues { .. } => PipelineErrorCodes::NON_FINITE_VALUES,
            PipelineError::NotInitialized => PipelineErrorCodes::NOT_INITIALIZED,
            PipelineError::InvariantViolation { .. } => PipelineErrorCodes::INVARIANT_VIOLATION,
            PipelineError::InvalidSettings(_) => PipelineErrorCodes::INVALID_SETTINGS,
            PipelineError::OutOfOrder { .. } => PipelineErrorCodes::OUT_OF_ORDER,
            PipelineError::SampleRateMismatch { .. } => PipelineErrorCodes::SAMPLE_RATE_MISMATCH,
            PipelineError::InvalidPeak { .. } => PipelineErrorCodes::INVALID_PEAK,
        }
    }

    fn message(&self) -> String {
        match self {
            PipelineError::BinCountMismatch { expected, actual } => {
                format!(
                    "Malformed frame: expected {} bins, got {}",
                    expected, actual
                )
            }
            PipelineError::NonFiniteValues { bin } => {
                format!("Malformed frame: non-finite magnitude at bin {}", bin)
            }
            PipelineError::NotInitialized => {
                "Pipeline not initialized. Send init() first.".to_string()
            }
            PipelineError::InvariantViolation { details } => {
                format!("Internal invariant violated: {}. Session reset.", details)
            }
            PipelineError::InvalidSettings(err) => {
                format!("Invalid settings: {}", err.message())
            }
            PipelineError::OutOfOrder {
                previous_ms,
                current_ms,
            } => {
                format!(
                    "Frame timestamp {} ms precedes previous frame at {} ms",
                    current_ms, previous_ms
                )
            }
            PipelineError::SampleRateMismatch { expected, actual } => {
                format!(
                    "Malformed frame: sample rate {} Hz, stream initialized at {} Hz",
                    actual, expected
                )
            }
            PipelineError::InvalidPeak { bin, reason } => {
                format!("Invalid peak at bin {}: {}", bin, reason)
            }
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipelineError::{} (code {}): {}",
            self.variant_name(),
            self.code(),
            self.message()
        )
    }
}

impl PipelineError {
    fn variant_name(&self) -> &'static str {
        match self {
            PipelineError::BinCountMismatch { .. } => "BinCountMismatch",
            PipelineError::NonFiniteValues { .. } => "NonFiniteValues",
            PipelineError::NotInitialized => "NotInitialized",
            PipelineError::InvariantViolation { .. } => "InvariantViolation",
            PipelineError::InvalidSettings(_) => "InvalidSettings",
            PipelineError::OutOfOrder { .. } => "OutOfOrder",
            PipelineError::SampleRateMismatch { .. } => "SampleRateMismatch",
            PipelineError::InvalidPeak { .. } => "InvalidPeak",
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<SettingsError> for PipelineError {
    fn from(err: SettingsError) -> Self {
        PipelineError::InvalidSettings(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_codes() {
        assert_eq!(
            PipelineError::BinCountMismatch {
                expected: 1024,
                actual: 0
            }
            .code(),
            PipelineErrorCodes::BIN_COUNT_MISMATCH
        );
        assert_eq!(
            PipelineError::NonFiniteValues { bin: 3 }.code(),
            PipelineErrorCodes::NON_FINITE_VALUES
        );
        assert_eq!(
            PipelineError::NotInitialized.code(),
            PipelineErrorCodes::NOT_INITIALIZED
        );
        assert_eq!(
            PipelineError::InvariantViolation {
                details: "test".to_string()
            }
            .code(),
            PipelineErrorCodes::INVARIANT_VIOLATION
        );
        assert_eq!(
            PipelineError::OutOfOrder {
                previous_ms: 20.0,
                current_ms: 10.0
            }
            .code(),
            PipelineErrorCodes::OUT_OF_ORDER
        );
        assert_eq!(
            PipelineError::SampleRateMismatch {
                expected: 48_000,
                actual: 44_100
            }
            .code(),
            PipelineErrorCodes::SAMPLE_RATE_MISMATCH
        );
        assert_eq!(
            PipelineError::InvalidPeak {
                bin: 9_000,
                reason: "bin outside spectrum".to_string()
            }
            .code(),
            PipelineErrorCodes::INVALID_PEAK
        );
    }

    #[test]
    fn test_only_invariant_violation_is_fatal() {
        assert!(PipelineError::InvariantViolation {
            details: "duplicate track id".to_string()
        }
        .is_fatal());
        assert!(!PipelineError::NonFiniteValues { bin: 0 }.is_fatal());
        assert!(!PipelineError::NotInitialized.is_fatal());
    }

    #[test]
    fn test_pipeline_error_messages() {
        let err = PipelineError::BinCountMismatch {
            expected: 2048,
            actual: 100,
        };
        assert_eq!(err.message(), "Malformed frame: expected 2048 bins, got 100");

        let err = PipelineError::NotInitialized;
        assert!(err.message().contains("init()"));
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::NonFiniteValues { bin: 7 };
        let display = format!("{}", err);
        assert!(display.contains("PipelineError"));
        assert!(display.contains(&err.code().to_string()));
    }

    #[test]
    fn test_from_settings_error() {
        let settings_err = SettingsError::InvalidFusion {
            reason: "empty".to_string(),
        };
        let err: PipelineError = settings_err.into();
        assert_eq!(err.code(), PipelineErrorCodes::INVALID_SETTINGS);
    }
}
