// Settings error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Settings error code constants
///
/// Error code range: 3001-3004
pub struct SettingsErrorCodes {}

impl SettingsErrorCodes {
    /// A numeric field is outside its allowed range
    pub const OUT_OF_RANGE: i32 = 3001;

    /// Minimum analysis frequency is not below the maximum
    pub const INVALID_FREQUENCY_RANGE: i32 = 3002;

    /// Fusion tuning is inconsistent
    pub const INVALID_FUSION: i32 = 3003;

    /// Sample rate or FFT size supplied with `init` is unusable
    pub const INVALID_STREAM_FORMAT: i32 = 3004;
}

/// Log a settings error with structured context
///
/// Rejected settings never replace the active snapshot, so this is the
/// only trace a rejected `updateSettings` leaves.
pub fn log_settings_error(err: &SettingsError, context: &str) {
    error!(
        "Settings error in {}: code={}, component=DetectorSettings, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Settings validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },
    InvalidFrequencyRange {
        min_hz: f32,
        max_hz: f32,
    },
    InvalidFusion {
        reason: String,
    },
    InvalidStreamFormat {
        sample_rate: u32,
        fft_size: usize,
    },
}

impl ErrorCode for SettingsError {
    fn code(&self) -> i32 {
        match self {
            SettingsError::OutOfRange { .. } => SettingsErrorCodes::OUT_OF_RANGE,
            SettingsError::InvalidFrequencyRange { .. } => {
                SettingsErrorCodes::INVALID_FREQUENCY_RANGE
            }
            SettingsError::InvalidFusion { .. } => SettingsErrorCodes::INVALID_FUSION,
            SettingsError::InvalidStreamFormat { .. } => SettingsErrorCodes::INVALID_STREAM_FORMAT,
        }
    }

    fn message(&self) -> String {
        match self {
            SettingsError::OutOfRange {
                field,
                value,
                min,
                max,
            } => format!("{} = {} is outside {}..={}", field, value, min, max),
            SettingsError::InvalidFrequencyRange { min_hz, max_hz } => {
                format!(
                    "Frequency range {} Hz..{} Hz is empty or inverted",
                    min_hz, max_hz
                )
            }
            SettingsError::InvalidFusion { reason } => format!("Invalid fusion tuning: {}", reason),
            SettingsError::InvalidStreamFormat {
                sample_rate,
                fft_size,
            } => format!(
                "Unusable stream format: {} Hz sample rate, FFT size {}",
                sample_rate, fft_size
            ),
        }
    }
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SettingsError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for SettingsError {}
