//! Typed message protocol between the host and the detection session.
//!
//! The host sends `Command`s on one channel and receives `PipelineEvent`s on
//! another. Both are plain data and serialize to JSON so any transport can
//! carry them.

use serde::{Deserialize, Serialize};

use crate::analysis::advisory::{Advisory, AdvisoryChange, AdvisoryEvent, ClearReason};
use crate::analysis::tracking::TrackSummary;
use crate::analysis::types::{DetectedPeak, SpectrumFrame};
use crate::config::{DetectorSettings, SettingsPatch};
use crate::error::{ErrorCode, PipelineError};

/// Host → session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Configure the stream and start accepting frames; answered with `Ready`
    Init {
        settings: DetectorSettings,
        sample_rate: u32,
        fft_size: usize,
    },
    /// Merge into the active settings before the next frame; no reply
    UpdateSettings { patch: SettingsPatch },
    /// Full detection over one spectrum frame
    ProcessFrame { frame: SpectrumFrame },
    /// Feed one producer-detected peak with the spectrum it came from
    ProcessPeak {
        peak: DetectedPeak,
        spectrum: Vec<f32>,
        sample_rate: u32,
        fft_size: usize,
        timestamp_ms: f64,
    },
    /// The producer stopped tracking a peak
    ClearPeak {
        bin_index: usize,
        frequency_hz: f32,
        timestamp_ms: f64,
    },
    /// Drop all tracks and advisories; `Init` is required again
    Reset,
    /// Stop the session worker
    Shutdown,
}

/// Session → host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Ready {
        sample_rate: u32,
        fft_size: usize,
    },
    Advisory {
        change: AdvisoryChange,
        advisory: Advisory,
    },
    AdvisoryCleared {
        advisory_id: String,
        track_id: u64,
        reason: ClearReason,
    },
    TracksUpdate {
        timestamp_ms: f64,
        tracks: Vec<TrackSummary>,
    },
    Error {
        code: i32,
        message: String,
    },
}

impl PipelineEvent {
    pub fn error(err: &PipelineError) -> Self {
        PipelineEvent::Error {
            code: err.code(),
            message: err.message(),
        }
    }
}

impl From<AdvisoryEvent> for PipelineEvent {
    fn from(event: AdvisoryEvent) -> Self {
        match event {
            AdvisoryEvent::Published { change, advisory } => PipelineEvent::Advisory { change, advisory },
            AdvisoryEvent::Cleared {
                advisory_id,
                track_id,
                reason,
            } => PipelineEvent::AdvisoryCleared {
                advisory_id,
                track_id,
                reason,
            },
        }
    }
}
