// Types module - Data structures flowing between pipeline stages
//
// `SpectrumFrame` is the producer-side input; `DetectedPeak` is created per
// frame by the peak detector (or supplied by the host through
// `processPeak`) and consumed immediately by the track manager.

use serde::{Deserialize, Serialize};

/// One analysis hop worth of magnitude spectrum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumFrame {
    /// Per-bin magnitude in dB, `fft_size / 2` entries
    pub magnitudes_db: Vec<f32>,
    /// Per-bin phase in radians, when the producer has it
    #[serde(default)]
    pub phases: Option<Vec<f32>>,
    pub sample_rate: u32,
    pub fft_size: usize,
    /// Monotonically increasing capture time in milliseconds
    pub timestamp_ms: f64,
}

impl SpectrumFrame {
    pub fn new(magnitudes_db: Vec<f32>, sample_rate: u32, fft_size: usize, timestamp_ms: f64) -> Self {
        Self {
            magnitudes_db,
            phases: None,
            sample_rate,
            fft_size,
            timestamp_ms,
        }
    }

    pub fn with_phases(mut self, phases: Vec<f32>) -> Self {
        self.phases = Some(phases);
        self
    }

    /// Width of one bin in Hz
    pub fn bin_hz(&self) -> f32 {
        if self.fft_size == 0 {
            0.0
        } else {
            self.sample_rate as f32 / self.fft_size as f32
        }
    }

    /// Phase at a bin, if phases were supplied and cover it
    pub fn phase_at(&self, bin: usize) -> Option<f32> {
        self.phases
            .as_ref()
            .and_then(|phases| phases.get(bin).copied())
            .filter(|phase| phase.is_finite())
    }
}

/// A prominent local maximum in one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedPeak {
    pub bin: usize,
    /// Sub-bin interpolated frequency
    pub frequency_hz: f32,
    /// Sub-bin interpolated amplitude
    pub amplitude_db: f32,
    /// dB above the local neighborhood average
    pub prominence_db: f32,
    /// Frequency of a lower peak this one is an integer multiple of
    #[serde(default)]
    pub harmonic_of_hz: Option<f32>,
    pub timestamp_ms: f64,
}
