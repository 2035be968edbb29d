// Preprocess module - Spectrum normalization ahead of analysis
//
// Applies static gain and an optional perceptual weighting curve to the raw
// dB spectrum, clamps it into [MIN_DB, MAX_DB], and derives the linear power
// spectrum plus its prefix sum so later stages can average any neighborhood
// in O(1).
//
// All output buffers are owned by the preprocessor and reused across frames;
// they only reallocate when the bin count changes.
//
// References:
// - IEC 61672-1:2013, frequency weightings A and C

use crate::analysis::types::SpectrumFrame;
use crate::config::Weighting;
use crate::error::PipelineError;

/// Lowest dB value carried through the pipeline
pub const MIN_DB: f32 = -100.0;
/// Highest dB value carried through the pipeline (full scale)
pub const MAX_DB: f32 = 0.0;

/// Calibrated spectrum for one frame
#[derive(Debug, Clone, Default)]
pub struct PreparedSpectrum {
    db: Vec<f32>,
    power: Vec<f64>,
    prefix: Vec<f64>,
    bin_hz: f32,
    sample_rate: u32,
    fft_size: usize,
    timestamp_ms: f64,
}

impl PreparedSpectrum {
    pub fn db(&self) -> &[f32] {
        &self.db
    }

    pub fn power(&self) -> &[f64] {
        &self.power
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    pub fn bin_hz(&self) -> f32 {
        self.bin_hz
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn timestamp_ms(&self) -> f64 {
        self.timestamp_ms
    }

    /// Sum of linear power over bins `start..end`
    pub fn power_sum(&self, start: usize, end: usize) -> f64 {
        let end = end.min(self.db.len());
        if start >= end {
            return 0.0;
        }
        self.prefix[end] - self.prefix[start]
    }

    pub fn bin_to_hz(&self, bin: f32) -> f32 {
        bin * self.bin_hz
    }

    pub fn hz_to_bin(&self, hz: f32) -> f32 {
        if self.bin_hz > 0.0 {
            hz / self.bin_hz
        } else {
            0.0
        }
    }

    /// Broadband level of the frame as mean power in dB
    pub fn mean_level_db(&self) -> f32 {
        if self.db.is_empty() {
            return MIN_DB;
        }
        let mean = self.power_sum(0, self.db.len()) / self.db.len() as f64;
        power_to_db(mean)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WeightingKey {
    weighting: Weighting,
    sample_rate: u32,
    fft_size: usize,
}

/// Normalizes raw frames into `PreparedSpectrum`
pub struct SpectralPreprocessor {
    weighting_key: Option<WeightingKey>,
    weighting_table: Vec<f32>,
    prepared: PreparedSpectrum,
}

impl SpectralPreprocessor {
    pub fn new() -> Self {
        Self {
            weighting_key: None,
            weighting_table: Vec::new(),
            prepared: PreparedSpectrum::default(),
        }
    }

    /// Validate and calibrate a frame
    ///
    /// # Errors
    /// * `BinCountMismatch` - zero bins or `len != fft_size / 2`
    /// * `NonFiniteValues` - a bin holds NaN or +inf (-inf is silence and clamps)
    pub fn process(
        &mut self,
        frame: &SpectrumFrame,
        gain_db: f32,
        weighting: Weighting,
    ) -> Result<&PreparedSpectrum, PipelineError> {
        validate_frame(frame)?;

        let bins = frame.magnitudes_db.len();
        self.ensure_weighting(weighting, frame.sample_rate, frame.fft_size, bins);

        let prepared = &mut self.prepared;
        prepared.db.resize(bins, MIN_DB);
        prepared.power.resize(bins, 0.0);
        prepared.prefix.resize(bins + 1, 0.0);
        prepared.bin_hz = frame.bin_hz();
        prepared.sample_rate = frame.sample_rate;
        prepared.fft_size = frame.fft_size;
        prepared.timestamp_ms = frame.timestamp_ms;

        let mut running = 0.0_f64;
        prepared.prefix[0] = 0.0;
        for (i, &raw) in frame.magnitudes_db.iter().enumerate() {
            let weighted = raw + gain_db + self.weighting_table.get(i).copied().unwrap_or(0.0);
            let clamped = if weighted.is_nan() {
                MIN_DB
            } else {
                weighted.clamp(MIN_DB, MAX_DB)
            };
            prepared.db[i] = clamped;
            let power = db_to_power(clamped);
            prepared.power[i] = power;
            running += power;
            prepared.prefix[i + 1] = running;
        }

        Ok(&self.prepared)
    }

    fn ensure_weighting(&mut self, weighting: Weighting, sample_rate: u32, fft_size: usize, bins: usize) {
        let key = WeightingKey {
            weighting,
            sample_rate,
            fft_size,
        };
        if self.weighting_key == Some(key) && self.weighting_table.len() == bins {
            return;
        }

        let bin_hz = sample_rate as f32 / fft_size as f32;
        self.weighting_table.clear();
        self.weighting_table.extend((0..bins).map(|bin| {
            let hz = bin as f32 * bin_hz;
            match weighting {
                Weighting::Flat => 0.0,
                Weighting::A => a_weighting_db(hz),
                Weighting::C => c_weighting_db(hz),
            }
        }));
        self.weighting_key = Some(key);
        tracing::debug!(
            "[Preprocess] Rebuilt {:?} weighting table for {} bins ({} Hz / {})",
            weighting,
            bins,
            sample_rate,
            fft_size
        );
    }
}

impl Default for SpectralPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_frame(frame: &SpectrumFrame) -> Result<(), PipelineError> {
    let expected = frame.fft_size / 2;
    let actual = frame.magnitudes_db.len();
    if actual == 0 || expected == 0 || actual != expected || frame.sample_rate == 0 {
        return Err(PipelineError::BinCountMismatch { expected, actual });
    }
    if let Some(bin) = frame
        .magnitudes_db
        .iter()
        .position(|value| value.is_nan() || *value == f32::INFINITY)
    {
        return Err(PipelineError::NonFiniteValues { bin });
    }
    Ok(())
}

pub fn db_to_power(db: f32) -> f64 {
    10f64.powf(db as f64 / 10.0)
}

pub fn power_to_db(power: f64) -> f32 {
    (10.0 * power.max(1e-30).log10()) as f32
}

/// A-weighting gain at `hz`, floored at MIN_DB
pub fn a_weighting_db(hz: f32) -> f32 {
    if hz <= 0.0 {
        return MIN_DB;
    }
    let f2 = (hz as f64).powi(2);
    let numerator = 12_194.0_f64.powi(2) * f2 * f2;
    let denominator = (f2 + 20.6_f64.powi(2))
        * ((f2 + 107.7_f64.powi(2)) * (f2 + 737.9_f64.powi(2))).sqrt()
        * (f2 + 12_194.0_f64.powi(2));
    ((20.0 * (numerator / denominator).log10() + 2.0) as f32).max(MIN_DB)
}

/// C-weighting gain at `hz`, floored at MIN_DB
pub fn c_weighting_db(hz: f32) -> f32 {
    if hz <= 0.0 {
        return MIN_DB;
    }
    let f2 = (hz as f64).powi(2);
    let numerator = 12_194.0_f64.powi(2) * f2;
    let denominator = (f2 + 20.6_f64.powi(2)) * (f2 + 12_194.0_f64.powi(2));
    ((20.0 * (numerator / denominator).log10() + 0.06) as f32).max(MIN_DB)
}
