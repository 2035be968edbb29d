// NoiseFloorEstimator - adaptive median noise floor
//
// Algorithm:
// 1. Sample a fixed number of bins spread evenly across the analysis range
//    (constant cost regardless of FFT size)
// 2. Median of the samples via in-place linear-time selection
// 3. Asymmetric exponential smoothing: fast attack toward a rising floor,
//    slow release toward a falling one, alpha = 1 - exp(-dt / tau)
// 4. Detection threshold = max(absolute, floor + relative)

use crate::analysis::preprocess::PreparedSpectrum;
use crate::config::DetectorSettings;

/// Per-frame noise floor result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloorEstimate {
    /// Median of this frame's sample set
    pub median_db: f32,
    /// Smoothed floor after this frame
    pub floor_db: f32,
    /// Effective peak acceptance threshold
    pub threshold_db: f32,
    pub sample_min_db: f32,
    pub sample_max_db: f32,
    pub sample_count: usize,
}

pub struct NoiseFloorEstimator {
    samples: Vec<f32>,
    floor_db: Option<f32>,
    last_timestamp_ms: Option<f64>,
}

impl NoiseFloorEstimator {
    pub fn new(sample_capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(sample_capacity),
            floor_db: None,
            last_timestamp_ms: None,
        }
    }

    /// Current smoothed floor, if any frame has been seen
    pub fn floor_db(&self) -> Option<f32> {
        self.floor_db
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.floor_db = None;
        self.last_timestamp_ms = None;
    }

    /// Fold one frame into the floor estimate
    pub fn update(&mut self, spectrum: &PreparedSpectrum, settings: &DetectorSettings) -> FloorEstimate {
        self.collect_samples(spectrum, settings);

        let (sample_min_db, sample_max_db) = self
            .samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let median_db = median_in_place(&mut self.samples);

        let now = spectrum.timestamp_ms();
        let floor_db = match (self.floor_db, self.last_timestamp_ms) {
            (Some(previous), Some(last)) => {
                let dt = (now - last).max(0.0) as f32;
                let tau = if median_db > previous {
                    settings.noise_floor_attack_ms
                } else {
                    settings.noise_floor_release_ms
                };
                let alpha = smoothing_alpha(dt, tau);
                previous + alpha * (median_db - previous)
            }
            _ => median_db,
        };
        self.floor_db = Some(floor_db);
        self.last_timestamp_ms = Some(now);

        let threshold_db = settings
            .absolute_threshold_db
            .max(floor_db + settings.relative_threshold_db());

        FloorEstimate {
            median_db,
            floor_db,
            threshold_db,
            sample_min_db,
            sample_max_db,
            sample_count: self.samples.len(),
        }
    }

    fn collect_samples(&mut self, spectrum: &PreparedSpectrum, settings: &DetectorSettings) {
        self.samples.clear();
        let db = spectrum.db();
        if db.is_empty() {
            return;
        }

        let last_bin = db.len() - 1;
        let mut lo = (spectrum.hz_to_bin(settings.min_frequency_hz).ceil() as usize).clamp(1, last_bin);
        let mut hi = (spectrum.hz_to_bin(settings.max_frequency_hz).floor() as usize).min(last_bin);
        if lo > hi {
            lo = 0;
            hi = last_bin;
        }

        let span = hi - lo;
        let count = settings.noise_floor_samples.min(span + 1).max(1);
        if count == 1 {
            self.samples.push(db[lo]);
            return;
        }
        for k in 0..count {
            let bin = lo + (k * span + (count - 1) / 2) / (count - 1);
            self.samples.push(db[bin.min(hi)]);
        }
    }
}

/// Per-frame smoothing coefficient for time constant `tau_ms`
pub fn smoothing_alpha(dt_ms: f32, tau_ms: f32) -> f32 {
    if tau_ms <= 0.0 {
        return 1.0;
    }
    1.0 - (-dt_ms / tau_ms).exp()
}

/// Median by linear-time selection; reorders `values`
pub fn median_in_place(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return crate::analysis::preprocess::MIN_DB;
    }
    let mid = values.len() / 2;
    let (_, median, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *median
}
