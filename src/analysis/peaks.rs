// PeakDetector - prominence-gated local maxima with sub-bin refinement
//
// Algorithm:
// 1. Scan bins inside the analysis range, skipping a guard band of
//    `prominence_window_bins` at each spectrum edge
// 2. Candidate = local maximum at or above the effective threshold
// 3. Prominence = peak dB - mean dB of the neighborhood, computed from the
//    power prefix sum and skipping the 2 bins hugging each side of the peak
// 4. Quadratic (three-point) interpolation of frequency and amplitude
// 5. Keep the `max_peaks` most prominent, then tag harmonic relations
//
// The scan is linear in bin count and writes into a buffer owned by the
// detector, so steady-state frames do not allocate.
//
// References:
// - J.O. Smith, "Quadratic Interpolation of Spectral Peaks", Spectral Audio Signal Processing

use crate::analysis::pitch::cents_between;
use crate::analysis::preprocess::{power_to_db, PreparedSpectrum};
use crate::analysis::types::DetectedPeak;
use crate::config::DetectorSettings;

/// Bins on each side of a peak excluded from its neighborhood average
pub const SKIRT_EXCLUSION_BINS: usize = 2;

/// Upper bound on reported Q
pub const MAX_Q: f32 = 1_000.0;

pub struct PeakDetector {
    peaks: Vec<DetectedPeak>,
}

impl PeakDetector {
    pub fn new(capacity: usize) -> Self {
        Self {
            peaks: Vec::with_capacity(capacity),
        }
    }

    /// Find peaks in one prepared frame
    ///
    /// Every returned peak satisfies `amplitude_db >= threshold_db` and
    /// `prominence_db >= settings.min_prominence_db`.
    pub fn detect(
        &mut self,
        spectrum: &PreparedSpectrum,
        threshold_db: f32,
        settings: &DetectorSettings,
    ) -> &[DetectedPeak] {
        self.peaks.clear();

        let db = spectrum.db();
        let window = settings.prominence_window_bins.max(SKIRT_EXCLUSION_BINS + 2);
        if db.len() <= 2 * window + 1 {
            return &self.peaks;
        }

        let lo = window.max(spectrum.hz_to_bin(settings.min_frequency_hz).ceil() as usize);
        let hi = (db.len() - 1 - window).min(spectrum.hz_to_bin(settings.max_frequency_hz).floor() as usize);
        if lo > hi {
            return &self.peaks;
        }
        let neighborhood_bins = 2 * (window - SKIRT_EXCLUSION_BINS);

        for bin in lo..=hi {
            let value = db[bin];
            if value < threshold_db || value <= db[bin - 1] || value < db[bin + 1] {
                continue;
            }

            let left = spectrum.power_sum(bin - window, bin - SKIRT_EXCLUSION_BINS);
            let right = spectrum.power_sum(bin + SKIRT_EXCLUSION_BINS + 1, bin + window + 1);
            let neighborhood_db = power_to_db((left + right) / neighborhood_bins as f64);
            let prominence_db = value - neighborhood_db;
            if prominence_db < settings.min_prominence_db {
                continue;
            }

            let (offset, refined_db) = interpolate_peak(db[bin - 1], value, db[bin + 1]);
            // interpolation never lowers the apex below the sampled maximum
            let amplitude_db = refined_db.max(value);

            self.peaks.push(DetectedPeak {
                bin,
                frequency_hz: spectrum.bin_to_hz(bin as f32 + offset),
                amplitude_db,
                prominence_db,
                harmonic_of_hz: None,
                timestamp_ms: spectrum.timestamp_ms(),
            });
        }

        if self.peaks.len() > settings.max_peaks {
            self.peaks
                .sort_unstable_by(|a, b| b.prominence_db.total_cmp(&a.prominence_db));
            self.peaks.truncate(settings.max_peaks);
            self.peaks
                .sort_unstable_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));
        }

        annotate_harmonics(
            &mut self.peaks,
            settings.harmonic_tolerance_cents,
            settings.max_harmonic,
        );

        &self.peaks
    }
}

/// Three-point quadratic interpolation around a maximum
///
/// Returns the sub-bin offset (clamped to [-0.5, 0.5]) and the refined
/// amplitude. Degenerate or non-finite fits fall back to the raw bin.
pub fn interpolate_peak(alpha: f32, beta: f32, gamma: f32) -> (f32, f32) {
    let denominator = alpha - 2.0 * beta + gamma;
    if denominator.abs() < 1e-12 {
        return (0.0, beta);
    }
    let offset = (0.5 * (alpha - gamma) / denominator).clamp(-0.5, 0.5);
    let amplitude = beta - 0.25 * (alpha - gamma) * offset;
    if offset.is_finite() && amplitude.is_finite() {
        (offset, amplitude)
    } else {
        (0.0, beta)
    }
}

/// Quality factor from the -3 dB bandwidth around `bin`
///
/// Walks outward until the spectrum drops 3 dB below `peak_db` and linearly
/// interpolates the crossing on each side.
pub fn estimate_q(db: &[f32], bin: usize, peak_db: f32, bin_hz: f32, frequency_hz: f32) -> f32 {
    if db.is_empty() || bin >= db.len() || bin_hz <= 0.0 || frequency_hz <= 0.0 {
        return 0.0;
    }
    let target = peak_db - 3.0;

    let mut left_edge = 0.0_f32;
    let mut k = bin;
    while k > 0 {
        k -= 1;
        if db[k] <= target {
            let span = db[k + 1] - db[k];
            let frac = if span > 0.0 { (db[k + 1] - target) / span } else { 0.0 };
            left_edge = (k + 1) as f32 - frac.clamp(0.0, 1.0);
            break;
        }
    }

    let mut right_edge = (db.len() - 1) as f32;
    let mut k = bin;
    while k + 1 < db.len() {
        k += 1;
        if db[k] <= target {
            let span = db[k - 1] - db[k];
            let frac = if span > 0.0 { (db[k - 1] - target) / span } else { 0.0 };
            right_edge = (k - 1) as f32 + frac.clamp(0.0, 1.0);
            break;
        }
    }

    let bandwidth_hz = ((right_edge - left_edge).max(1e-3)) * bin_hz;
    (frequency_hz / bandwidth_hz).clamp(0.0, MAX_Q)
}

/// Tag each peak that sits at an integer multiple of a lower peak
///
/// `peaks` must be sorted by ascending frequency. The lowest matching
/// fundamental wins.
pub fn annotate_harmonics(peaks: &mut [DetectedPeak], tolerance_cents: f32, max_harmonic: u32) {
    for j in 1..peaks.len() {
        let upper = peaks[j].frequency_hz;
        peaks[j].harmonic_of_hz = peaks[..j]
            .iter()
            .map(|lower| lower.frequency_hz)
            .find(|&fundamental| harmonic_number(upper, fundamental, tolerance_cents, max_harmonic).is_some());
    }
}

/// Integer `k` such that `upper ≈ k * fundamental` within `tolerance_cents`
pub fn harmonic_number(
    upper: f32,
    fundamental: f32,
    tolerance_cents: f32,
    max_harmonic: u32,
) -> Option<u32> {
    if fundamental <= 0.0 || upper <= fundamental {
        return None;
    }
    let k = (upper / fundamental).round();
    if k < 2.0 || k > max_harmonic as f32 {
        return None;
    }
    let deviation = cents_between(upper, fundamental * k).abs();
    (deviation <= tolerance_cents).then_some(k as u32)
}
