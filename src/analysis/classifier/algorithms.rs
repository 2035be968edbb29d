// Feedback algorithms - independent scoring strategies over a track snapshot
//
// Every strategy answers "how feedback-like is this track?" with a
// probability in [0, 1], or `None` when it lacks the data to have an
// opinion. `None` scores are left out of fusion entirely.
//
// References:
// - van Waterschoot & Moonen, "Fifty Years of Acoustic Feedback Control",
//   Proc. IEEE 2011 (MSD, phase and peakedness cues)

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::analysis::classifier::content::ContentProfile;
use crate::analysis::preprocess::PreparedSpectrum;
use crate::analysis::tracking::TrackedPeak;
use crate::config::{Algorithm, DetectorSettings};

/// Speed of sound used for comb path lengths (m/s)
pub const SPEED_OF_SOUND_M_S: f32 = 343.0;

/// Compression scores below this contribute nothing
const COMPRESSION_MIN_SCORE: f32 = 0.3;

/// Multiplier applied to MSD probability on a decaying trajectory
const DECAY_DISCOUNT: f32 = 0.2;

/// Everything a strategy may look at for one track
pub struct TrackSnapshot<'a> {
    pub track: &'a TrackedPeak,
    pub spectrum: &'a PreparedSpectrum,
    pub floor_db: f32,
    pub content: &'a ContentProfile,
    pub comb: Option<&'a CombPattern>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmScore {
    pub algorithm: Algorithm,
    pub probability: f32,
}

/// Evenly spaced peaks consistent with one acoustic delay path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombPattern {
    pub spacing_hz: f32,
    pub path_length_m: f32,
    /// Frequencies that sit on the comb
    pub matched_hz: Vec<f32>,
}

impl CombPattern {
    pub fn contains(&self, frequency_hz: f32, tolerance: f32) -> bool {
        on_comb(frequency_hz, self.spacing_hz, tolerance)
    }
}

pub trait FeedbackAlgorithm: Send {
    fn kind(&self) -> Algorithm;

    fn score(&self, snapshot: &TrackSnapshot<'_>, settings: &DetectorSettings) -> Option<f32>;

    fn evaluate(&self, snapshot: &TrackSnapshot<'_>, settings: &DetectorSettings) -> Option<AlgorithmScore> {
        self.score(snapshot, settings)
            .filter(|p| p.is_finite())
            .map(|p| AlgorithmScore {
                algorithm: self.kind(),
                probability: p.clamp(0.0, 1.0),
            })
    }
}

/// The full strategy set, one per `Algorithm`
pub fn default_algorithms() -> Vec<Box<dyn FeedbackAlgorithm>> {
    vec![
        Box::new(MagnitudeSlopeDeviation),
        Box::new(PhaseCoherence),
        Box::new(SpectralPeakedness),
        Box::new(CombMatch),
        Box::new(CompressionCue),
    ]
}

/// Mean squared second difference of the amplitude trajectory
///
/// Regenerative feedback grows (or holds) along a smooth exponential, which
/// is a straight line in dB; music and speech jitter. A smooth but decaying
/// trajectory is a natural ring-down and is discounted.
pub struct MagnitudeSlopeDeviation;

impl FeedbackAlgorithm for MagnitudeSlopeDeviation {
    fn kind(&self) -> Algorithm {
        Algorithm::Msd
    }

    fn score(&self, snapshot: &TrackSnapshot<'_>, settings: &DetectorSettings) -> Option<f32> {
        let history = snapshot.track.history();
        let fusion = &settings.fusion;
        if history.len() < fusion.msd_min_frames.max(3) {
            return None;
        }
        let amplitudes: Vec<f32> = history.iter().map(|s| s.amplitude_db).collect();
        let msd = amplitudes
            .windows(3)
            .map(|w| {
                let d2 = w[2] - 2.0 * w[1] + w[0];
                d2 * d2
            })
            .sum::<f32>()
            / (amplitudes.len() - 2) as f32;

        let mut p = (-msd / fusion.msd_threshold_db2.max(1e-6)).exp();
        if snapshot.track.features.velocity_db_s < -0.5 * settings.growth_rate_threshold_db_s {
            p *= DECAY_DISCOUNT;
        }
        Some(p)
    }
}

/// Mean resultant length of wrapped phase accelerations
///
/// A stationary sinusoid advances phase by a constant amount per hop, so its
/// second difference clusters tightly around zero.
pub struct PhaseCoherence;

impl FeedbackAlgorithm for PhaseCoherence {
    fn kind(&self) -> Algorithm {
        Algorithm::PhaseCoherence
    }

    fn score(&self, snapshot: &TrackSnapshot<'_>, settings: &DetectorSettings) -> Option<f32> {
        let phases: Vec<f32> = snapshot
            .track
            .history()
            .iter()
            .rev()
            .map_while(|s| s.phase)
            .collect();
        if phases.len() < settings.fusion.phase_min_frames.max(3) {
            return None;
        }
        let (mut re, mut im) = (0.0_f32, 0.0_f32);
        for w in phases.windows(3) {
            let acceleration = wrap_phase(w[0] - 2.0 * w[1] + w[2]);
            re += acceleration.cos();
            im += acceleration.sin();
        }
        let n = (phases.len() - 2) as f32;
        Some((re * re + im * im).sqrt() / n)
    }
}

/// Flatness and kurtosis of the power spectrum around the peak
pub struct SpectralPeakedness;

impl FeedbackAlgorithm for SpectralPeakedness {
    fn kind(&self) -> Algorithm {
        Algorithm::SpectralFlatness
    }

    fn score(&self, snapshot: &TrackSnapshot<'_>, settings: &DetectorSettings) -> Option<f32> {
        let power = snapshot.spectrum.power();
        let bin = snapshot.track.bin;
        let half = settings.fusion.flatness_window_bins;
        if power.is_empty() || bin >= power.len() {
            return None;
        }
        let start = bin.saturating_sub(half);
        let end = (bin + half + 1).min(power.len());
        let window = &power[start..end];
        if window.len() < 5 {
            return None;
        }

        let flatness = spectral_flatness(window);
        let kurtosis = excess_kurtosis(window);
        let reference = settings.fusion.kurtosis_reference.max(1e-3);
        Some(0.6 * (1.0 - flatness) + 0.4 * (kurtosis / reference).clamp(0.0, 1.0))
    }
}

/// Membership in the frame's comb pattern
pub struct CombMatch;

impl FeedbackAlgorithm for CombMatch {
    fn kind(&self) -> Algorithm {
        Algorithm::Comb
    }

    fn score(&self, snapshot: &TrackSnapshot<'_>, settings: &DetectorSettings) -> Option<f32> {
        let comb = snapshot.comb?;
        let fusion = &settings.fusion;
        if !comb.contains(snapshot.track.frequency_hz, fusion.comb_tolerance) {
            return None;
        }
        Some((comb.matched_hz.len() as f32 / (fusion.comb_min_peaks + 2) as f32).min(1.0))
    }
}

/// Compressed program keeps feedback looking flat; weight it by persistence
pub struct CompressionCue;

impl FeedbackAlgorithm for CompressionCue {
    fn kind(&self) -> Algorithm {
        Algorithm::Compression
    }

    fn score(&self, snapshot: &TrackSnapshot<'_>, settings: &DetectorSettings) -> Option<f32> {
        let score = snapshot.content.compression_score?;
        if score < COMPRESSION_MIN_SCORE {
            return None;
        }
        let persistence =
            (snapshot.track.features.persistence_ms / (2.0 * settings.sustain_ms.max(1.0))).min(1.0) as f32;
        Some(score * persistence)
    }
}

/// Find the dominant comb spacing among live peak frequencies
///
/// Candidate spacings are the gaps between neighbouring frequencies that map
/// to a delay path inside the configured range. The candidate explaining the
/// most peaks wins; ties go to the wider spacing.
pub fn detect_comb(frequencies: &mut Vec<f32>, settings: &DetectorSettings) -> Option<CombPattern> {
    let fusion = &settings.fusion;
    if frequencies.len() < fusion.comb_min_peaks {
        return None;
    }
    frequencies.sort_by(|a, b| a.total_cmp(b));

    let min_spacing = SPEED_OF_SOUND_M_S / fusion.comb_max_path_m;
    let max_spacing = SPEED_OF_SOUND_M_S / fusion.comb_min_path_m;

    let mut best: Option<(usize, f32)> = None;
    for pair in frequencies.windows(2) {
        let spacing = pair[1] - pair[0];
        if spacing < min_spacing || spacing > max_spacing {
            continue;
        }
        let matched = frequencies
            .iter()
            .filter(|&&f| on_comb(f, spacing, fusion.comb_tolerance))
            .count();
        let better = match best {
            None => true,
            Some((count, best_spacing)) => matched > count || (matched == count && spacing > best_spacing),
        };
        if better {
            best = Some((matched, spacing));
        }
    }

    let (matched, spacing_hz) = best?;
    if matched < fusion.comb_min_peaks {
        return None;
    }
    Some(CombPattern {
        spacing_hz,
        path_length_m: SPEED_OF_SOUND_M_S / spacing_hz,
        matched_hz: frequencies
            .iter()
            .copied()
            .filter(|&f| on_comb(f, spacing_hz, fusion.comb_tolerance))
            .collect(),
    })
}

fn on_comb(frequency_hz: f32, spacing_hz: f32, tolerance: f32) -> bool {
    if spacing_hz <= 0.0 {
        return false;
    }
    let ratio = frequency_hz / spacing_hz;
    ratio.round() >= 1.0 && (ratio - ratio.round()).abs() <= tolerance
}

/// Wrap an angle into [-PI, PI)
pub fn wrap_phase(angle: f32) -> f32 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

/// Geometric over arithmetic mean of linear power
pub fn spectral_flatness(power: &[f64]) -> f32 {
    if power.is_empty() {
        return 1.0;
    }
    let n = power.len() as f64;
    let log_mean = power.iter().map(|p| p.max(1e-30).ln()).sum::<f64>() / n;
    let arithmetic = power.iter().sum::<f64>() / n;
    if arithmetic <= 0.0 {
        return 1.0;
    }
    (log_mean.exp() / arithmetic).clamp(0.0, 1.0) as f32
}

/// Excess kurtosis of the power values treated as a sample set
pub fn excess_kurtosis(power: &[f64]) -> f32 {
    if power.len() < 4 {
        return 0.0;
    }
    let n = power.len() as f64;
    let mean = power.iter().sum::<f64>() / n;
    let (m2, m4) = power.iter().fold((0.0, 0.0), |(m2, m4), p| {
        let d = p - mean;
        (m2 + d * d, m4 + d * d * d * d)
    });
    let (m2, m4) = (m2 / n, m4 / n);
    // rounding noise on a flat window
    if m2 <= 1e-12 * mean * mean {
        return 0.0;
    }
    (m4 / (m2 * m2) - 3.0) as f32
}
