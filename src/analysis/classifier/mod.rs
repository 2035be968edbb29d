// Classifier - multi-algorithm feedback classification
//
// Per frame the classifier refreshes two frame-level contexts: the content
// profile (speech/music/compressed) and the comb pattern across live tracks.
// Per established track it then runs every strategy, fuses the selected
// scores, and applies the label rules below, first match wins:
//
// 1. growth, elapsed growth >= runaway_growth_db, p >= runaway  => RUNAWAY
//    (also held once the peak is pinned at full scale after that growth)
// 2. overtone count >= instrument_min_harmonics                 => INSTRUMENT
// 3. growth, p >= growing                                       => GROWING
// 4. vibrato modulation, or unstable and low Q                  => WHISTLE
// 5. no growth, mean Q >= resonance_min_q, stable               => RESONANCE
// 6. p >= ring                                                  => POSSIBLE_RING
// 7.                                                            => UNKNOWN
//
// "growth" means velocity >= growth threshold * content multiplier while
// the level sits at least feedback_threshold_db above the noise floor.

pub mod algorithms;
pub mod content;
pub mod fusion;

use serde::{Deserialize, Serialize};

pub use algorithms::{AlgorithmScore, CombPattern, FeedbackAlgorithm, TrackSnapshot};
pub use content::{ContentAnalyzer, ContentProfile, ContentType};
pub use fusion::{AlgorithmSet, FusedScore, FusionPolicy};

use crate::analysis::preprocess::{PreparedSpectrum, MAX_DB};
use crate::analysis::tracking::TrackedPeak;
use crate::config::DetectorSettings;

/// Distance below full scale at which a peak counts as clipped (dB)
pub const SATURATION_MARGIN_DB: f32 = 1.0;

/// Coarse class of a tracked peak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackLabel {
    Feedback,
    Whistle,
    Instrument,
    Resonance,
    Unknown,
}

/// Severity tier, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Runaway,
    Growing,
    Resonance,
    PossibleRing,
    Whistle,
    Instrument,
    None,
}

impl Severity {
    /// Higher is more urgent
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Runaway => 6,
            Severity::Growing => 5,
            Severity::Resonance => 4,
            Severity::PossibleRing => 3,
            Severity::Whistle | Severity::Instrument => 2,
            Severity::None => 0,
        }
    }
}

/// Outcome of one classification pass for one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub track_id: u64,
    pub label: FeedbackLabel,
    pub severity: Severity,
    pub probability: f32,
    pub confidence: f32,
    pub scores: Vec<AlgorithmScore>,
    pub reasons: Vec<String>,
    pub content: ContentType,
    pub growth_multiplier: f32,
    pub comb: Option<CombPattern>,
    pub timestamp_ms: f64,
}

impl ClassificationResult {
    /// Whether this result should surface as an advisory
    pub fn is_actionable(&self, settings: &DetectorSettings) -> bool {
        match self.severity {
            Severity::None => false,
            Severity::Whistle => !settings.ignore_whistle,
            Severity::Instrument => !settings.ignore_instrument,
            _ => true,
        }
    }
}

pub struct Classifier {
    algorithms: Vec<Box<dyn FeedbackAlgorithm>>,
    content: ContentAnalyzer,
    comb: Option<CombPattern>,
    frequencies: Vec<f32>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::with_algorithms(algorithms::default_algorithms())
    }

    pub fn with_algorithms(algorithms: Vec<Box<dyn FeedbackAlgorithm>>) -> Self {
        Self {
            algorithms,
            content: ContentAnalyzer::new(128),
            comb: None,
            frequencies: Vec::new(),
        }
    }

    pub fn content(&self) -> &ContentProfile {
        self.content.profile()
    }

    pub fn comb(&self) -> Option<&CombPattern> {
        self.comb.as_ref()
    }

    pub fn reset(&mut self) {
        self.content.reset();
        self.comb = None;
    }

    /// Refresh frame-level context ahead of per-track classification
    pub fn begin_frame<'a>(
        &mut self,
        spectrum: &PreparedSpectrum,
        floor_db: f32,
        live_tracks: impl Iterator<Item = &'a TrackedPeak>,
        settings: &DetectorSettings,
    ) {
        self.content
            .observe(spectrum.mean_level_db(), floor_db, &settings.fusion);

        self.frequencies.clear();
        self.frequencies
            .extend(live_tracks.filter(|t| !t.is_suppressed()).map(|t| t.frequency_hz));
        self.comb = algorithms::detect_comb(&mut self.frequencies, settings);
    }

    pub fn classify(
        &self,
        track: &TrackedPeak,
        spectrum: &PreparedSpectrum,
        floor_db: f32,
        settings: &DetectorSettings,
    ) -> ClassificationResult {
        let profile = *self.content.profile();
        let snapshot = TrackSnapshot {
            track,
            spectrum,
            floor_db,
            content: &profile,
            comb: self.comb.as_ref(),
        };

        let scores: Vec<AlgorithmScore> = self
            .algorithms
            .iter()
            .filter_map(|algorithm| algorithm.evaluate(&snapshot, settings))
            .collect();

        let selected = FusionPolicy::select(&settings.fusion, track.history().len(), profile.content);
        let fused = FusionPolicy::fuse(&scores, selected, &settings.fusion.weights);

        let mut reasons = Vec::new();
        let (label, severity) = decide(track, &fused, floor_db, &profile, settings, &mut reasons);

        ClassificationResult {
            track_id: track.id,
            label,
            severity,
            probability: fused.probability,
            confidence: fused.confidence,
            scores,
            reasons,
            content: profile.content,
            growth_multiplier: profile.growth_multiplier,
            comb: self
                .comb
                .as_ref()
                .filter(|c| c.contains(track.frequency_hz, settings.fusion.comb_tolerance))
                .cloned(),
            timestamp_ms: track.last_update_ms,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

fn decide(
    track: &TrackedPeak,
    fused: &FusedScore,
    floor_db: f32,
    profile: &ContentProfile,
    settings: &DetectorSettings,
    reasons: &mut Vec<String>,
) -> (FeedbackLabel, Severity) {
    let features = &track.features;
    let p = fused.probability;
    let fusion = &settings.fusion;

    let growth_threshold = settings.growth_rate_threshold_db_s * profile.growth_multiplier;
    let level_above_floor = track.amplitude_db - floor_db;
    let loud = level_above_floor >= settings.feedback_threshold_db;
    let growing = loud && features.velocity_db_s >= growth_threshold;
    let elapsed = track.elapsed_growth_db();

    if growing && elapsed >= settings.runaway_growth_db && p >= fusion.runaway_probability {
        reasons.push(format!(
            "growing {:.1} dB/s (threshold {:.1}), +{:.1} dB since onset",
            features.velocity_db_s, growth_threshold, elapsed
        ));
        reasons.push(format!("feedback probability {:.2}", p));
        return (FeedbackLabel::Feedback, Severity::Runaway);
    }

    // a clipped peak can no longer show growth
    let saturated = track.amplitude_db >= MAX_DB - SATURATION_MARGIN_DB;
    if saturated && loud && elapsed >= settings.runaway_growth_db {
        reasons.push(format!(
            "pinned at {:.1} dB full scale, +{:.1} dB since onset",
            track.amplitude_db, elapsed
        ));
        return (FeedbackLabel::Feedback, Severity::Runaway);
    }

    if features.harmonic_count >= settings.instrument_min_harmonics {
        reasons.push(format!("{} harmonic overtones", features.harmonic_count));
        return (FeedbackLabel::Instrument, Severity::Instrument);
    }

    if growing && p >= fusion.growing_probability {
        reasons.push(format!(
            "growing {:.1} dB/s (threshold {:.1}) at {:.1} dB above floor",
            features.velocity_db_s, growth_threshold, level_above_floor
        ));
        reasons.push(format!("feedback probability {:.2}", p));
        return (FeedbackLabel::Feedback, Severity::Growing);
    }

    let unstable = features.stability_cents > settings.stability_max_cents;
    if features.modulation >= settings.whistle_modulation
        || (unstable && features.mean_q < settings.resonance_min_q)
    {
        reasons.push(format!(
            "pitch modulation {:.2}, stability {:.1} cents",
            features.modulation, features.stability_cents
        ));
        return (FeedbackLabel::Whistle, Severity::Whistle);
    }

    if features.velocity_db_s < growth_threshold
        && features.mean_q >= settings.resonance_min_q
        && !unstable
    {
        reasons.push(format!(
            "steady narrow peak, Q {:.1}, stability {:.1} cents",
            features.mean_q, features.stability_cents
        ));
        return (FeedbackLabel::Resonance, Severity::Resonance);
    }

    if p >= fusion.ring_probability {
        reasons.push(format!("feedback probability {:.2}", p));
        return (FeedbackLabel::Feedback, Severity::PossibleRing);
    }

    (FeedbackLabel::Unknown, Severity::None)
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
