// TrackedPeak - one resonance followed across frames
//
// Each track owns a bounded history of samples and recomputes its derived
// features after every matched update. Relations to other tracks are held
// only as ids (`harmonic_of`) and re-resolved by the manager each frame.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::analysis::pitch::cents_between;
use crate::config::DetectorSettings;

/// Track lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// First detected, provisional
    Onset,
    /// Present for at least `sustain_ms`
    Sustained,
    /// Classified at least once
    Active,
    /// Unmatched, held for up to `clear_ms`
    Clearing,
    /// Inactive, awaiting removal
    Cleared,
}

/// One matched observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackSample {
    pub time_ms: f64,
    pub frequency_hz: f32,
    pub amplitude_db: f32,
    pub prominence_db: f32,
    pub q: f32,
    pub phase: Option<f32>,
}

/// Rolling features derived from the history
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackFeatures {
    /// Std-dev of recent frequency in cents
    pub stability_cents: f32,
    pub mean_q: f32,
    pub min_q: f32,
    /// Least-squares amplitude slope over the growth window (dB/s)
    pub velocity_db_s: f32,
    pub mean_velocity_db_s: f32,
    pub max_velocity_db_s: f32,
    pub persistence_ms: f64,
    /// 1.0 for an exact integer relation, falling to 0.0 at the tolerance edge
    pub harmonicity: f32,
    /// Overtone tracks resolved to this track as their root
    pub harmonic_count: usize,
    /// Vibrato-like frequency modulation in [0, 1]
    pub modulation: f32,
}

#[derive(Debug, Clone)]
pub struct TrackedPeak {
    pub id: u64,
    pub bin: usize,
    pub frequency_hz: f32,
    pub amplitude_db: f32,
    pub prominence_db: f32,
    pub q: f32,
    pub onset_ms: f64,
    pub onset_amplitude_db: f32,
    pub last_update_ms: f64,
    pub cleared_at_ms: Option<f64>,
    pub state: TrackState,
    pub active: bool,
    pub is_harmonic_root: bool,
    /// Id of the lower track this one is an overtone of
    pub harmonic_of: Option<u64>,
    pub features: TrackFeatures,
    history: VecDeque<TrackSample>,
    history_len: usize,
    velocity_updates: u32,
    classified: bool,
}

impl TrackedPeak {
    pub fn new(id: u64, bin: usize, sample: TrackSample, history_len: usize) -> Self {
        let mut history = VecDeque::with_capacity(history_len);
        history.push_back(sample);
        Self {
            id,
            bin,
            frequency_hz: sample.frequency_hz,
            amplitude_db: sample.amplitude_db,
            prominence_db: sample.prominence_db,
            q: sample.q,
            onset_ms: sample.time_ms,
            onset_amplitude_db: sample.amplitude_db,
            last_update_ms: sample.time_ms,
            cleared_at_ms: None,
            state: TrackState::Onset,
            active: true,
            is_harmonic_root: false,
            harmonic_of: None,
            features: TrackFeatures {
                mean_q: sample.q,
                min_q: sample.q,
                ..TrackFeatures::default()
            },
            history,
            history_len: history_len.max(2),
            velocity_updates: 0,
            classified: false,
        }
    }

    pub fn history(&self) -> &VecDeque<TrackSample> {
        &self.history
    }

    /// Suppressed tracks are overtones of another track and never advise
    pub fn is_suppressed(&self) -> bool {
        self.harmonic_of.is_some()
    }

    /// Eligible for classification
    pub fn is_established(&self) -> bool {
        matches!(self.state, TrackState::Sustained | TrackState::Active)
    }

    /// Amplitude gained since onset (dB)
    pub fn elapsed_growth_db(&self) -> f32 {
        self.amplitude_db - self.onset_amplitude_db
    }

    pub fn mark_classified(&mut self) {
        self.classified = true;
        if self.state == TrackState::Sustained {
            self.state = TrackState::Active;
        }
    }

    /// Fold a matched observation into the track
    pub fn record(&mut self, bin: usize, sample: TrackSample, settings: &DetectorSettings) {
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(sample);

        self.bin = bin;
        self.frequency_hz = sample.frequency_hz;
        self.amplitude_db = sample.amplitude_db;
        self.prominence_db = sample.prominence_db;
        self.q = sample.q;
        self.last_update_ms = sample.time_ms;

        self.state = if sample.time_ms - self.onset_ms >= settings.sustain_ms {
            if self.classified {
                TrackState::Active
            } else {
                TrackState::Sustained
            }
        } else {
            TrackState::Onset
        };

        self.recompute_features(settings);
    }

    /// Advance an unmatched track through clearing
    ///
    /// Returns true when this call deactivated the track.
    pub fn age(&mut self, now_ms: f64, settings: &DetectorSettings) -> bool {
        if !self.active {
            return false;
        }
        let silent_ms = now_ms - self.last_update_ms;
        if silent_ms >= settings.clear_ms {
            self.deactivate(now_ms);
            true
        } else {
            if silent_ms > 0.0 {
                self.state = TrackState::Clearing;
            }
            false
        }
    }

    pub fn deactivate(&mut self, now_ms: f64) {
        self.state = TrackState::Cleared;
        self.active = false;
        self.cleared_at_ms = Some(now_ms);
        self.harmonic_of = None;
        self.is_harmonic_root = false;
    }

    /// Cleared long enough to drop from the registry
    pub fn is_expired(&self, now_ms: f64, grace_ms: f64) -> bool {
        self.cleared_at_ms
            .map(|cleared| now_ms - cleared >= grace_ms)
            .unwrap_or(false)
    }

    fn recompute_features(&mut self, settings: &DetectorSettings) {
        let now = self.last_update_ms;
        let window = settings.stability_window.min(self.history.len());
        let recent = self.history.iter().skip(self.history.len() - window);
        let frequencies: Vec<f32> = recent.map(|s| s.frequency_hz).collect();

        let (stability, modulation) = frequency_statistics(&frequencies);
        self.features.stability_cents = stability;
        self.features.modulation = modulation;

        let (sum_q, min_q) = self
            .history
            .iter()
            .fold((0.0_f32, f32::INFINITY), |(sum, min), s| (sum + s.q, min.min(s.q)));
        self.features.mean_q = sum_q / self.history.len() as f32;
        self.features.min_q = min_q;

        let velocity = growth_velocity(&self.history, now - settings.growth_window_ms);
        self.features.velocity_db_s = velocity;
        self.velocity_updates += 1;
        let n = self.velocity_updates as f32;
        self.features.mean_velocity_db_s += (velocity - self.features.mean_velocity_db_s) / n;
        self.features.max_velocity_db_s = if self.velocity_updates == 1 {
            velocity
        } else {
            self.features.max_velocity_db_s.max(velocity)
        };

        self.features.persistence_ms = now - self.onset_ms;
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            id: self.id,
            bin: self.bin,
            frequency_hz: self.frequency_hz,
            amplitude_db: self.amplitude_db,
            q: self.q,
            state: self.state,
            active: self.active,
            is_harmonic_root: self.is_harmonic_root,
            harmonic_of: self.harmonic_of,
            onset_ms: self.onset_ms,
            last_update_ms: self.last_update_ms,
            features: self.features,
        }
    }
}

/// Host-facing view of a track for `TracksUpdate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: u64,
    pub bin: usize,
    pub frequency_hz: f32,
    pub amplitude_db: f32,
    pub q: f32,
    pub state: TrackState,
    pub active: bool,
    pub is_harmonic_root: bool,
    pub harmonic_of: Option<u64>,
    pub onset_ms: f64,
    pub last_update_ms: f64,
    pub features: TrackFeatures,
}

/// Cents std-dev and modulation score of a frequency run
///
/// Modulation scales the deviation (saturating at 20 cents) by how often
/// the frequency changes direction (saturating at 4 reversals).
fn frequency_statistics(frequencies: &[f32]) -> (f32, f32) {
    if frequencies.len() < 2 {
        return (0.0, 0.0);
    }
    let mean_hz = frequencies.iter().sum::<f32>() / frequencies.len() as f32;
    let cents: Vec<f32> = frequencies
        .iter()
        .map(|&f| cents_between(f, mean_hz))
        .collect();
    let variance = cents.iter().map(|c| c * c).sum::<f32>() / cents.len() as f32;
    let stability = variance.sqrt();

    let mut reversals = 0usize;
    let mut last_sign = 0.0_f32;
    for pair in cents.windows(2) {
        let delta = pair[1] - pair[0];
        if delta.abs() < 0.5 {
            continue;
        }
        let sign = delta.signum();
        if last_sign != 0.0 && sign != last_sign {
            reversals += 1;
        }
        last_sign = sign;
    }

    let modulation = (stability / 20.0).min(1.0) * (reversals as f32 / 4.0).min(1.0);
    (stability, modulation)
}

/// Least-squares amplitude slope (dB/s) over samples at or after `since_ms`
pub fn growth_velocity(history: &VecDeque<TrackSample>, since_ms: f64) -> f32 {
    let window: Vec<&TrackSample> = history.iter().filter(|s| s.time_ms >= since_ms).collect();
    if window.len() < 3 {
        return 0.0;
    }
    let n = window.len() as f64;
    let t0 = window[0].time_ms;
    let mean_t = window.iter().map(|s| s.time_ms - t0).sum::<f64>() / n;
    let mean_a = window.iter().map(|s| s.amplitude_db as f64).sum::<f64>() / n;
    let (mut num, mut den) = (0.0_f64, 0.0_f64);
    for s in &window {
        let dt = s.time_ms - t0 - mean_t;
        num += dt * (s.amplitude_db as f64 - mean_a);
        den += dt * dt;
    }
    if den <= f64::EPSILON {
        return 0.0;
    }
    // dB per ms -> dB per s
    (num / den * 1_000.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time_ms: f64, frequency_hz: f32, amplitude_db: f32) -> TrackSample {
        TrackSample {
            time_ms,
            frequency_hz,
            amplitude_db,
            prominence_db: 20.0,
            q: 40.0,
            phase: None,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let settings = DetectorSettings::default();
        let mut track = TrackedPeak::new(1, 100, sample(0.0, 1_000.0, -30.0), 8);
        for i in 1..50 {
            track.record(100, sample(i as f64 * 20.0, 1_000.0, -30.0), &settings);
        }
        assert_eq!(track.history().len(), 8);
        assert_eq!(track.history().back().unwrap().time_ms, 49.0 * 20.0);
    }

    #[test]
    fn test_lifecycle_onset_to_active() {
        let settings = DetectorSettings::default();
        let mut track = TrackedPeak::new(1, 100, sample(0.0, 1_000.0, -30.0), 64);
        assert_eq!(track.state, TrackState::Onset);

        track.record(100, sample(100.0, 1_000.0, -30.0), &settings);
        assert_eq!(track.state, TrackState::Onset);

        track.record(100, sample(settings.sustain_ms, 1_000.0, -30.0), &settings);
        assert_eq!(track.state, TrackState::Sustained);
        assert!(track.is_established());

        track.mark_classified();
        assert_eq!(track.state, TrackState::Active);
    }

    #[test]
    fn test_clearing_then_cleared() {
        let settings = DetectorSettings::default();
        let mut track = TrackedPeak::new(1, 100, sample(0.0, 1_000.0, -30.0), 64);
        assert!(!track.age(20.0, &settings));
        assert_eq!(track.state, TrackState::Clearing);
        assert!(track.active);

        assert!(track.age(settings.clear_ms, &settings));
        assert_eq!(track.state, TrackState::Cleared);
        assert!(!track.active);
        assert!(!track.is_expired(settings.clear_ms + 10.0, settings.track_grace_ms));
        assert!(track.is_expired(
            settings.clear_ms + settings.track_grace_ms,
            settings.track_grace_ms
        ));
    }

    #[test]
    fn test_rematch_returns_from_clearing() {
        let settings = DetectorSettings::default();
        let mut track = TrackedPeak::new(1, 100, sample(0.0, 1_000.0, -30.0), 64);
        track.age(40.0, &settings);
        track.record(100, sample(60.0, 1_000.0, -30.0), &settings);
        assert_eq!(track.state, TrackState::Onset);
        assert!(track.active);
    }

    #[test]
    fn test_velocity_tracks_linear_growth() {
        let settings = DetectorSettings::default();
        let mut track = TrackedPeak::new(1, 100, sample(0.0, 1_000.0, -40.0), 64);
        for i in 1..=30 {
            let t = i as f64 * 20.0;
            track.record(100, sample(t, 1_000.0, -40.0 + 0.1 * i as f32), &settings);
        }
        assert!((track.features.velocity_db_s - 5.0).abs() < 0.01);
        assert!((track.elapsed_growth_db() - 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_steady_tone_is_stable_and_unmodulated() {
        let settings = DetectorSettings::default();
        let mut track = TrackedPeak::new(1, 100, sample(0.0, 2_000.0, -20.0), 64);
        for i in 1..=20 {
            track.record(100, sample(i as f64 * 20.0, 2_000.0, -20.0), &settings);
        }
        assert!(track.features.stability_cents < 1e-3);
        assert_eq!(track.features.modulation, 0.0);
        assert_eq!(track.features.velocity_db_s, 0.0);
        assert!((track.features.mean_q - 40.0).abs() < 1e-3);
    }

    #[test]
    fn test_vibrato_raises_modulation() {
        let settings = DetectorSettings::default();
        let mut track = TrackedPeak::new(1, 100, sample(0.0, 1_000.0, -30.0), 64);
        for i in 1..=20 {
            let hz = if i % 2 == 0 { 1_030.0 } else { 970.0 };
            track.record(100, sample(i as f64 * 20.0, hz, -30.0), &settings);
        }
        assert!(track.features.stability_cents > 20.0);
        assert!(track.features.modulation > 0.9);
    }
}
