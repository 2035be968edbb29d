// TrackManager - peak-to-track association across frames
//
// Each frame:
// 1. Order this frame's peaks strongest first
// 2. Greedily match each peak to the nearest live track within
//    `merge_tolerance_cents`; a track takes at most one peak per frame
// 3. Unmatched peaks spawn new tracks (up to `max_tracks`)
// 4. Unmatched tracks age through clearing into cleared
// 5. Cleared tracks past `track_grace_ms` are removed
// 6. Harmonic relations are re-resolved from scratch
//
// Tracks live in a BTreeMap keyed by id so iteration order, and therefore
// every downstream event sequence, is deterministic.

pub mod harmonics;
pub mod track;

use std::collections::BTreeMap;

pub use track::{TrackFeatures, TrackSample, TrackState, TrackSummary, TrackedPeak};

use crate::analysis::peaks::estimate_q;
use crate::analysis::pitch::cents_between;
use crate::analysis::preprocess::PreparedSpectrum;
use crate::analysis::types::DetectedPeak;
use crate::config::DetectorSettings;
use crate::error::PipelineError;

/// Counters from one association pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssociationStats {
    pub matched: usize,
    pub spawned: usize,
    /// Peaks discarded because the registry was full
    pub dropped: usize,
    pub deactivated: usize,
    pub removed: usize,
}

pub struct TrackManager {
    tracks: BTreeMap<u64, TrackedPeak>,
    next_id: u64,
    order: Vec<usize>,
    claimed: Vec<u64>,
}

impl TrackManager {
    pub fn new() -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            order: Vec::new(),
            claimed: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&TrackedPeak> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut TrackedPeak> {
        self.tracks.get_mut(&id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TrackedPeak> {
        self.tracks.values()
    }

    pub fn active_tracks(&self) -> impl Iterator<Item = &TrackedPeak> {
        self.tracks.values().filter(|t| t.active)
    }

    /// Drop every track; ids keep counting up
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.order.clear();
        self.claimed.clear();
    }

    /// Associate one frame's peaks with tracks and advance the lifecycle
    ///
    /// `phases` is the producer's per-bin phase array when it supplied one.
    ///
    /// # Errors
    /// * `InvariantViolation` - a freshly issued id already exists
    pub fn associate(
        &mut self,
        peaks: &[DetectedPeak],
        spectrum: &PreparedSpectrum,
        phases: Option<&[f32]>,
        now_ms: f64,
        settings: &DetectorSettings,
    ) -> Result<AssociationStats, PipelineError> {
        let mut stats = AssociationStats::default();

        self.order.clear();
        self.order.extend(0..peaks.len());
        self.order
            .sort_by(|&a, &b| peaks[b].amplitude_db.total_cmp(&peaks[a].amplitude_db));
        self.claimed.clear();

        for index in 0..self.order.len() {
            let peak = &peaks[self.order[index]];
            let sample = TrackSample {
                time_ms: now_ms,
                frequency_hz: peak.frequency_hz,
                amplitude_db: peak.amplitude_db,
                prominence_db: peak.prominence_db,
                q: estimate_q(
                    spectrum.db(),
                    peak.bin,
                    peak.amplitude_db,
                    spectrum.bin_hz(),
                    peak.frequency_hz,
                ),
                phase: phases
                    .and_then(|p| p.get(peak.bin).copied())
                    .filter(|p| p.is_finite()),
            };

            match self.nearest_unclaimed(peak.frequency_hz, settings.merge_tolerance_cents) {
                Some(id) => {
                    if let Some(track) = self.tracks.get_mut(&id) {
                        track.record(peak.bin, sample, settings);
                    }
                    self.claimed.push(id);
                    stats.matched += 1;
                }
                None if self.tracks.len() < settings.max_tracks => {
                    let id = self.spawn(peak.bin, sample, settings)?;
                    self.claimed.push(id);
                    stats.spawned += 1;
                }
                None => {
                    stats.dropped += 1;
                }
            }
        }

        for track in self.tracks.values_mut() {
            if !self.claimed.contains(&track.id) && track.age(now_ms, settings) {
                stats.deactivated += 1;
            }
        }

        let before = self.tracks.len();
        self.tracks
            .retain(|_, track| !track.is_expired(now_ms, settings.track_grace_ms));
        stats.removed = before - self.tracks.len();

        harmonics::resolve(&mut self.tracks, settings);

        if stats.dropped > 0 {
            tracing::debug!(
                "[TrackManager] Registry full ({} tracks), dropped {} peaks",
                self.tracks.len(),
                stats.dropped
            );
        }

        Ok(stats)
    }

    /// Deactivate the live track nearest to a producer-side cleared peak
    ///
    /// Matches by frequency within the merge tolerance, falling back to the
    /// bin index. Returns the id of the track that was cleared.
    pub fn clear_track(
        &mut self,
        bin: usize,
        frequency_hz: f32,
        now_ms: f64,
        settings: &DetectorSettings,
    ) -> Option<u64> {
        let id = self
            .nearest_live(frequency_hz, settings.merge_tolerance_cents)
            .or_else(|| {
                self.tracks
                    .values()
                    .find(|t| t.active && t.bin == bin)
                    .map(|t| t.id)
            })?;
        if let Some(track) = self.tracks.get_mut(&id) {
            track.deactivate(now_ms);
        }
        harmonics::resolve(&mut self.tracks, settings);
        tracing::debug!(
            "[TrackManager] Cleared track {} at {:.1} Hz on producer request",
            id,
            frequency_hz
        );
        Some(id)
    }

    /// Insert a track under an explicit id
    ///
    /// # Errors
    /// * `InvariantViolation` - the id is already registered
    pub fn insert(&mut self, track: TrackedPeak) -> Result<(), PipelineError> {
        if self.tracks.contains_key(&track.id) {
            return Err(PipelineError::InvariantViolation {
                details: format!("duplicate track id {}", track.id),
            });
        }
        self.next_id = self.next_id.max(track.id + 1);
        self.tracks.insert(track.id, track);
        Ok(())
    }

    fn spawn(&mut self, bin: usize, sample: TrackSample, settings: &DetectorSettings) -> Result<u64, PipelineError> {
        let id = self.next_id;
        self.insert(TrackedPeak::new(id, bin, sample, settings.history_len))?;
        Ok(id)
    }

    fn nearest_unclaimed(&self, frequency_hz: f32, tolerance_cents: f32) -> Option<u64> {
        self.nearest_where(frequency_hz, tolerance_cents, |t| !self.claimed.contains(&t.id))
    }

    fn nearest_live(&self, frequency_hz: f32, tolerance_cents: f32) -> Option<u64> {
        self.nearest_where(frequency_hz, tolerance_cents, |_| true)
    }

    fn nearest_where<F>(&self, frequency_hz: f32, tolerance_cents: f32, accept: F) -> Option<u64>
    where
        F: Fn(&TrackedPeak) -> bool,
    {
        self.tracks
            .values()
            .filter(|t| t.active && accept(t))
            .map(|t| (t.id, cents_between(frequency_hz, t.frequency_hz).abs()))
            .filter(|&(_, distance)| distance <= tolerance_cents)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }
}

impl Default for TrackManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::preprocess::SpectralPreprocessor;
    use crate::analysis::types::SpectrumFrame;
    use crate::config::Weighting;

    fn flat_spectrum() -> PreparedSpectrum {
        let frame = SpectrumFrame::new(vec![-60.0; 4096], 48_000, 8192, 0.0);
        let mut pre = SpectralPreprocessor::new();
        pre.process(&frame, 0.0, Weighting::Flat).unwrap().clone()
    }

    fn peak(frequency_hz: f32, amplitude_db: f32) -> DetectedPeak {
        DetectedPeak {
            bin: (frequency_hz / (48_000.0 / 8192.0)).round() as usize,
            frequency_hz,
            amplitude_db,
            prominence_db: 20.0,
            harmonic_of_hz: None,
            timestamp_ms: 0.0,
        }
    }

    #[test]
    fn test_drifting_tone_keeps_one_id() {
        let settings = DetectorSettings::default();
        let spectrum = flat_spectrum();
        let mut manager = TrackManager::new();

        let mut hz = 1_000.0_f32;
        for frame in 0..200 {
            // +10 cents per frame, well inside the merge tolerance
            hz *= 2f32.powf(10.0 / 1200.0);
            let stats = manager
                .associate(&[peak(hz, -30.0)], &spectrum, None, frame as f64 * 20.0, &settings)
                .unwrap();
            let expected_matched = if frame == 0 { 0 } else { 1 };
            assert_eq!(stats.matched, expected_matched);
            assert_eq!(stats.spawned, 1 - expected_matched);
        }
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.tracks().next().unwrap().id, 1);
    }

    #[test]
    fn test_jump_beyond_tolerance_spawns_new_track() {
        let settings = DetectorSettings::default();
        let spectrum = flat_spectrum();
        let mut manager = TrackManager::new();
        manager
            .associate(&[peak(1_000.0, -30.0)], &spectrum, None, 0.0, &settings)
            .unwrap();
        let stats = manager
            .associate(&[peak(1_100.0, -30.0)], &spectrum, None, 20.0, &settings)
            .unwrap();
        assert_eq!(stats.spawned, 1);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_strongest_peak_claims_track() {
        let settings = DetectorSettings::default();
        let spectrum = flat_spectrum();
        let mut manager = TrackManager::new();
        manager
            .associate(&[peak(1_000.0, -30.0)], &spectrum, None, 0.0, &settings)
            .unwrap();

        // both within tolerance; the louder one inherits id 1
        manager
            .associate(
                &[peak(1_010.0, -40.0), peak(995.0, -20.0)],
                &spectrum,
                None,
                20.0,
                &settings,
            )
            .unwrap();
        assert_eq!(manager.get(1).unwrap().frequency_hz, 995.0);
        assert_eq!(manager.get(2).unwrap().frequency_hz, 1_010.0);
    }

    #[test]
    fn test_unmatched_track_clears_then_expires() {
        let settings = DetectorSettings::default();
        let spectrum = flat_spectrum();
        let mut manager = TrackManager::new();
        manager
            .associate(&[peak(1_000.0, -30.0)], &spectrum, None, 0.0, &settings)
            .unwrap();

        let stats = manager
            .associate(&[], &spectrum, None, settings.clear_ms, &settings)
            .unwrap();
        assert_eq!(stats.deactivated, 1);
        assert!(!manager.get(1).unwrap().active);

        let stats = manager
            .associate(
                &[],
                &spectrum,
                None,
                settings.clear_ms + settings.track_grace_ms,
                &settings,
            )
            .unwrap();
        assert_eq!(stats.removed, 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_max_tracks_caps_registry() {
        let mut settings = DetectorSettings::default();
        settings.max_tracks = 2;
        let spectrum = flat_spectrum();
        let mut manager = TrackManager::new();
        let stats = manager
            .associate(
                &[peak(300.0, -30.0), peak(1_300.0, -31.0), peak(5_300.0, -32.0)],
                &spectrum,
                None,
                0.0,
                &settings,
            )
            .unwrap();
        assert_eq!(stats.spawned, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_second_harmonic_is_suppressed() {
        let settings = DetectorSettings::default();
        let spectrum = flat_spectrum();
        let mut manager = TrackManager::new();
        manager
            .associate(&[peak(700.0, -25.0)], &spectrum, None, 0.0, &settings)
            .unwrap();
        manager
            .associate(
                &[peak(700.0, -25.0), peak(1_400.0, -30.0)],
                &spectrum,
                None,
                20.0,
                &settings,
            )
            .unwrap();

        let root = manager.get(1).unwrap();
        let overtone = manager.get(2).unwrap();
        assert!(root.is_harmonic_root);
        assert_eq!(overtone.harmonic_of, Some(1));
        assert!(overtone.is_suppressed());
    }

    #[test]
    fn test_clear_track_deactivates_immediately() {
        let settings = DetectorSettings::default();
        let spectrum = flat_spectrum();
        let mut manager = TrackManager::new();
        manager
            .associate(&[peak(2_000.0, -25.0)], &spectrum, None, 0.0, &settings)
            .unwrap();
        let bin = manager.get(1).unwrap().bin;

        assert_eq!(manager.clear_track(bin, 2_003.0, 20.0, &settings), Some(1));
        assert!(!manager.get(1).unwrap().active);
        assert_eq!(manager.clear_track(bin, 2_000.0, 40.0, &settings), None);
    }

    #[test]
    fn test_duplicate_insert_is_invariant_violation() {
        let mut manager = TrackManager::new();
        let sample = TrackSample {
            time_ms: 0.0,
            frequency_hz: 1_000.0,
            amplitude_db: -30.0,
            prominence_db: 20.0,
            q: 30.0,
            phase: None,
        };
        manager.insert(TrackedPeak::new(7, 10, sample, 16)).unwrap();
        assert!(matches!(
            manager.insert(TrackedPeak::new(7, 10, sample, 16)),
            Err(PipelineError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_phase_recorded_when_supplied() {
        let settings = DetectorSettings::default();
        let spectrum = flat_spectrum();
        let mut phases = vec![0.0_f32; 4096];
        let p = peak(1_000.0, -30.0);
        phases[p.bin] = 1.25;
        let mut manager = TrackManager::new();
        manager
            .associate(&[p], &spectrum, Some(&phases), 0.0, &settings)
            .unwrap();
        assert_eq!(manager.get(1).unwrap().history()[0].phase, Some(1.25));
    }
}
