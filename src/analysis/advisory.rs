// AdvisoryRegistry - one published advisory per track
//
// Tracks that classify as actionable create an advisory, or update it when
// something material changed (severity, label, > 1 Hz move, > 1 dB gain
// change). Every advisory is eventually cleared: when its track reclassifies
// as non-actionable, becomes a suppressed overtone, goes inactive, vanishes
// from the track registry, or the session resets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::classifier::{ClassificationResult, FeedbackLabel, Severity};
use crate::analysis::eq::{self, EqRecommendation};
use crate::analysis::pitch::{pitch_label, PitchLabel};
use crate::analysis::tracking::{TrackManager, TrackedPeak};
use crate::config::DetectorSettings;

/// Frequency move that counts as a material update (Hz)
pub const MATERIAL_FREQUENCY_HZ: f32 = 1.0;
/// PEQ gain change that counts as a material update (dB)
pub const MATERIAL_GAIN_DB: f32 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: String,
    pub track_id: u64,
    pub frequency_hz: f32,
    pub amplitude_db: f32,
    pub q: f32,
    pub velocity_db_s: f32,
    pub label: FeedbackLabel,
    pub severity: Severity,
    pub classification: ClassificationResult,
    pub eq: EqRecommendation,
    pub pitch: Option<PitchLabel>,
    pub created_ms: f64,
    pub updated_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryChange {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    NonActionable,
    Suppressed,
    Inactive,
    Vanished,
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdvisoryEvent {
    Published {
        change: AdvisoryChange,
        advisory: Advisory,
    },
    Cleared {
        advisory_id: String,
        track_id: u64,
        reason: ClearReason,
    },
}

pub struct AdvisoryRegistry {
    advisories: BTreeMap<u64, Advisory>,
    next_seq: u64,
}

impl AdvisoryRegistry {
    pub fn new() -> Self {
        Self {
            advisories: BTreeMap::new(),
            next_seq: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.advisories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.advisories.is_empty()
    }

    pub fn get(&self, track_id: u64) -> Option<&Advisory> {
        self.advisories.get(&track_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Advisory> {
        self.advisories.values()
    }

    /// Publish, update, or clear the advisory for one classified track
    pub fn apply(
        &mut self,
        track: &TrackedPeak,
        result: ClassificationResult,
        settings: &DetectorSettings,
        out: &mut Vec<AdvisoryEvent>,
    ) {
        if !track.active {
            self.clear(track.id, ClearReason::Inactive, out);
            return;
        }
        if track.is_suppressed() {
            self.clear(track.id, ClearReason::Suppressed, out);
            return;
        }
        if !result.is_actionable(settings) {
            self.clear(track.id, ClearReason::NonActionable, out);
            return;
        }

        let eq = eq::recommend(track.frequency_hz, result.severity, settings.eq_style);
        let now_ms = result.timestamp_ms;

        match self.advisories.get_mut(&track.id) {
            Some(existing) => {
                let material = existing.severity != result.severity
                    || existing.label != result.label
                    || (existing.frequency_hz - track.frequency_hz).abs() > MATERIAL_FREQUENCY_HZ
                    || (existing.eq.peq.gain_db - eq.peq.gain_db).abs() > MATERIAL_GAIN_DB;
                if !material {
                    return;
                }
                let created_ms = existing.created_ms;
                *existing = build(existing.id.clone(), track, result, eq, created_ms, now_ms);
                out.push(AdvisoryEvent::Published {
                    change: AdvisoryChange::Updated,
                    advisory: existing.clone(),
                });
            }
            None => {
                let id = format!("adv-{}", self.next_seq);
                self.next_seq += 1;
                let advisory = build(id, track, result, eq, now_ms, now_ms);
                tracing::info!(
                    "[Advisory] {} for track {} at {:.1} Hz ({:?})",
                    advisory.id,
                    advisory.track_id,
                    advisory.frequency_hz,
                    advisory.severity
                );
                self.advisories.insert(track.id, advisory.clone());
                out.push(AdvisoryEvent::Published {
                    change: AdvisoryChange::Created,
                    advisory,
                });
            }
        }
    }

    /// Clear advisories whose track vanished, went inactive, or became an overtone
    pub fn reconcile(&mut self, tracks: &TrackManager, out: &mut Vec<AdvisoryEvent>) {
        let stale: Vec<(u64, ClearReason)> = self
            .advisories
            .keys()
            .filter_map(|&track_id| match tracks.get(track_id) {
                None => Some((track_id, ClearReason::Vanished)),
                Some(track) if !track.active => Some((track_id, ClearReason::Inactive)),
                Some(track) if track.is_suppressed() => Some((track_id, ClearReason::Suppressed)),
                Some(_) => None,
            })
            .collect();
        for (track_id, reason) in stale {
            self.clear(track_id, reason, out);
        }
    }

    /// Clear every outstanding advisory
    pub fn clear_all(&mut self, out: &mut Vec<AdvisoryEvent>) {
        let ids: Vec<u64> = self.advisories.keys().copied().collect();
        for track_id in ids {
            self.clear(track_id, ClearReason::Reset, out);
        }
    }

    fn clear(&mut self, track_id: u64, reason: ClearReason, out: &mut Vec<AdvisoryEvent>) {
        if let Some(advisory) = self.advisories.remove(&track_id) {
            tracing::info!(
                "[Advisory] Cleared {} for track {} ({:?})",
                advisory.id,
                track_id,
                reason
            );
            out.push(AdvisoryEvent::Cleared {
                advisory_id: advisory.id,
                track_id,
                reason,
            });
        }
    }
}

impl Default for AdvisoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build(
    id: String,
    track: &TrackedPeak,
    result: ClassificationResult,
    eq: EqRecommendation,
    created_ms: f64,
    updated_ms: f64,
) -> Advisory {
    Advisory {
        id,
        track_id: track.id,
        frequency_hz: track.frequency_hz,
        amplitude_db: track.amplitude_db,
        q: track.features.mean_q,
        velocity_db_s: track.features.velocity_db_s,
        label: result.label,
        severity: result.severity,
        classification: result,
        eq,
        pitch: pitch_label(track.frequency_hz),
        created_ms,
        updated_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classifier::ContentType;
    use crate::analysis::tracking::TrackSample;

    fn track(id: u64, frequency_hz: f32) -> TrackedPeak {
        TrackedPeak::new(
            id,
            100,
            TrackSample {
                time_ms: 0.0,
                frequency_hz,
                amplitude_db: -20.0,
                prominence_db: 25.0,
                q: 30.0,
                phase: None,
            },
            16,
        )
    }

    fn result(track_id: u64, label: FeedbackLabel, severity: Severity) -> ClassificationResult {
        ClassificationResult {
            track_id,
            label,
            severity,
            probability: 0.9,
            confidence: 0.8,
            scores: Vec::new(),
            reasons: Vec::new(),
            content: ContentType::Unknown,
            growth_multiplier: 1.0,
            comb: None,
            timestamp_ms: 0.0,
        }
    }

    #[test]
    fn test_create_then_material_update_keeps_id() {
        let settings = DetectorSettings::default();
        let mut registry = AdvisoryRegistry::new();
        let mut out = Vec::new();
        let t = track(1, 2_000.0);

        registry.apply(&t, result(1, FeedbackLabel::Feedback, Severity::Growing), &settings, &mut out);
        registry.apply(&t, result(1, FeedbackLabel::Feedback, Severity::Growing), &settings, &mut out);
        registry.apply(&t, result(1, FeedbackLabel::Feedback, Severity::Runaway), &settings, &mut out);

        assert_eq!(out.len(), 2);
        let ids: Vec<&str> = out
            .iter()
            .map(|event| match event {
                AdvisoryEvent::Published { advisory, .. } => advisory.id.as_str(),
                AdvisoryEvent::Cleared { advisory_id, .. } => advisory_id.as_str(),
            })
            .collect();
        assert_eq!(ids, vec!["adv-1", "adv-1"]);
        assert!(matches!(
            &out[1],
            AdvisoryEvent::Published { change: AdvisoryChange::Updated, advisory } if advisory.severity == Severity::Runaway
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_small_frequency_move_is_not_material() {
        let settings = DetectorSettings::default();
        let mut registry = AdvisoryRegistry::new();
        let mut out = Vec::new();
        let mut t = track(1, 2_000.0);
        registry.apply(&t, result(1, FeedbackLabel::Resonance, Severity::Resonance), &settings, &mut out);

        t.frequency_hz = 2_000.5;
        registry.apply(&t, result(1, FeedbackLabel::Resonance, Severity::Resonance), &settings, &mut out);
        assert_eq!(out.len(), 1);

        t.frequency_hz = 2_003.0;
        registry.apply(&t, result(1, FeedbackLabel::Resonance, Severity::Resonance), &settings, &mut out);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_non_actionable_clears() {
        let settings = DetectorSettings::default();
        let mut registry = AdvisoryRegistry::new();
        let mut out = Vec::new();
        let t = track(1, 2_000.0);
        registry.apply(&t, result(1, FeedbackLabel::Resonance, Severity::Resonance), &settings, &mut out);
        registry.apply(&t, result(1, FeedbackLabel::Unknown, Severity::None), &settings, &mut out);

        assert!(registry.is_empty());
        assert!(matches!(
            &out[1],
            AdvisoryEvent::Cleared { advisory_id, reason: ClearReason::NonActionable, .. } if advisory_id == "adv-1"
        ));
    }

    #[test]
    fn test_ignored_whistle_never_published() {
        let mut settings = DetectorSettings::default();
        settings.ignore_whistle = true;
        let mut registry = AdvisoryRegistry::new();
        let mut out = Vec::new();
        registry.apply(
            &track(1, 3_000.0),
            result(1, FeedbackLabel::Whistle, Severity::Whistle),
            &settings,
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_reconcile_clears_vanished_tracks() {
        let settings = DetectorSettings::default();
        let mut registry = AdvisoryRegistry::new();
        let mut out = Vec::new();
        registry.apply(&track(5, 1_000.0), result(5, FeedbackLabel::Feedback, Severity::Growing), &settings, &mut out);

        let empty = TrackManager::new();
        registry.reconcile(&empty, &mut out);
        assert!(registry.is_empty());
        assert!(matches!(
            out.last(),
            Some(AdvisoryEvent::Cleared { reason: ClearReason::Vanished, track_id: 5, .. })
        ));
    }

    #[test]
    fn test_clear_all_emits_for_every_advisory() {
        let settings = DetectorSettings::default();
        let mut registry = AdvisoryRegistry::new();
        let mut out = Vec::new();
        for id in 1..=3 {
            registry.apply(
                &track(id, 500.0 * id as f32 + 37.0),
                result(id, FeedbackLabel::Resonance, Severity::Resonance),
                &settings,
                &mut out,
            );
        }
        out.clear();
        registry.clear_all(&mut out);
        assert_eq!(out.len(), 3);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_advisory_carries_eq_and_pitch() {
        let settings = DetectorSettings::default();
        let mut registry = AdvisoryRegistry::new();
        let mut out = Vec::new();
        registry.apply(&track(1, 2_000.0), result(1, FeedbackLabel::Resonance, Severity::Resonance), &settings, &mut out);

        let advisory = registry.get(1).unwrap();
        assert_eq!(advisory.eq.geq.center_hz, 2_000.0);
        assert!(advisory.eq.peq.gain_db < 0.0);
        assert_eq!(advisory.pitch.as_ref().map(|p| p.note.as_str()), Some("B6"));
    }
}
