// Harmonic resolution between live tracks
//
// Re-run every frame from scratch: a track that sits at an integer multiple
// of an older active track (within `harmonic_tolerance_cents`) becomes an
// overtone of it. Tracks born in the same frame resolve by frequency alone,
// the lower one being the root. Overtones point at their root by id; the root is flagged
// `is_harmonic_root` and counts its overtones.

use std::collections::BTreeMap;

use crate::analysis::peaks::harmonic_number;
use crate::analysis::pitch::cents_between;
use crate::analysis::tracking::track::TrackedPeak;
use crate::config::DetectorSettings;

/// Resolve overtone relations among active tracks
pub fn resolve(tracks: &mut BTreeMap<u64, TrackedPeak>, settings: &DetectorSettings) {
    for track in tracks.values_mut() {
        track.harmonic_of = None;
        track.is_harmonic_root = false;
        track.features.harmonic_count = 0;
        track.features.harmonicity = 0.0;
    }

    // (id, onset, frequency) of every candidate, lowest frequency first so the
    // deepest root wins and every candidate root sits below its overtone
    let mut live: Vec<(u64, f64, f32)> = tracks
        .values()
        .filter(|t| t.active)
        .map(|t| (t.id, t.onset_ms, t.frequency_hz))
        .collect();
    live.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut relations: Vec<(u64, u64, f32)> = Vec::new();
    for (j, &(upper_id, upper_onset, upper_hz)) in live.iter().enumerate() {
        let root = live[..j].iter().find_map(|&(root_id, root_onset, root_hz)| {
            if root_onset > upper_onset {
                return None;
            }
            let k = harmonic_number(
                upper_hz,
                root_hz,
                settings.harmonic_tolerance_cents,
                settings.max_harmonic,
            )?;
            let deviation = cents_between(upper_hz, root_hz * k as f32).abs();
            Some((root_id, 1.0 - deviation / settings.harmonic_tolerance_cents))
        });
        if let Some((root_id, closeness)) = root {
            relations.push((upper_id, root_id, closeness.clamp(0.0, 1.0)));
        }
    }

    for (upper_id, root_id, closeness) in relations {
        if let Some(upper) = tracks.get_mut(&upper_id) {
            upper.harmonic_of = Some(root_id);
            upper.features.harmonicity = upper.features.harmonicity.max(closeness);
        }
        if let Some(root) = tracks.get_mut(&root_id) {
            root.is_harmonic_root = true;
            root.features.harmonic_count += 1;
            root.features.harmonicity = root.features.harmonicity.max(closeness);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tracking::track::TrackSample;

    fn track(id: u64, onset_ms: f64, frequency_hz: f32) -> TrackedPeak {
        TrackedPeak::new(
            id,
            0,
            TrackSample {
                time_ms: onset_ms,
                frequency_hz,
                amplitude_db: -30.0,
                prominence_db: 20.0,
                q: 30.0,
                phase: None,
            },
            16,
        )
    }

    fn registry(tracks: Vec<TrackedPeak>) -> BTreeMap<u64, TrackedPeak> {
        tracks.into_iter().map(|t| (t.id, t)).collect()
    }

    #[test]
    fn test_octave_of_older_track_is_suppressed() {
        let settings = DetectorSettings::default();
        let mut tracks = registry(vec![track(1, 0.0, 500.0), track(2, 40.0, 1_001.0)]);
        resolve(&mut tracks, &settings);

        assert!(tracks[&1].is_harmonic_root);
        assert_eq!(tracks[&1].features.harmonic_count, 1);
        assert_eq!(tracks[&2].harmonic_of, Some(1));
        assert!(tracks[&2].is_suppressed());
        assert!(tracks[&2].features.harmonicity > 0.8);
    }

    #[test]
    fn test_older_overtone_is_not_suppressed() {
        let settings = DetectorSettings::default();
        let mut tracks = registry(vec![track(1, 0.0, 1_000.0), track(2, 40.0, 500.0)]);
        resolve(&mut tracks, &settings);
        assert!(!tracks[&1].is_suppressed());
        assert!(!tracks[&2].is_harmonic_root);
    }

    #[test]
    fn test_same_frame_onset_roots_at_lower_frequency() {
        let settings = DetectorSettings::default();
        // the louder overtone was spawned first and holds the lower id
        let mut tracks = registry(vec![track(1, 0.0, 2_000.0), track(2, 0.0, 1_000.0)]);
        resolve(&mut tracks, &settings);

        assert!(tracks[&2].is_harmonic_root);
        assert_eq!(tracks[&1].harmonic_of, Some(2));
        assert!(tracks[&1].is_suppressed());
        assert!(!tracks[&1].is_harmonic_root);
    }

    #[test]
    fn test_relations_are_recomputed_each_frame() {
        let settings = DetectorSettings::default();
        let mut tracks = registry(vec![track(1, 0.0, 500.0), track(2, 40.0, 1_000.0)]);
        resolve(&mut tracks, &settings);
        assert_eq!(tracks[&2].harmonic_of, Some(1));

        tracks.get_mut(&1).unwrap().deactivate(500.0);
        resolve(&mut tracks, &settings);
        assert_eq!(tracks[&2].harmonic_of, None);
        assert!(!tracks[&1].is_harmonic_root);
    }

    #[test]
    fn test_counts_multiple_overtones() {
        let settings = DetectorSettings::default();
        let mut tracks = registry(vec![
            track(1, 0.0, 200.0),
            track(2, 20.0, 400.0),
            track(3, 20.0, 600.0),
            track(4, 20.0, 730.0),
        ]);
        resolve(&mut tracks, &settings);
        assert_eq!(tracks[&1].features.harmonic_count, 2);
        assert_eq!(tracks[&4].harmonic_of, None);
    }
}
