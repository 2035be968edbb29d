// Pitch helpers - cents arithmetic and nearest-note labels
//
// Equal temperament with A4 = 440 Hz. Cents are used everywhere frequency
// distance has to be proportional rather than absolute: track matching,
// harmonic detection, stability, and the advisory pitch label.

use serde::{Deserialize, Serialize};

pub const A4_HZ: f32 = 440.0;
const A4_MIDI: i32 = 69;
const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Signed distance from `reference` to `frequency` in cents
pub fn cents_between(frequency: f32, reference: f32) -> f32 {
    if frequency <= 0.0 || reference <= 0.0 {
        return f32::INFINITY;
    }
    1200.0 * (frequency / reference).log2()
}

/// Nearest equal-tempered note with octave and deviation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchLabel {
    /// Note name with octave, e.g. "B6"
    pub note: String,
    pub midi: i32,
    /// Deviation from the note in cents, within [-50, 50]
    pub cents: f32,
}

pub fn pitch_label(frequency_hz: f32) -> Option<PitchLabel> {
    if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
        return None;
    }
    let semitones = 12.0 * (frequency_hz / A4_HZ).log2();
    let nearest = semitones.round();
    let midi = A4_MIDI + nearest as i32;
    let name = NOTE_NAMES[midi.rem_euclid(12) as usize];
    let octave = midi.div_euclid(12) - 1;
    Some(PitchLabel {
        note: format!("{}{}", name, octave),
        midi,
        cents: (semitones - nearest) * 100.0,
    })
}
