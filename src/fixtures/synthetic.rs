// Synthetic spectra - deterministic tone-over-noise frames
//
// Every bin starts at `floor_db` plus uniform jitter in
// [-jitter_db, +jitter_db] drawn from a seeded `StdRng`, so a given seed
// always yields the same frame sequence. Each tone occupies three bins:
// the nearest bin at the tone level and both neighbours TONE_SKIRT_DB down.
// With phases enabled, tone bins advance coherently (2*pi*f*t) while noise
// bins get uniformly random phase.

use std::f32::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::analysis::types::SpectrumFrame;

pub const DEFAULT_FLOOR_DB: f32 = -50.0;
pub const DEFAULT_JITTER_DB: f32 = 2.0;
pub const TONE_SKIRT_DB: f32 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f32,
    pub amplitude_db: f32,
}

impl Tone {
    pub fn new(frequency_hz: f32, amplitude_db: f32) -> Self {
        Self {
            frequency_hz,
            amplitude_db,
        }
    }
}

pub struct SyntheticSpectrum {
    sample_rate: u32,
    fft_size: usize,
    floor_db: f32,
    jitter_db: f32,
    phases: bool,
    rng: StdRng,
}

impl SyntheticSpectrum {
    pub fn new(sample_rate: u32, fft_size: usize, seed: u64) -> Self {
        Self {
            sample_rate,
            fft_size,
            floor_db: DEFAULT_FLOOR_DB,
            jitter_db: DEFAULT_JITTER_DB,
            phases: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_floor(mut self, floor_db: f32, jitter_db: f32) -> Self {
        self.floor_db = floor_db;
        self.jitter_db = jitter_db.abs();
        self
    }

    pub fn with_phases(mut self, enabled: bool) -> Self {
        self.phases = enabled;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_hz(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Nearest bin to a frequency
    pub fn bin_of(&self, frequency_hz: f32) -> usize {
        (frequency_hz / self.bin_hz()).round().max(0.0) as usize
    }

    /// Center frequency of a bin
    pub fn bin_center_hz(&self, bin: usize) -> f32 {
        bin as f32 * self.bin_hz()
    }

    pub fn frame(&mut self, timestamp_ms: f64, tones: &[Tone]) -> SpectrumFrame {
        let bins = self.fft_size / 2;
        let jitter = self.jitter_db;
        let floor = self.floor_db;
        let mut magnitudes: Vec<f32> = (0..bins)
            .map(|_| {
                if jitter > 0.0 {
                    floor + self.rng.gen_range(-jitter..=jitter)
                } else {
                    floor
                }
            })
            .collect();
        let mut phases: Option<Vec<f32>> = self
            .phases
            .then(|| (0..bins).map(|_| self.rng.gen_range(-PI..PI)).collect());

        for tone in tones {
            let center = self.bin_of(tone.frequency_hz);
            if center == 0 || center + 1 >= bins {
                continue;
            }
            magnitudes[center - 1] = tone.amplitude_db - TONE_SKIRT_DB;
            magnitudes[center] = tone.amplitude_db;
            magnitudes[center + 1] = tone.amplitude_db - TONE_SKIRT_DB;

            if let Some(phases) = phases.as_mut() {
                let cycles = tone.frequency_hz as f64 * timestamp_ms / 1_000.0;
                let phase = (2.0 * std::f64::consts::PI * cycles.fract()) as f32;
                for bin in center - 1..=center + 1 {
                    phases[bin] = phase;
                }
            }
        }

        let frame = SpectrumFrame::new(magnitudes, self.sample_rate, self.fft_size, timestamp_ms);
        match phases {
            Some(phases) => frame.with_phases(phases),
            None => frame,
        }
    }
}

/// Canned input for the CLI and the scenario tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// 2 kHz at -20 dB, constant
    Steady,
    /// 2 kHz rising 5 dB/s from -38 dB
    Growing,
    /// 1 kHz at -20 dB with its second harmonic at -26 dB
    Harmonic,
    /// 1.5 kHz with 40 cent, 5 Hz vibrato
    Whistle,
    /// Noise floor only
    Silence,
}

impl Scenario {
    pub const GROWTH_DB_S: f32 = 5.0;

    pub fn tones(&self, time_ms: f64) -> Vec<Tone> {
        let seconds = (time_ms / 1_000.0) as f32;
        match self {
            Scenario::Steady => vec![Tone::new(2_000.0, -20.0)],
            Scenario::Growing => vec![Tone::new(2_000.0, -38.0 + Self::GROWTH_DB_S * seconds)],
            Scenario::Harmonic => vec![Tone::new(1_000.0, -20.0), Tone::new(2_000.0, -26.0)],
            Scenario::Whistle => {
                let cents = 40.0 * (2.0 * PI * 5.0 * seconds).sin();
                vec![Tone::new(1_500.0 * 2f32.powf(cents / 1_200.0), -25.0)]
            }
            Scenario::Silence => Vec::new(),
        }
    }

    /// `frames` frames spaced `hop_ms` apart, starting at t = 0
    pub fn render(&self, source: &mut SyntheticSpectrum, frames: usize, hop_ms: f64) -> Vec<SpectrumFrame> {
        (0..frames)
            .map(|i| {
                let time_ms = i as f64 * hop_ms;
                let tones = self.tones(time_ms);
                source.frame(time_ms, &tones)
            })
            .collect()
    }
}
