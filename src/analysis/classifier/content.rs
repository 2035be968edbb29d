// ContentAnalyzer - program material and compression detection
//
// Keeps a rolling window of broadband frame levels. A frame counts as
// program material when its level sits at least PROGRAM_GATE_DB above the
// noise floor. From the window:
// - too little program material        => Unknown
// - frequent pauses, wide level swings => Speech
// - sustained program, narrow range    => Compressed
// - otherwise                          => Music
//
// The compression score falls linearly from 1 at 0 dB dynamic range to 0 at
// FULL_RANGE_DB and shrinks the growth-rate threshold through
// `growth_multiplier = 1 - 0.5 * score`.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::FusionSettings;

const PROGRAM_GATE_DB: f32 = 3.0;
const FULL_RANGE_DB: f32 = 12.0;
const COMPRESSED_SCORE: f32 = 0.5;
const SPEECH_MIN_RANGE_DB: f32 = 10.0;
const MIN_PROGRAM_FRACTION: f32 = 0.25;
const SUSTAINED_PROGRAM_FRACTION: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Speech,
    Music,
    Compressed,
    Unknown,
}

/// Content estimate after the latest frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentProfile {
    pub content: ContentType,
    /// `None` until enough program material has been seen
    pub compression_score: Option<f32>,
    pub growth_multiplier: f32,
    /// p90 - p10 of program frame levels (dB)
    pub dynamic_range_db: f32,
    pub program_fraction: f32,
}

impl Default for ContentProfile {
    fn default() -> Self {
        Self {
            content: ContentType::Unknown,
            compression_score: None,
            growth_multiplier: 1.0,
            dynamic_range_db: 0.0,
            program_fraction: 0.0,
        }
    }
}

pub struct ContentAnalyzer {
    /// (level, is_program) per frame
    window: VecDeque<(f32, bool)>,
    scratch: Vec<f32>,
    profile: ContentProfile,
}

impl ContentAnalyzer {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            scratch: Vec::with_capacity(capacity),
            profile: ContentProfile::default(),
        }
    }

    pub fn profile(&self) -> &ContentProfile {
        &self.profile
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.profile = ContentProfile::default();
    }

    pub fn observe(&mut self, level_db: f32, floor_db: f32, settings: &FusionSettings) -> ContentProfile {
        while self.window.len() >= settings.content_window_frames.max(1) {
            self.window.pop_front();
        }
        self.window
            .push_back((level_db, level_db - floor_db >= PROGRAM_GATE_DB));

        self.profile = self.evaluate(settings);
        self.profile
    }

    fn evaluate(&mut self, settings: &FusionSettings) -> ContentProfile {
        if self.window.len() < settings.content_min_frames {
            return ContentProfile::default();
        }

        self.scratch.clear();
        self.scratch
            .extend(self.window.iter().filter(|(_, program)| *program).map(|(level, _)| *level));
        let program_fraction = self.scratch.len() as f32 / self.window.len() as f32;
        if program_fraction < MIN_PROGRAM_FRACTION {
            return ContentProfile {
                program_fraction,
                ..ContentProfile::default()
            };
        }

        let p10 = percentile(&mut self.scratch, 0.10);
        let p90 = percentile(&mut self.scratch, 0.90);
        let dynamic_range_db = (p90 - p10).max(0.0);
        let score = (1.0 - dynamic_range_db / FULL_RANGE_DB).clamp(0.0, 1.0);

        let content = if program_fraction >= SUSTAINED_PROGRAM_FRACTION && score >= COMPRESSED_SCORE {
            ContentType::Compressed
        } else if program_fraction < SUSTAINED_PROGRAM_FRACTION && dynamic_range_db >= SPEECH_MIN_RANGE_DB {
            ContentType::Speech
        } else {
            ContentType::Music
        };

        ContentProfile {
            content,
            compression_score: Some(score),
            growth_multiplier: 1.0 - 0.5 * score,
            dynamic_range_db,
            program_fraction,
        }
    }
}

fn percentile(values: &mut [f32], fraction: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let index = ((values.len() - 1) as f32 * fraction).round() as usize;
    let (_, value, _) = values.select_nth_unstable_by(index, |a, b| a.total_cmp(b));
    *value
}
