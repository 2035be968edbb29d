// Fusion policy - select algorithms and combine their scores
//
// probability = sum(w_i * p_i) / sum(w_i) over selected algorithms that
//               returned a score
// coverage    = contributing weight / selected weight
// agreement   = 1 - 2 * weighted std-dev of the contributing scores
// confidence  = coverage * agreement
//
// Weights come from `FusionSettings` and are tunable per mode.

use serde::{Deserialize, Serialize};

use crate::analysis::classifier::algorithms::AlgorithmScore;
use crate::analysis::classifier::content::ContentType;
use crate::config::{Algorithm, AlgorithmWeights, FusionMode, FusionSettings};

/// Small copyable set of algorithms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlgorithmSet(u8);

impl AlgorithmSet {
    pub fn all() -> Self {
        Self::of(&Algorithm::ALL)
    }

    pub fn of(algorithms: &[Algorithm]) -> Self {
        Self(algorithms.iter().fold(0u8, |bits, &a| bits | Self::bit(a)))
    }

    pub fn contains(&self, algorithm: Algorithm) -> bool {
        self.0 & Self::bit(algorithm) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Algorithm> {
        Algorithm::ALL.into_iter().filter(move |a| self.contains(*a))
    }

    fn bit(algorithm: Algorithm) -> u8 {
        1 << (algorithm as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusedScore {
    pub probability: f32,
    pub confidence: f32,
    pub coverage: f32,
    pub agreement: f32,
}

pub struct FusionPolicy;

impl FusionPolicy {
    /// Algorithms allowed to vote for a track with `frames` history samples
    pub fn select(settings: &FusionSettings, frames: usize, content: ContentType) -> AlgorithmSet {
        match &settings.mode {
            FusionMode::Single { algorithm } => AlgorithmSet::of(&[*algorithm]),
            FusionMode::Subset { algorithms } => AlgorithmSet::of(algorithms),
            FusionMode::Auto if frames < settings.msd_min_frames => AlgorithmSet::of(&[
                Algorithm::SpectralFlatness,
                Algorithm::PhaseCoherence,
                Algorithm::Comb,
            ]),
            FusionMode::Auto => match content {
                ContentType::Speech => AlgorithmSet::of(&[
                    Algorithm::Msd,
                    Algorithm::SpectralFlatness,
                    Algorithm::PhaseCoherence,
                ]),
                ContentType::Compressed => AlgorithmSet::of(&[
                    Algorithm::PhaseCoherence,
                    Algorithm::SpectralFlatness,
                    Algorithm::Compression,
                ]),
                ContentType::Music | ContentType::Unknown => AlgorithmSet::all(),
            },
        }
    }

    pub fn fuse(scores: &[AlgorithmScore], selected: AlgorithmSet, weights: &AlgorithmWeights) -> FusedScore {
        let selected_weight: f32 = selected.iter().map(|a| weights.weight(a)).sum();

        let contributing = || {
            scores
                .iter()
                .filter(|s| selected.contains(s.algorithm))
                .map(|s| (weights.weight(s.algorithm), s.probability))
                .filter(|(w, _)| *w > 0.0)
        };

        let (weight_sum, weighted) = contributing().fold((0.0_f32, 0.0_f32), |(ws, acc), (w, p)| {
            (ws + w, acc + w * p)
        });
        if weight_sum <= 0.0 || selected_weight <= 0.0 {
            return FusedScore {
                probability: 0.0,
                confidence: 0.0,
                coverage: 0.0,
                agreement: 0.0,
            };
        }

        let probability = weighted / weight_sum;
        let variance = contributing()
            .map(|(w, p)| w * (p - probability).powi(2))
            .sum::<f32>()
            / weight_sum;
        let agreement = (1.0 - 2.0 * variance.sqrt()).clamp(0.0, 1.0);
        let coverage = (weight_sum / selected_weight).clamp(0.0, 1.0);

        FusedScore {
            probability: probability.clamp(0.0, 1.0),
            confidence: coverage * agreement,
            coverage,
            agreement,
        }
    }
}
