// EQ Advisor - corrective EQ recommendations for a classified peak
//
// Pure function of (frequency, severity, style):
// - GEQ: nearest ISO 31-band center by log distance, cut scaled by severity
// - PEQ: bell at the peak frequency; style sets Q and base cut, severity
//   scales the cut, result clamped to [MAX_CUT_DB, MIN_CUT_DB]
// - Shelf: suggested when the peak sits below 80 Hz or above 12 kHz

use serde::{Deserialize, Serialize};

use crate::analysis::classifier::Severity;
use crate::config::EqStyle;

/// Deepest cut ever recommended (dB)
pub const MAX_CUT_DB: f32 = -18.0;
/// Shallowest cut ever recommended (dB)
pub const MIN_CUT_DB: f32 = -1.0;

pub const LOW_SHELF_HZ: f32 = 80.0;
pub const HIGH_SHELF_HZ: f32 = 12_000.0;

/// ISO 266 third-octave centers, 20 Hz - 20 kHz
pub const GEQ_BANDS_HZ: [f32; 31] = [
    20.0, 25.0, 31.5, 40.0, 50.0, 63.0, 80.0, 100.0, 125.0, 160.0, 200.0, 250.0, 315.0, 400.0,
    500.0, 630.0, 800.0, 1_000.0, 1_250.0, 1_600.0, 2_000.0, 2_500.0, 3_150.0, 4_000.0,
    5_000.0, 6_300.0, 8_000.0, 10_000.0, 12_500.0, 16_000.0, 20_000.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Bell,
    LowShelf,
    HighShelf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeqRecommendation {
    pub band_index: usize,
    pub center_hz: f32,
    pub cut_db: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeqRecommendation {
    pub filter: FilterType,
    pub frequency_hz: f32,
    pub q: f32,
    pub gain_db: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqRecommendation {
    pub geq: GeqRecommendation,
    pub peq: PeqRecommendation,
    pub shelf: Option<PeqRecommendation>,
}

/// Recommendation for one peak
pub fn recommend(frequency_hz: f32, severity: Severity, style: EqStyle) -> EqRecommendation {
    let (band_index, center_hz) = nearest_band(frequency_hz);
    let geq = GeqRecommendation {
        band_index,
        center_hz,
        cut_db: geq_cut_db(severity),
    };

    let (base_db, q) = match style {
        EqStyle::Surgical => (
            -6.0,
            match severity {
                Severity::Runaway | Severity::Growing => 16.0,
                Severity::Resonance | Severity::PossibleRing => 12.0,
                _ => 8.0,
            },
        ),
        EqStyle::Heavy => (
            -3.0,
            match severity {
                Severity::Runaway | Severity::Growing => 4.0,
                Severity::Resonance | Severity::PossibleRing => 3.0,
                _ => 2.0,
            },
        ),
    };
    let peq = PeqRecommendation {
        filter: FilterType::Bell,
        frequency_hz,
        q,
        gain_db: (base_db * severity_multiplier(severity)).clamp(MAX_CUT_DB, MIN_CUT_DB),
    };

    let shelf = if frequency_hz < LOW_SHELF_HZ {
        Some(PeqRecommendation {
            filter: FilterType::LowShelf,
            frequency_hz: LOW_SHELF_HZ,
            q: 0.7,
            gain_db: (peq.gain_db * 0.5).clamp(MAX_CUT_DB, MIN_CUT_DB),
        })
    } else if frequency_hz > HIGH_SHELF_HZ {
        Some(PeqRecommendation {
            filter: FilterType::HighShelf,
            frequency_hz: HIGH_SHELF_HZ,
            q: 0.7,
            gain_db: (peq.gain_db * 0.5).clamp(MAX_CUT_DB, MIN_CUT_DB),
        })
    } else {
        None
    };

    EqRecommendation { geq, peq, shelf }
}

/// Index and center of the GEQ band nearest in log-frequency
pub fn nearest_band(frequency_hz: f32) -> (usize, f32) {
    let target = frequency_hz.max(1.0).ln();
    GEQ_BANDS_HZ
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (a.ln() - target)
                .abs()
                .total_cmp(&(b.ln() - target).abs())
        })
        .map(|(i, &hz)| (i, hz))
        .unwrap_or((0, GEQ_BANDS_HZ[0]))
}

fn geq_cut_db(severity: Severity) -> f32 {
    match severity {
        Severity::Runaway => -9.0,
        Severity::Growing => -6.0,
        Severity::Resonance => -4.0,
        Severity::PossibleRing => -3.0,
        Severity::Whistle | Severity::Instrument => -2.0,
        Severity::None => MIN_CUT_DB,
    }
}

fn severity_multiplier(severity: Severity) -> f32 {
    match severity {
        Severity::Runaway => 2.0,
        Severity::Growing => 1.5,
        Severity::Resonance => 1.0,
        Severity::PossibleRing => 0.75,
        Severity::Whistle | Severity::Instrument | Severity::None => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_band() {
        assert_eq!(nearest_band(2_000.0), (20, 2_000.0));
        assert_eq!(nearest_band(2_100.0).1, 2_000.0);
        assert_eq!(nearest_band(2_300.0).1, 2_500.0);
        assert_eq!(nearest_band(5.0).0, 0);
        assert_eq!(nearest_band(30_000.0).0, 30);
    }

    #[test]
    fn test_deterministic() {
        let a = recommend(1_234.5, Severity::Growing, EqStyle::Surgical);
        let b = recommend(1_234.5, Severity::Growing, EqStyle::Surgical);
        assert_eq!(a, b);
    }

    #[test]
    fn test_gain_deepens_with_severity() {
        let ring = recommend(1_000.0, Severity::PossibleRing, EqStyle::Surgical);
        let resonance = recommend(1_000.0, Severity::Resonance, EqStyle::Surgical);
        let runaway = recommend(1_000.0, Severity::Runaway, EqStyle::Surgical);
        assert!(runaway.peq.gain_db < resonance.peq.gain_db);
        assert!(resonance.peq.gain_db < ring.peq.gain_db);
        assert!(runaway.geq.cut_db < ring.geq.cut_db);
    }

    #[test]
    fn test_gain_always_clamped_negative() {
        for severity in [
            Severity::Runaway,
            Severity::Growing,
            Severity::Resonance,
            Severity::PossibleRing,
            Severity::Whistle,
            Severity::Instrument,
            Severity::None,
        ] {
            for style in [EqStyle::Surgical, EqStyle::Heavy] {
                let rec = recommend(3_000.0, severity, style);
                assert!(rec.peq.gain_db <= MIN_CUT_DB && rec.peq.gain_db >= MAX_CUT_DB);
            }
        }
    }

    #[test]
    fn test_style_controls_q() {
        for severity in [Severity::Runaway, Severity::Resonance, Severity::Whistle] {
            assert!(recommend(1_000.0, severity, EqStyle::Surgical).peq.q >= 8.0);
            assert!(recommend(1_000.0, severity, EqStyle::Heavy).peq.q <= 4.0);
        }
    }

    #[test]
    fn test_shelves_at_extremes() {
        assert_eq!(
            recommend(60.0, Severity::Resonance, EqStyle::Surgical)
                .shelf
                .map(|s| s.filter),
            Some(FilterType::LowShelf)
        );
        assert_eq!(
            recommend(14_000.0, Severity::Resonance, EqStyle::Surgical)
                .shelf
                .map(|s| s.filter),
            Some(FilterType::HighShelf)
        );
        assert!(recommend(1_000.0, Severity::Resonance, EqStyle::Surgical)
            .shelf
            .is_none());
    }
}
