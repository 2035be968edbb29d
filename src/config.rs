//! Configuration management for the feedback detection pipeline
//!
//! `DetectorSettings` is the immutable snapshot the pipeline reads every
//! frame. Updates arrive as a `SettingsPatch`, are merged into a copy,
//! validated, and only then swapped in, so a rejected patch leaves the
//! previous snapshot untouched. Session-level knobs (buffer pool sizing,
//! telemetry capacity) live in `SessionConfig`, and both can be loaded from
//! a JSON file for fast iteration without recompilation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::SettingsError;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub detector: DetectorSettings,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Operating mode presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Lectern and presenter microphones
    Speech,
    /// Full band through the mains; instrument partials are expected
    LiveMusic,
    /// Wedge and in-ear mixes, fast and aggressive
    Monitors,
    /// System ring-out before a show, maximum sensitivity
    RingOut,
}

/// Perceptual weighting curve added to the spectrum before analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    Flat,
    A,
    C,
}

/// Parametric EQ recommendation style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqStyle {
    /// Narrow, deep notches (Q >= 8)
    Surgical,
    /// Broad, moderate cuts (Q <= 4)
    Heavy,
}

/// Feedback detection algorithms available to the fusion policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Msd,
    PhaseCoherence,
    SpectralFlatness,
    Comb,
    Compression,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Msd,
        Algorithm::PhaseCoherence,
        Algorithm::SpectralFlatness,
        Algorithm::Comb,
        Algorithm::Compression,
    ];
}

/// How algorithm scores are selected before fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FusionMode {
    /// Pick the algorithm set from frame count and detected content type
    Auto,
    /// Use exactly one algorithm
    Single { algorithm: Algorithm },
    /// Use a fixed subset
    Subset { algorithms: Vec<Algorithm> },
}

/// Per-algorithm fusion weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmWeights {
    pub msd: f32,
    pub phase_coherence: f32,
    pub spectral_flatness: f32,
    pub comb: f32,
    pub compression: f32,
}

impl AlgorithmWeights {
    pub fn weight(&self, algorithm: Algorithm) -> f32 {
        match algorithm {
            Algorithm::Msd => self.msd,
            Algorithm::PhaseCoherence => self.phase_coherence,
            Algorithm::SpectralFlatness => self.spectral_flatness,
            Algorithm::Comb => self.comb,
            Algorithm::Compression => self.compression,
        }
    }
}

impl Default for AlgorithmWeights {
    fn default() -> Self {
        Self {
            msd: 0.30,
            phase_coherence: 0.25,
            spectral_flatness: 0.25,
            comb: 0.10,
            compression: 0.10,
        }
    }
}

/// Tuning for the multi-algorithm fusion stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub mode: FusionMode,
    pub weights: AlgorithmWeights,
    /// Minimum amplitude samples before MSD has an opinion
    pub msd_min_frames: usize,
    /// Mean squared second difference (dB^2) at which MSD probability falls to 1/e
    pub msd_threshold_db2: f32,
    /// Minimum phase samples before phase coherence has an opinion
    pub phase_min_frames: usize,
    /// Half-width of the neighborhood used for flatness/kurtosis
    pub flatness_window_bins: usize,
    /// Excess kurtosis treated as fully peaked
    pub kurtosis_reference: f32,
    /// Minimum evenly spaced peaks to report a comb pattern
    pub comb_min_peaks: usize,
    /// Allowed deviation from an integer multiple, as a fraction of the spacing
    pub comb_tolerance: f32,
    pub comb_min_path_m: f32,
    pub comb_max_path_m: f32,
    /// Rolling window of broadband frame levels for compression/content detection
    pub content_window_frames: usize,
    /// Frames required before compression/content detection has an opinion
    pub content_min_frames: usize,
    pub runaway_probability: f32,
    pub growing_probability: f32,
    pub ring_probability: f32,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            mode: FusionMode::Auto,
            weights: AlgorithmWeights::default(),
            msd_min_frames: 8,
            msd_threshold_db2: 0.5,
            phase_min_frames: 6,
            flatness_window_bins: 16,
            kurtosis_reference: 10.0,
            comb_min_peaks: 3,
            comb_tolerance: 0.04,
            comb_min_path_m: 0.5,
            comb_max_path_m: 30.0,
            content_window_frames: 100,
            content_min_frames: 25,
            runaway_probability: 0.6,
            growing_probability: 0.5,
            ring_probability: 0.45,
        }
    }
}

/// Immutable per-frame detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub mode: OperationMode,
    pub min_frequency_hz: f32,
    pub max_frequency_hz: f32,

    /// Static input gain correction (dB)
    pub gain_db: f32,
    pub weighting: Weighting,

    /// Absolute floor for peak acceptance regardless of noise floor (dB)
    pub absolute_threshold_db: f32,
    /// Level above noise floor at which a peak counts as feedback (dB)
    pub feedback_threshold_db: f32,
    /// Level above noise floor at which a peak is tracked as a possible ring (dB)
    pub ring_threshold_db: f32,
    /// Growth velocity that marks feedback as growing (dB/s)
    pub growth_rate_threshold_db_s: f32,
    /// Growth since onset that escalates growing feedback to runaway (dB)
    pub runaway_growth_db: f32,

    pub min_prominence_db: f32,
    /// Half-width of the prominence neighborhood (bins)
    pub prominence_window_bins: usize,
    pub max_peaks: usize,
    pub max_tracks: usize,

    pub noise_floor_samples: usize,
    pub noise_floor_attack_ms: f32,
    pub noise_floor_release_ms: f32,

    pub sustain_ms: f64,
    pub clear_ms: f64,
    /// How long a cleared track stays in the registry before removal
    pub track_grace_ms: f64,
    pub history_len: usize,
    pub merge_tolerance_cents: f32,
    pub harmonic_tolerance_cents: f32,
    pub max_harmonic: u32,
    pub growth_window_ms: f64,
    pub stability_window: usize,

    pub resonance_min_q: f32,
    pub stability_max_cents: f32,
    pub whistle_modulation: f32,
    pub instrument_min_harmonics: usize,

    pub eq_style: EqStyle,
    pub ignore_whistle: bool,
    pub ignore_instrument: bool,

    pub classify_every_n_frames: u32,
    pub tracks_update_interval_ms: f64,

    pub fusion: FusionSettings,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            mode: OperationMode::Speech,
            min_frequency_hz: 60.0,
            max_frequency_hz: 16_000.0,
            gain_db: 0.0,
            weighting: Weighting::Flat,
            absolute_threshold_db: -80.0,
            feedback_threshold_db: 10.0,
            ring_threshold_db: 6.0,
            growth_rate_threshold_db_s: 2.0,
            runaway_growth_db: 6.0,
            min_prominence_db: 6.0,
            prominence_window_bins: 8,
            max_peaks: 32,
            max_tracks: 64,
            noise_floor_samples: 256,
            noise_floor_attack_ms: 250.0,
            noise_floor_release_ms: 2_000.0,
            sustain_ms: 300.0,
            clear_ms: 400.0,
            track_grace_ms: 1_000.0,
            history_len: 64,
            merge_tolerance_cents: 50.0,
            harmonic_tolerance_cents: 25.0,
            max_harmonic: 8,
            growth_window_ms: 500.0,
            stability_window: 16,
            resonance_min_q: 8.0,
            stability_max_cents: 10.0,
            whistle_modulation: 0.35,
            instrument_min_harmonics: 2,
            eq_style: EqStyle::Surgical,
            ignore_whistle: false,
            ignore_instrument: false,
            classify_every_n_frames: 1,
            tracks_update_interval_ms: 100.0,
            fusion: FusionSettings::default(),
        }
    }
}

impl DetectorSettings {
    /// Preset tuned for an operating mode
    pub fn for_mode(mode: OperationMode) -> Self {
        let mut settings = Self {
            mode,
            ..Self::default()
        };
        match mode {
            OperationMode::Speech => {
                settings.feedback_threshold_db = 8.0;
                settings.ring_threshold_db = 5.0;
                settings.growth_rate_threshold_db_s = 1.5;
                settings.sustain_ms = 250.0;
                settings.fusion.weights.msd = 0.35;
            }
            OperationMode::LiveMusic => {
                settings.feedback_threshold_db = 12.0;
                settings.ring_threshold_db = 8.0;
                settings.growth_rate_threshold_db_s = 3.0;
                settings.sustain_ms = 400.0;
                settings.ignore_instrument = true;
                settings.fusion.weights.phase_coherence = 0.35;
                settings.fusion.weights.msd = 0.20;
            }
            OperationMode::Monitors => {
                settings.feedback_threshold_db = 8.0;
                settings.growth_rate_threshold_db_s = 2.0;
                settings.sustain_ms = 200.0;
                settings.eq_style = EqStyle::Heavy;
            }
            OperationMode::RingOut => {
                settings.feedback_threshold_db = 6.0;
                settings.ring_threshold_db = 4.0;
                settings.growth_rate_threshold_db_s = 1.0;
                settings.sustain_ms = 150.0;
                settings.clear_ms = 800.0;
                settings.min_prominence_db = 4.0;
            }
        }
        settings
    }

    /// Relative threshold used for peak acceptance
    pub fn relative_threshold_db(&self) -> f32 {
        self.ring_threshold_db.min(self.feedback_threshold_db)
    }

    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_range("min_frequency_hz", self.min_frequency_hz as f64, 10.0, 24_000.0)?;
        check_range("max_frequency_hz", self.max_frequency_hz as f64, 20.0, 48_000.0)?;
        if self.min_frequency_hz >= self.max_frequency_hz {
            return Err(SettingsError::InvalidFrequencyRange {
                min_hz: self.min_frequency_hz,
                max_hz: self.max_frequency_hz,
            });
        }
        check_range("gain_db", self.gain_db as f64, -60.0, 60.0)?;
        check_range(
            "absolute_threshold_db",
            self.absolute_threshold_db as f64,
            -100.0,
            0.0,
        )?;
        check_range(
            "feedback_threshold_db",
            self.feedback_threshold_db as f64,
            1.0,
            60.0,
        )?;
        check_range("ring_threshold_db", self.ring_threshold_db as f64, 1.0, 60.0)?;
        check_range(
            "growth_rate_threshold_db_s",
            self.growth_rate_threshold_db_s as f64,
            0.1,
            100.0,
        )?;
        check_range("runaway_growth_db", self.runaway_growth_db as f64, 0.5, 60.0)?;
        check_range("min_prominence_db", self.min_prominence_db as f64, 0.0, 60.0)?;
        check_range(
            "prominence_window_bins",
            self.prominence_window_bins as f64,
            4.0,
            256.0,
        )?;
        check_range("max_peaks", self.max_peaks as f64, 1.0, 512.0)?;
        check_range("max_tracks", self.max_tracks as f64, 1.0, 1024.0)?;
        check_range(
            "noise_floor_samples",
            self.noise_floor_samples as f64,
            8.0,
            4096.0,
        )?;
        check_range(
            "noise_floor_attack_ms",
            self.noise_floor_attack_ms as f64,
            1.0,
            60_000.0,
        )?;
        check_range(
            "noise_floor_release_ms",
            self.noise_floor_release_ms as f64,
            1.0,
            60_000.0,
        )?;
        check_range("sustain_ms", self.sustain_ms, 0.0, 10_000.0)?;
        check_range("clear_ms", self.clear_ms, 0.0, 10_000.0)?;
        check_range("track_grace_ms", self.track_grace_ms, 0.0, 60_000.0)?;
        check_range("history_len", self.history_len as f64, 4.0, 4096.0)?;
        check_range(
            "merge_tolerance_cents",
            self.merge_tolerance_cents as f64,
            1.0,
            600.0,
        )?;
        check_range(
            "harmonic_tolerance_cents",
            self.harmonic_tolerance_cents as f64,
            1.0,
            100.0,
        )?;
        check_range("max_harmonic", self.max_harmonic as f64, 2.0, 32.0)?;
        check_range("growth_window_ms", self.growth_window_ms, 20.0, 10_000.0)?;
        check_range("stability_window", self.stability_window as f64, 2.0, 4096.0)?;
        check_range("resonance_min_q", self.resonance_min_q as f64, 0.5, 1_000.0)?;
        check_range(
            "stability_max_cents",
            self.stability_max_cents as f64,
            0.1,
            600.0,
        )?;
        check_range("whistle_modulation", self.whistle_modulation as f64, 0.0, 1.0)?;
        check_range(
            "classify_every_n_frames",
            self.classify_every_n_frames as f64,
            1.0,
            1_000.0,
        )?;
        check_range(
            "tracks_update_interval_ms",
            self.tracks_update_interval_ms,
            0.0,
            60_000.0,
        )?;
        self.validate_fusion()
    }

    fn validate_fusion(&self) -> Result<(), SettingsError> {
        let fusion = &self.fusion;
        for algorithm in Algorithm::ALL {
            let weight = fusion.weights.weight(algorithm);
            if !weight.is_finite() || weight < 0.0 {
                return Err(SettingsError::InvalidFusion {
                    reason: format!("weight for {:?} must be >= 0 (got {})", algorithm, weight),
                });
            }
        }
        if let FusionMode::Subset { algorithms } = &fusion.mode {
            if algorithms.is_empty() {
                return Err(SettingsError::InvalidFusion {
                    reason: "subset fusion needs at least one algorithm".to_string(),
                });
            }
        }
        check_range("fusion.msd_min_frames", fusion.msd_min_frames as f64, 3.0, 4096.0)?;
        check_range(
            "fusion.phase_min_frames",
            fusion.phase_min_frames as f64,
            3.0,
            4096.0,
        )?;
        check_range(
            "fusion.flatness_window_bins",
            fusion.flatness_window_bins as f64,
            2.0,
            512.0,
        )?;
        check_range("fusion.comb_min_peaks", fusion.comb_min_peaks as f64, 2.0, 64.0)?;
        if fusion.comb_min_path_m <= 0.0 || fusion.comb_min_path_m >= fusion.comb_max_path_m {
            return Err(SettingsError::InvalidFusion {
                reason: format!(
                    "comb path range {}..{} m is empty",
                    fusion.comb_min_path_m, fusion.comb_max_path_m
                ),
            });
        }
        check_range(
            "fusion.content_window_frames",
            fusion.content_window_frames as f64,
            4.0,
            10_000.0,
        )?;
        for (field, value) in [
            ("fusion.runaway_probability", fusion.runaway_probability),
            ("fusion.growing_probability", fusion.growing_probability),
            ("fusion.ring_probability", fusion.ring_probability),
        ] {
            check_range(field, value as f64, 0.0, 1.0)?;
        }
        Ok(())
    }

    /// Merge a patch into a copy of these settings and validate the result
    ///
    /// On failure the receiver is untouched and the caller keeps using it.
    pub fn apply_patch(&self, patch: &SettingsPatch) -> Result<DetectorSettings, SettingsError> {
        let mut next = match patch.mode {
            Some(mode) if mode != self.mode => DetectorSettings::for_mode(mode),
            _ => self.clone(),
        };

        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = patch.$field.clone() {
                    next.$field = value;
                })*
            };
        }

        merge!(
            min_frequency_hz,
            max_frequency_hz,
            gain_db,
            weighting,
            absolute_threshold_db,
            feedback_threshold_db,
            ring_threshold_db,
            growth_rate_threshold_db_s,
            runaway_growth_db,
            min_prominence_db,
            sustain_ms,
            clear_ms,
            merge_tolerance_cents,
            eq_style,
            ignore_whistle,
            ignore_instrument,
            classify_every_n_frames,
            fusion,
        );

        next.validate()?;
        Ok(next)
    }
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), SettingsError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        })
    }
}

/// Partial settings update; absent fields keep their current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default)]
    pub mode: Option<OperationMode>,
    #[serde(default)]
    pub min_frequency_hz: Option<f32>,
    #[serde(default)]
    pub max_frequency_hz: Option<f32>,
    #[serde(default)]
    pub gain_db: Option<f32>,
    #[serde(default)]
    pub weighting: Option<Weighting>,
    #[serde(default)]
    pub absolute_threshold_db: Option<f32>,
    #[serde(default)]
    pub feedback_threshold_db: Option<f32>,
    #[serde(default)]
    pub ring_threshold_db: Option<f32>,
    #[serde(default)]
    pub growth_rate_threshold_db_s: Option<f32>,
    #[serde(default)]
    pub runaway_growth_db: Option<f32>,
    #[serde(default)]
    pub min_prominence_db: Option<f32>,
    #[serde(default)]
    pub sustain_ms: Option<f64>,
    #[serde(default)]
    pub clear_ms: Option<f64>,
    #[serde(default)]
    pub merge_tolerance_cents: Option<f32>,
    #[serde(default)]
    pub eq_style: Option<EqStyle>,
    #[serde(default)]
    pub ignore_whistle: Option<bool>,
    #[serde(default)]
    pub ignore_instrument: Option<bool>,
    #[serde(default)]
    pub classify_every_n_frames: Option<u32>,
    #[serde(default)]
    pub fusion: Option<FusionSettings>,
}

/// Session-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of pre-allocated spectrum buffers cycling between host and worker
    pub spectrum_pool_size: usize,
    /// Bins pre-reserved in each pooled buffer
    pub spectrum_buffer_bins: usize,
    pub telemetry_channel_capacity: usize,
    pub telemetry_history: usize,
    pub latency_window: usize,
    /// Log pipeline statistics every N frames (0 disables)
    pub log_every_n_frames: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            spectrum_pool_size: 8,
            spectrum_buffer_bins: 4096,
            telemetry_channel_capacity: 256,
            telemetry_history: 64,
            latency_window: 64,
            log_every_n_frames: 500,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// Falls back to defaults when the file is missing, unreadable, or fails
    /// validation.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => match config.detector.validate() {
                    Ok(()) => {
                        log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                        config
                    }
                    Err(err) => {
                        log::warn!(
                            "[Config] Invalid settings in {:?}: {}. Using defaults.",
                            path.as_ref(),
                            err
                        );
                        Self::default()
                    }
                },
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}
