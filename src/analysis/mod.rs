// Analysis module - feedback detection pipeline
//
// This module orchestrates the complete detection pipeline. The session
// worker owns one `FeedbackPipeline` and feeds it commands in FIFO order;
// every command returns the outbound events it produced.
//
// Architecture:
// - Per frame: SpectralPreprocessor → NoiseFloorEstimator → PeakDetector
//   → TrackManager → Classifier → AdvisoryRegistry
// - `process_peak` skips detection and feeds one producer-side peak
// - Output: `PipelineEvent`s plus telemetry on the injected `TelemetryHub`

use std::sync::Arc;
use std::time::Instant;

use crate::config::{DetectorSettings, SettingsPatch};
use crate::engine::protocol::{Command, PipelineEvent};
use crate::error::{log_pipeline_error, log_settings_error, PipelineError, SettingsError};
use crate::telemetry::{DiagnosticError, SessionPhase, TelemetryHub};

pub mod advisory;
pub mod classifier;
pub mod eq;
pub mod noise_floor;
pub mod peaks;
pub mod pitch;
pub mod preprocess;
pub mod tracking;
pub mod types;

use advisory::{AdvisoryChange, AdvisoryEvent, AdvisoryRegistry};
use classifier::Classifier;
use noise_floor::NoiseFloorEstimator;
use peaks::PeakDetector;
use preprocess::SpectralPreprocessor;
use tracking::TrackManager;
use types::{DetectedPeak, SpectrumFrame};

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 384_000;
pub const MIN_FFT_SIZE: usize = 64;
pub const MAX_FFT_SIZE: usize = 65_536;

/// Stream format fixed by `init`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub fft_size: usize,
}

impl StreamFormat {
    pub fn validate(&self) -> Result<(), SettingsError> {
        let rate_ok = (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate);
        let fft_ok = self.fft_size.is_power_of_two()
            && (MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&self.fft_size);
        if rate_ok && fft_ok {
            Ok(())
        } else {
            Err(SettingsError::InvalidStreamFormat {
                sample_rate: self.sample_rate,
                fft_size: self.fft_size,
            })
        }
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

/// Single-threaded detection pipeline
///
/// Holds every stage plus the session state (stream format, last frame
/// time). Settings are an immutable `Arc` snapshot replaced wholesale
/// between frames.
pub struct FeedbackPipeline {
    settings: Arc<DetectorSettings>,
    stream: Option<StreamFormat>,

    // Stages
    preprocessor: SpectralPreprocessor,
    noise_floor: NoiseFloorEstimator,
    peak_detector: PeakDetector,
    tracker: TrackManager,
    classifier: Classifier,
    registry: AdvisoryRegistry,

    telemetry: Arc<TelemetryHub>,
    log_every_n_frames: u64,

    // State
    last_timestamp_ms: Option<f64>,
    last_tracks_update_ms: Option<f64>,
    frame_index: u64,
    advisory_events: Vec<AdvisoryEvent>,
    classify_ids: Vec<u64>,
}

impl FeedbackPipeline {
    pub fn new(telemetry: Arc<TelemetryHub>) -> Self {
        let settings = DetectorSettings::default();
        Self {
            preprocessor: SpectralPreprocessor::new(),
            noise_floor: NoiseFloorEstimator::new(settings.noise_floor_samples),
            peak_detector: PeakDetector::new(settings.max_peaks),
            tracker: TrackManager::new(),
            classifier: Classifier::new(),
            registry: AdvisoryRegistry::new(),
            settings: Arc::new(settings),
            stream: None,
            telemetry,
            log_every_n_frames: 0,
            last_timestamp_ms: None,
            last_tracks_update_ms: None,
            frame_index: 0,
            advisory_events: Vec::new(),
            classify_ids: Vec::new(),
        }
    }

    /// Log pipeline statistics every N frames (0 disables)
    pub fn with_log_interval(mut self, every_n_frames: u64) -> Self {
        self.log_every_n_frames = every_n_frames;
        self
    }

    pub fn settings(&self) -> &Arc<DetectorSettings> {
        &self.settings
    }

    pub fn stream_format(&self) -> Option<StreamFormat> {
        self.stream
    }

    pub fn is_initialized(&self) -> bool {
        self.stream.is_some()
    }

    pub fn tracks(&self) -> &TrackManager {
        &self.tracker
    }

    pub fn advisories(&self) -> &AdvisoryRegistry {
        &self.registry
    }

    pub fn noise_floor_db(&self) -> Option<f32> {
        self.noise_floor.floor_db()
    }

    pub fn telemetry(&self) -> &Arc<TelemetryHub> {
        &self.telemetry
    }

    /// Dispatch one command and collect the events it produced
    pub fn handle(&mut self, command: Command) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        match command {
            Command::Init {
                settings,
                sample_rate,
                fft_size,
            } => self.init(settings, sample_rate, fft_size, &mut out),
            Command::UpdateSettings { patch } => self.update_settings(&patch),
            Command::ProcessFrame { frame } => self.process_frame(&frame, &mut out),
            Command::ProcessPeak {
                peak,
                spectrum,
                sample_rate,
                fft_size,
                timestamp_ms,
            } => {
                let frame = SpectrumFrame::new(spectrum, sample_rate, fft_size, timestamp_ms);
                self.process_peak(peak, &frame, &mut out);
            }
            Command::ClearPeak {
                bin_index,
                frequency_hz,
                timestamp_ms,
            } => self.clear_peak(bin_index, frequency_hz, timestamp_ms, &mut out),
            Command::Reset => self.reset(&mut out),
            Command::Shutdown => {
                self.telemetry.record_phase(SessionPhase::ShutDown);
            }
        }
        out
    }

    /// Configure the stream and start accepting frames
    ///
    /// Re-initializing a running session clears its advisories first.
    pub fn init(
        &mut self,
        settings: DetectorSettings,
        sample_rate: u32,
        fft_size: usize,
        out: &mut Vec<PipelineEvent>,
    ) {
        let format = StreamFormat {
            sample_rate,
            fft_size,
        };
        if let Err(err) = settings.validate().and_then(|_| format.validate()) {
            log_settings_error(&err, "init");
            self.telemetry.record_settings_rejected(&err);
            let err = PipelineError::InvalidSettings(err);
            out.push(PipelineEvent::error(&err));
            return;
        }

        self.clear_state(out);
        self.noise_floor = NoiseFloorEstimator::new(settings.noise_floor_samples);
        self.peak_detector = PeakDetector::new(settings.max_peaks);
        self.settings = Arc::new(settings);
        self.stream = Some(format);
        self.telemetry.record_phase(SessionPhase::Initialized);

        tracing::info!(
            "[Pipeline] Initialized: {} Hz, FFT {} ({} bins), mode {:?}",
            sample_rate,
            fft_size,
            format.bin_count(),
            self.settings.mode
        );
        out.push(PipelineEvent::Ready {
            sample_rate,
            fft_size,
        });
    }

    /// Merge a patch into the active settings
    ///
    /// A rejected patch is logged and the previous snapshot stays in force.
    pub fn update_settings(&mut self, patch: &SettingsPatch) {
        match self.settings.apply_patch(patch) {
            Ok(next) => {
                tracing::info!("[Pipeline] Settings updated (mode {:?})", next.mode);
                self.settings = Arc::new(next);
            }
            Err(err) => {
                log_settings_error(&err, "update_settings");
                self.telemetry.record_settings_rejected(&err);
            }
        }
    }

    /// Full detection over one spectrum frame
    pub fn process_frame(&mut self, frame: &SpectrumFrame, out: &mut Vec<PipelineEvent>) {
        let started = Instant::now();
        match self.run_frame(frame, None) {
            Ok(()) => self.finish_frame(frame.timestamp_ms, started, out),
            Err(err) => self.fail_frame(err, "process_frame", out),
        }
    }

    /// Feed one producer-detected peak together with the spectrum it came from
    pub fn process_peak(
        &mut self,
        peak: DetectedPeak,
        frame: &SpectrumFrame,
        out: &mut Vec<PipelineEvent>,
    ) {
        let started = Instant::now();
        match self.run_frame(frame, Some(peak)) {
            Ok(()) => self.finish_frame(frame.timestamp_ms, started, out),
            Err(err) => self.fail_frame(err, "process_peak", out),
        }
    }

    /// The producer stopped tracking a peak; deactivate its track now
    pub fn clear_peak(
        &mut self,
        bin_index: usize,
        frequency_hz: f32,
        timestamp_ms: f64,
        out: &mut Vec<PipelineEvent>,
    ) {
        if self.stream.is_none() {
            self.fail_frame(PipelineError::NotInitialized, "clear_peak", out);
            return;
        }
        let settings = Arc::clone(&self.settings);
        let now_ms = self.last_timestamp_ms.unwrap_or(timestamp_ms).max(timestamp_ms);
        if self
            .tracker
            .clear_track(bin_index, frequency_hz, now_ms, &settings)
            .is_some()
        {
            self.registry.reconcile(&self.tracker, &mut self.advisory_events);
            self.drain_advisory_events(out);
        }
    }

    /// Drop every track and advisory (emitting clears); `init` is required again
    pub fn reset(&mut self, out: &mut Vec<PipelineEvent>) {
        self.clear_state(out);
        self.stream = None;
        self.telemetry.record_phase(SessionPhase::Reset);
        tracing::info!("[Pipeline] Reset, awaiting init");
    }

    fn clear_state(&mut self, out: &mut Vec<PipelineEvent>) {
        self.registry.clear_all(&mut self.advisory_events);
        self.drain_advisory_events(out);
        self.tracker.reset();
        self.noise_floor.reset();
        self.classifier.reset();
        self.last_timestamp_ms = None;
        self.last_tracks_update_ms = None;
        self.frame_index = 0;
    }

    fn run_frame(
        &mut self,
        frame: &SpectrumFrame,
        supplied_peak: Option<DetectedPeak>,
    ) -> Result<(), PipelineError> {
        let format = self.stream.ok_or(PipelineError::NotInitialized)?;
        if frame.fft_size != format.fft_size {
            return Err(PipelineError::BinCountMismatch {
                expected: format.bin_count(),
                actual: frame.magnitudes_db.len(),
            });
        }
        if frame.sample_rate != format.sample_rate {
            return Err(PipelineError::SampleRateMismatch {
                expected: format.sample_rate,
                actual: frame.sample_rate,
            });
        }
        if let Some(peak) = &supplied_peak {
            validate_peak(peak, &format)?;
        }
        if let Some(previous_ms) = self.last_timestamp_ms {
            if frame.timestamp_ms < previous_ms {
                return Err(PipelineError::OutOfOrder {
                    previous_ms,
                    current_ms: frame.timestamp_ms,
                });
            }
        }

        let settings = Arc::clone(&self.settings);
        let now_ms = frame.timestamp_ms;

        let spectrum = self
            .preprocessor
            .process(frame, settings.gain_db, settings.weighting)?;
        self.last_timestamp_ms = Some(now_ms);

        let floor = self.noise_floor.update(spectrum, &settings);

        let stats = match supplied_peak {
            Some(peak) => {
                let peaks = [DetectedPeak {
                    timestamp_ms: now_ms,
                    ..peak
                }];
                self.tracker
                    .associate(&peaks, spectrum, frame.phases.as_deref(), now_ms, &settings)?
            }
            None => {
                let peaks = self
                    .peak_detector
                    .detect(spectrum, floor.threshold_db, &settings);
                self.tracker
                    .associate(peaks, spectrum, frame.phases.as_deref(), now_ms, &settings)?
            }
        };

        self.classifier.begin_frame(
            spectrum,
            floor.floor_db,
            self.tracker.active_tracks(),
            &settings,
        );

        let cadence = settings.classify_every_n_frames.max(1) as u64;
        if self.frame_index % cadence == 0 {
            self.classify_ids.clear();
            self.classify_ids.extend(
                self.tracker
                    .active_tracks()
                    .filter(|track| track.is_established())
                    .map(|track| track.id),
            );
            for &id in &self.classify_ids {
                if let Some(track) = self.tracker.get_mut(id) {
                    track.mark_classified();
                }
                let Some(track) = self.tracker.get(id) else {
                    continue;
                };
                let result = self
                    .classifier
                    .classify(track, spectrum, floor.floor_db, &settings);
                self.registry
                    .apply(track, result, &settings, &mut self.advisory_events);
            }
        }
        self.registry.reconcile(&self.tracker, &mut self.advisory_events);

        if self.log_every_n_frames > 0 && self.frame_index % self.log_every_n_frames == 0 {
            tracing::info!(
                "[Pipeline] Frame {}: floor {:.1} dB, threshold {:.1} dB, {} tracks ({} matched, +{} spawned, {} deactivated, -{} removed, {} dropped), {} advisories",
                self.frame_index,
                floor.floor_db,
                floor.threshold_db,
                self.tracker.len(),
                stats.matched,
                stats.spawned,
                stats.deactivated,
                stats.removed,
                stats.dropped,
                self.registry.len()
            );
        }
        self.frame_index += 1;
        Ok(())
    }

    fn finish_frame(&mut self, now_ms: f64, started: Instant, out: &mut Vec<PipelineEvent>) {
        self.drain_advisory_events(out);

        let due = self
            .last_tracks_update_ms
            .map(|last| now_ms - last >= self.settings.tracks_update_interval_ms)
            .unwrap_or(true);
        if due {
            self.last_tracks_update_ms = Some(now_ms);
            out.push(PipelineEvent::TracksUpdate {
                timestamp_ms: now_ms,
                tracks: self.tracker.tracks().map(|track| track.summary()).collect(),
            });
        }

        self.telemetry
            .record_frame(started.elapsed().as_secs_f32() * 1_000_000.0);
    }

    fn fail_frame(&mut self, err: PipelineError, context: &str, out: &mut Vec<PipelineEvent>) {
        log_pipeline_error(&err, context);
        out.push(PipelineEvent::error(&err));

        let code = match &err {
            PipelineError::BinCountMismatch { .. }
            | PipelineError::NonFiniteValues { .. }
            | PipelineError::SampleRateMismatch { .. }
            | PipelineError::InvalidPeak { .. } => DiagnosticError::MalformedFrame,
            PipelineError::NotInitialized => DiagnosticError::NotInitialized,
            PipelineError::OutOfOrder { .. } => DiagnosticError::OutOfOrder,
            PipelineError::InvalidSettings(_) => DiagnosticError::InvalidSettings,
            PipelineError::InvariantViolation { .. } => DiagnosticError::InvariantViolation,
        };

        if err.is_fatal() {
            // Advisories raised before the failure are still published, then cleared
            self.drain_advisory_events(out);
            self.telemetry.record_error(code, context);
            self.clear_state(out);
            self.stream = None;
            self.telemetry.record_phase(SessionPhase::FatalReset);
            tracing::warn!("[Pipeline] Session reset after fatal error, awaiting init");
        } else {
            self.telemetry.record_dropped_frame(code, context);
        }
    }

    fn drain_advisory_events(&mut self, out: &mut Vec<PipelineEvent>) {
        for event in self.advisory_events.drain(..) {
            match &event {
                AdvisoryEvent::Published {
                    change: AdvisoryChange::Created,
                    advisory,
                } => self.telemetry.record_advisory_created(advisory),
                AdvisoryEvent::Cleared {
                    advisory_id,
                    reason,
                    ..
                } => self.telemetry.record_advisory_cleared(advisory_id, *reason),
                AdvisoryEvent::Published { .. } => {}
            }
            out.push(PipelineEvent::from(event));
        }
    }
}

/// Reject host peaks the tracker could never match again
fn validate_peak(peak: &DetectedPeak, format: &StreamFormat) -> Result<(), PipelineError> {
    let invalid = |reason: &str| PipelineError::InvalidPeak {
        bin: peak.bin,
        reason: reason.to_string(),
    };
    if peak.bin >= format.bin_count() {
        return Err(invalid("bin outside spectrum"));
    }
    if !(peak.frequency_hz.is_finite() && peak.frequency_hz > 0.0) {
        return Err(invalid("frequency must be finite and positive"));
    }
    if !(peak.amplitude_db.is_finite() && peak.prominence_db.is_finite()) {
        return Err(invalid("non-finite amplitude or prominence"));
    }
    Ok(())
}
