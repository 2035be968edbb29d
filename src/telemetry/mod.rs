//! Diagnostics telemetry collector and helpers.
//!
//! The hub multiplexes frame latency, advisory lifecycle, settings
//! rejections, and errors into a bounded history plus a broadcast stream.
//! It is constructed by whoever owns the session and handed to the pipeline
//! as an `Arc`, so tests and embedders each get their own instance.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;

use crate::analysis::advisory::{Advisory, ClearReason};
use crate::config::SessionConfig;
use crate::error::{ErrorCode, SettingsError};

pub mod events;

pub use events::{DiagnosticError, MetricEvent, SessionPhase};

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = lock(&self.history);
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        // no subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    fn recent(&self) -> Vec<MetricEvent> {
        lock(&self.history).iter().cloned().collect()
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Latency tracker maintains a rolling window to compute avg/max latency.
struct LatencyTracker {
    samples: VecDeque<f32>,
    max_samples: usize,
}

impl LatencyTracker {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    fn observe(&mut self, value: f32) -> (f32, f32, usize) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value.abs());

        let count = self.samples.len();
        let sum: f32 = self.samples.iter().copied().sum();
        let max = self
            .samples
            .iter()
            .copied()
            .fold(0.0_f32, |acc, next| acc.max(next));
        let avg = if count == 0 { 0.0 } else { sum / count as f32 };
        (avg, max, count)
    }
}

/// Top-level hub wrapping collector state plus derived gauges.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    latency: Mutex<LatencyTracker>,
    /// Publish a latency summary every N frames
    latency_every: u64,
    pool_gauge: Mutex<Option<f32>>,
    frames_processed: AtomicU64,
    frames_dropped: AtomicU64,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize, latency_window: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            latency: Mutex::new(LatencyTracker::new(latency_window)),
            latency_every: latency_window.max(1) as u64,
            pool_gauge: Mutex::new(None),
            frames_processed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.telemetry_channel_capacity,
            config.telemetry_history,
            config.latency_window,
        )
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.collector.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            recent: self.collector.recent(),
            total_events: self.collector.total_events.load(Ordering::Relaxed),
            dropped_events: self.collector.dropped_history.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }

    /// Record one processed frame; a latency summary is published once per window
    pub fn record_frame(&self, elapsed_us: f32) {
        let processed = self.frames_processed.fetch_add(1, Ordering::Relaxed) + 1;
        let (avg, max, count) = lock(&self.latency).observe(elapsed_us);
        if processed % self.latency_every == 0 {
            self.collector.publish(MetricEvent::FrameLatency {
                avg_us: avg,
                max_us: max,
                sample_count: count,
            });
        }
    }

    pub fn record_dropped_frame(&self, code: DiagnosticError, context: impl Into<String>) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        self.record_error(code, context);
    }

    pub fn record_advisory_created(&self, advisory: &Advisory) {
        self.collector.publish(MetricEvent::AdvisoryCreated {
            advisory_id: advisory.id.clone(),
            track_id: advisory.track_id,
            frequency_hz: advisory.frequency_hz,
            severity: advisory.severity,
        });
    }

    pub fn record_advisory_cleared(&self, advisory_id: &str, reason: ClearReason) {
        self.collector.publish(MetricEvent::AdvisoryCleared {
            advisory_id: advisory_id.to_string(),
            reason,
        });
    }

    pub fn record_settings_rejected(&self, err: &SettingsError) {
        self.collector.publish(MetricEvent::SettingsRejected {
            code: err.code(),
            message: err.message(),
        });
    }

    /// Spectrum pool occupancy, debounced to changes of at least 2.5%
    pub fn record_pool_occupancy(&self, percent: f32) {
        let normalized = percent.clamp(0.0, 100.0);
        let mut gauge = lock(&self.pool_gauge);

        let should_emit = gauge
            .map(|last| (last - normalized).abs() >= 2.5)
            .unwrap_or(true);

        if should_emit {
            *gauge = Some(normalized);
            self.collector
                .publish(MetricEvent::PoolOccupancy { percent: normalized });
        }
    }

    pub fn record_phase(&self, phase: SessionPhase) {
        self.collector.publish(MetricEvent::Session {
            phase,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_error(&self, code: DiagnosticError, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code,
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// Telemetry must keep working after a panicking holder; take the data anyway
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
