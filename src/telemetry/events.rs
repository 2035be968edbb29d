//! Telemetry event types describing pipeline diagnostics exposed to the CLI
//! and any host that subscribes to the hub.

use serde::{Deserialize, Serialize};

use crate::analysis::advisory::ClearReason;
use crate::analysis::classifier::Severity;

/// Session lifecycle stages reported by the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Initialized,
    Reset,
    FatalReset,
    ShutDown,
}

/// Diagnostic error codes surfaced via telemetry metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    MalformedFrame,
    NotInitialized,
    OutOfOrder,
    InvalidSettings,
    InvariantViolation,
}

/// Metric events covering frame latency, advisory lifecycle, and errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    FrameLatency {
        avg_us: f32,
        max_us: f32,
        sample_count: usize,
    },
    PoolOccupancy {
        percent: f32,
    },
    AdvisoryCreated {
        advisory_id: String,
        track_id: u64,
        frequency_hz: f32,
        severity: Severity,
    },
    AdvisoryCleared {
        advisory_id: String,
        reason: ClearReason,
    },
    SettingsRejected {
        code: i32,
        message: String,
    },
    Session {
        phase: SessionPhase,
        timestamp_ms: u64,
    },
    Error {
        code: DiagnosticError,
        context: String,
    },
}
