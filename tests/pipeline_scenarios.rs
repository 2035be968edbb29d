//! End-to-end scenarios against the public pipeline API
//!
//! Commands and events cross a JSON boundary here, the way a host transport
//! would carry them.

use std::sync::Arc;

use feedback_detector::config::AppConfig;
use feedback_detector::engine::{Command, PipelineEvent};
use feedback_detector::fixtures::synthetic::{Scenario, SyntheticSpectrum};
use feedback_detector::fixtures::{ExpectedAdvisory, FixtureExpectations, FixtureProcessor};
use feedback_detector::{FeedbackPipeline, TelemetryHub};
use serde_json::{json, Value};

const SAMPLE_RATE: u32 = 48_000;
const FFT_SIZE: usize = 8192;
const HOP_MS: f64 = 20.0;

/// Decode a JSON command, run it, and re-encode the events
fn send_json(pipeline: &mut FeedbackPipeline, command: Value) -> Vec<Value> {
    let command: Command = serde_json::from_value(command).expect("command JSON");
    pipeline
        .handle(command)
        .iter()
        .map(|event| serde_json::to_value(event).expect("event JSON"))
        .collect()
}

#[test]
fn json_session_steady_tone_then_clear_peak() {
    let mut pipeline = FeedbackPipeline::new(Arc::new(TelemetryHub::default()));

    let ready = send_json(
        &mut pipeline,
        json!({ "type": "init", "settings": {}, "sample_rate": SAMPLE_RATE, "fft_size": FFT_SIZE }),
    );
    assert_eq!(
        ready,
        vec![json!({ "type": "ready", "sample_rate": SAMPLE_RATE, "fft_size": FFT_SIZE })]
    );

    let mut source = SyntheticSpectrum::new(SAMPLE_RATE, FFT_SIZE, 10);
    let mut events = Vec::new();
    for frame in Scenario::Steady.render(&mut source, 30, HOP_MS) {
        events.extend(send_json(
            &mut pipeline,
            json!({ "type": "process_frame", "frame": frame }),
        ));
    }

    let created: Vec<&Value> = events
        .iter()
        .filter(|e| e["type"] == "advisory" && e["change"] == "created")
        .collect();
    assert_eq!(created.len(), 1);
    let advisory_id = created[0]["advisory"]["id"].clone();

    let bin = source.bin_of(2_000.0);
    let cleared = send_json(
        &mut pipeline,
        json!({ "type": "clear_peak", "bin_index": bin, "frequency_hz": 1998.0, "timestamp_ms": 600.0 }),
    );
    assert_eq!(cleared.len(), 1);
    assert_eq!(cleared[0]["type"], "advisory_cleared");
    assert_eq!(cleared[0]["advisory_id"], advisory_id);
    assert_eq!(cleared[0]["reason"], "inactive");
}

#[test]
fn json_settings_patch_is_silent() {
    let mut pipeline = FeedbackPipeline::new(Arc::new(TelemetryHub::default()));
    send_json(
        &mut pipeline,
        json!({ "type": "init", "settings": {}, "sample_rate": SAMPLE_RATE, "fft_size": FFT_SIZE }),
    );

    let events = send_json(
        &mut pipeline,
        json!({ "type": "update_settings", "patch": { "ignore_instrument": true } }),
    );
    assert!(events.is_empty());
    assert!(pipeline.settings().ignore_instrument);
}

#[test]
fn harmonic_scenario_matches_expectations() {
    let mut source = SyntheticSpectrum::new(SAMPLE_RATE, FFT_SIZE, 3);
    let frames = Scenario::Harmonic.render(&mut source, 40, HOP_MS);
    let run = FixtureProcessor::new(AppConfig::default())
        .run_frames(SAMPLE_RATE, frames)
        .expect("fixture run");

    assert_eq!(run.frames, 40);
    assert_eq!(run.telemetry.frames_processed, 40);
    assert!(matches!(run.events.first(), Some(PipelineEvent::Ready { .. })));

    let expectations = FixtureExpectations {
        fixture: "harmonic".to_string(),
        notes: Some("overtone folds into its root".to_string()),
        advisories: vec![ExpectedAdvisory {
            frequency_hz: 1_000.0,
            tolerance_hz: 20.0,
            severity: None,
        }],
        exclusive: true,
    };
    let published = run.published_advisories();
    if let Err(diff) = expectations.verify(&published) {
        panic!("unexpected advisories: {}", diff.to_json());
    }
}
