//! Integration tests for the session actor
//!
//! These tests drive a `SessionHandle` the way a host would:
//! - Init handshake and Ready reply
//! - Frames submitted through pooled buffers producing advisories
//! - FIFO ordering of settings patches relative to frames
//! - Shutdown and the closed-channel error afterwards

use feedback_detector::analysis::advisory::AdvisoryChange;
use feedback_detector::analysis::classifier::Severity;
use feedback_detector::config::{DetectorSettings, SessionConfig, SettingsPatch};
use feedback_detector::engine::{Command, PipelineEvent, SessionHandle};
use feedback_detector::error::{PipelineErrorCodes, SessionError};
use feedback_detector::fixtures::synthetic::{Scenario, SyntheticSpectrum};
use feedback_detector::telemetry::{MetricEvent, SessionPhase};

const SAMPLE_RATE: u32 = 48_000;
const FFT_SIZE: usize = 8192;
const HOP_MS: f64 = 20.0;

fn init(session: &SessionHandle) {
    session
        .send(Command::Init {
            settings: DetectorSettings::default(),
            sample_rate: SAMPLE_RATE,
            fft_size: FFT_SIZE,
        })
        .expect("init command");
}

/// Submit every frame through a pooled buffer
fn submit_scenario(session: &mut SessionHandle, scenario: Scenario, frames: usize, seed: u64) {
    let mut source = SyntheticSpectrum::new(SAMPLE_RATE, FFT_SIZE, seed);
    for mut frame in scenario.render(&mut source, frames, HOP_MS) {
        let mut buffer = session.acquire_buffer();
        buffer.extend_from_slice(&frame.magnitudes_db);
        frame.magnitudes_db = buffer;
        session.submit_frame(frame).expect("submit frame");
    }
}

/// Send Shutdown and read every event until the worker exits
fn drain(session: &mut SessionHandle) -> Vec<PipelineEvent> {
    session.send(Command::Shutdown).expect("shutdown command");
    let mut events = Vec::new();
    while let Some(event) = session.recv_blocking() {
        events.push(event);
    }
    events
}

#[test]
fn test_init_replies_ready() {
    let mut session = SessionHandle::spawn(&SessionConfig::default()).expect("spawn session");
    init(&session);

    let event = session.recv_blocking().expect("ready event");
    assert_eq!(
        event,
        PipelineEvent::Ready {
            sample_rate: SAMPLE_RATE,
            fft_size: FFT_SIZE
        }
    );
    session.shutdown().expect("clean shutdown");
}

#[test]
fn test_steady_scenario_through_session() {
    let mut session = SessionHandle::spawn(&SessionConfig::default()).expect("spawn session");
    init(&session);
    submit_scenario(&mut session, Scenario::Steady, 60, 1);
    let events = drain(&mut session);

    assert!(matches!(events.first(), Some(PipelineEvent::Ready { .. })));
    let advisories: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Advisory { change, advisory } => Some((*change, advisory)),
            _ => None,
        })
        .collect();
    assert_eq!(advisories.len(), 1, "events: {:?}", advisories);
    assert_eq!(advisories[0].0, AdvisoryChange::Created);
    assert_eq!(advisories[0].1.severity, Severity::Resonance);

    let snapshot = session.telemetry().snapshot();
    assert_eq!(snapshot.frames_processed, 60);
    assert_eq!(snapshot.frames_dropped, 0);
    assert!(snapshot.recent.iter().any(|m| matches!(
        m,
        MetricEvent::Session {
            phase: SessionPhase::ShutDown,
            ..
        }
    )));
    session.shutdown().expect("clean shutdown");
}

#[test]
fn test_processed_buffers_return_to_pool() {
    let config = SessionConfig {
        spectrum_pool_size: 1,
        spectrum_buffer_bins: 1,
        ..SessionConfig::default()
    };
    let mut session = SessionHandle::spawn(&config).expect("spawn session");
    init(&session);
    assert!(matches!(
        session.recv_blocking(),
        Some(PipelineEvent::Ready { .. })
    ));

    let mut source = SyntheticSpectrum::new(SAMPLE_RATE, FFT_SIZE, 3);
    let mut frame = source.frame(0.0, &[]);
    let mut buffer = session.acquire_buffer();
    buffer.extend_from_slice(&frame.magnitudes_db);
    frame.magnitudes_db = buffer;
    session.submit_frame(frame).expect("submit frame");

    // the first frame always carries a tracks update
    assert!(matches!(
        session.recv_blocking(),
        Some(PipelineEvent::TracksUpdate { .. })
    ));

    // a freshly allocated buffer would only reserve one bin
    let recycled = session.acquire_buffer();
    assert!(recycled.is_empty());
    assert!(recycled.capacity() >= FFT_SIZE / 2);

    assert!(session
        .telemetry()
        .snapshot()
        .recent
        .iter()
        .any(|m| matches!(m, MetricEvent::PoolOccupancy { .. })));
    session.shutdown().expect("clean shutdown");
}

#[test]
fn test_patch_between_frames_applies_in_order() {
    let mut session = SessionHandle::spawn(&SessionConfig::default()).expect("spawn session");
    init(&session);
    session
        .send(Command::UpdateSettings {
            patch: SettingsPatch {
                feedback_threshold_db: Some(500.0),
                ..Default::default()
            },
        })
        .expect("patch command");
    submit_scenario(&mut session, Scenario::Silence, 3, 4);
    let events = drain(&mut session);

    // rejected patches are silent on the event channel
    assert!(!events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Error { .. })));
    assert!(session
        .telemetry()
        .snapshot()
        .recent
        .iter()
        .any(|m| matches!(m, MetricEvent::SettingsRejected { .. })));
    assert_eq!(session.telemetry().snapshot().frames_processed, 3);
    session.shutdown().expect("clean shutdown");
}

#[test]
fn test_frames_before_init_report_errors() {
    let mut session = SessionHandle::spawn(&SessionConfig::default()).expect("spawn session");
    submit_scenario(&mut session, Scenario::Silence, 2, 5);
    let events = drain(&mut session);

    assert_eq!(
        events,
        vec![
            PipelineEvent::Error {
                code: PipelineErrorCodes::NOT_INITIALIZED,
                message: events_message(&events, 0),
            },
            PipelineEvent::Error {
                code: PipelineErrorCodes::NOT_INITIALIZED,
                message: events_message(&events, 1),
            },
        ]
    );
    assert_eq!(session.telemetry().snapshot().frames_dropped, 2);
    session.shutdown().expect("clean shutdown");
}

fn events_message(events: &[PipelineEvent], index: usize) -> String {
    match events.get(index) {
        Some(PipelineEvent::Error { message, .. }) => message.clone(),
        other => panic!("Expected error event, got {:?}", other),
    }
}

#[test]
fn test_send_after_worker_exit_is_closed() {
    let mut session = SessionHandle::spawn(&SessionConfig::default()).expect("spawn session");
    let events = drain(&mut session);
    assert!(events.is_empty());

    assert_eq!(session.send(Command::Reset), Err(SessionError::Closed));
    session.shutdown().expect("shutdown after exit");
}

#[tokio::test]
async fn test_async_receive() {
    let mut session = SessionHandle::spawn(&SessionConfig::default()).expect("spawn session");
    init(&session);

    let event = session.recv().await.expect("ready event");
    assert!(matches!(event, PipelineEvent::Ready { .. }));

    session.send(Command::Reset).expect("reset command");
    session.send(Command::Shutdown).expect("shutdown command");
    assert!(session.recv().await.is_none());
    // joins a worker that has already stopped
    session.shutdown().expect("clean shutdown");
}
