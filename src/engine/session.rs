//! Session actor: one worker thread owning one `FeedbackPipeline`.
//!
//! The host talks to the worker over two typed channels. Commands are
//! processed strictly in FIFO order, so a settings patch sent between two
//! frames applies from the second frame on. Spectrum buffers that arrive
//! inside `ProcessFrame`/`ProcessPeak` are handed back through the
//! [`SpectrumPool`](super::buffer_pool::SpectrumPool) once processed.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use crate::analysis::types::SpectrumFrame;
use crate::analysis::FeedbackPipeline;
use crate::config::SessionConfig;
use crate::engine::buffer_pool::{PoolAcquirer, PoolReleaser, SpectrumBuffer, SpectrumPool};
use crate::engine::protocol::{Command, PipelineEvent};
use crate::error::{log_session_error, SessionError};
use crate::telemetry::TelemetryHub;

/// Host-side handle to a running session
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
    pool: PoolAcquirer,
    telemetry: Arc<TelemetryHub>,
    worker: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Start a worker with a fresh telemetry hub
    pub fn spawn(config: &SessionConfig) -> Result<Self, SessionError> {
        Self::spawn_with_telemetry(config, Arc::new(TelemetryHub::from_config(config)))
    }

    /// Start a worker reporting into a caller-owned telemetry hub
    pub fn spawn_with_telemetry(
        config: &SessionConfig,
        telemetry: Arc<TelemetryHub>,
    ) -> Result<Self, SessionError> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (acquirer, releaser) =
            SpectrumPool::new(config.spectrum_pool_size, config.spectrum_buffer_bins);

        let worker = SessionWorker {
            pipeline: FeedbackPipeline::new(Arc::clone(&telemetry))
                .with_log_interval(config.log_every_n_frames),
            commands: command_rx,
            events: event_tx,
            releaser,
        };

        let handle = thread::Builder::new()
            .name("feedback-session".to_string())
            .spawn(move || worker.run())
            .map_err(|err| {
                let err = SessionError::SpawnFailed {
                    reason: err.to_string(),
                };
                log_session_error(&err, "spawn");
                err
            })?;

        tracing::info!(
            "[Session] Spawned worker ({} pooled spectrum buffers)",
            config.spectrum_pool_size
        );

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            pool: acquirer,
            telemetry,
            worker: Some(handle),
        })
    }

    pub fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }

    /// Take an empty spectrum buffer for the next frame
    pub fn acquire_buffer(&mut self) -> SpectrumBuffer {
        let buffer = self.pool.acquire();
        self.telemetry
            .record_pool_occupancy(self.pool.occupancy_percent());
        buffer
    }

    pub fn submit_frame(&self, frame: SpectrumFrame) -> Result<(), SessionError> {
        self.send(Command::ProcessFrame { frame })
    }

    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next event from a plain thread
    ///
    /// Returns `None` once the worker has stopped and every event was read.
    /// Must not be called from inside an async runtime; use [`Self::recv`].
    pub fn recv_blocking(&mut self) -> Option<PipelineEvent> {
        self.events.blocking_recv()
    }

    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    pub fn telemetry(&self) -> &Arc<TelemetryHub> {
        &self.telemetry
    }

    /// Stop the worker after it drains queued commands
    pub fn shutdown(mut self) -> Result<(), SessionError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        // the worker may already be gone after a panic
        let _ = self.commands.send(Command::Shutdown);
        worker.join().map_err(|_| {
            let err = SessionError::WorkerPanicked;
            log_session_error(&err, "shutdown");
            err
        })
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct SessionWorker {
    pipeline: FeedbackPipeline,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    releaser: PoolReleaser,
}

impl SessionWorker {
    fn run(mut self) {
        tracing::info!("[Session] Worker started");

        while let Some(command) = self.commands.blocking_recv() {
            let shutdown = matches!(command, Command::Shutdown);
            let events = self.dispatch(command);

            if events.into_iter().any(|event| self.events.send(event).is_err()) {
                tracing::info!("[Session] Host dropped the event channel, exiting");
                break;
            }
            if shutdown {
                break;
            }
        }

        tracing::info!("[Session] Worker stopped");
    }

    fn dispatch(&mut self, command: Command) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        match command {
            Command::ProcessFrame { frame } => {
                self.pipeline.process_frame(&frame, &mut out);
                self.recycle(frame.magnitudes_db);
            }
            Command::ProcessPeak {
                peak,
                spectrum,
                sample_rate,
                fft_size,
                timestamp_ms,
            } => {
                let frame = SpectrumFrame::new(spectrum, sample_rate, fft_size, timestamp_ms);
                self.pipeline.process_peak(peak, &frame, &mut out);
                self.recycle(frame.magnitudes_db);
            }
            other => out = self.pipeline.handle(other),
        }
        out
    }

    fn recycle(&mut self, buffer: SpectrumBuffer) {
        if !self.releaser.release(buffer) {
            tracing::debug!("[Session] Spectrum pool full, dropping returned buffer");
        }
    }
}
