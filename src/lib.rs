// Feedback Detector Core - acoustic feedback detection pipeline
// Spectrum frames in, tracked resonances and EQ advisories out

// Module declarations
pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod fixtures;
pub mod telemetry;

// Re-exports for convenience
pub use analysis::{FeedbackPipeline, StreamFormat};
pub use config::{AppConfig, DetectorSettings, SessionConfig, SettingsPatch};
pub use engine::{Command, PipelineEvent, SessionHandle};
pub use telemetry::TelemetryHub;
