//! Session layer around the detection pipeline.
//!
//! `protocol` defines the typed command/event messages, `session` runs one
//! pipeline on a dedicated worker thread, and `buffer_pool` recycles the
//! spectrum vectors that travel between them.

pub mod buffer_pool;
pub mod protocol;
pub mod session;

pub use buffer_pool::{PoolAcquirer, PoolReleaser, SpectrumBuffer, SpectrumPool};
pub use protocol::{Command, PipelineEvent};
pub use session::SessionHandle;
