//! ecggarden: ECG capture-session supervisor.
//!
//! Each session key gets one worker that samples an analog source at a
//! fixed rate into a ring buffer, renders the buffer every flush interval
//! and hands the artifact to a sink.
//!
//! - [`Supervisor`]: start, stop (with escalation), liveness, cleanup
//! - [`SessionRegistry`]: key to worker handle, the only cross-task state
//! - [`CaptureLoop`]: the per-session sampling and flush loop
//! - [`SessionState`]: lifecycle rules shared by supervisor and loop
//!
//! Samples come from a [`Sampler`], artifacts from a [`Renderer`], and
//! bookkeeping goes to a [`Sink`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ecggarden::{MemorySink, SessionKey, Supervisor};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = ecgconf::EcgConfig::load()?;
//! let supervisor = Supervisor::from_config(&config, Arc::new(MemorySink::new()));
//!
//! let key = SessionKey::from(42u32);
//! supervisor.start(&key).await?;
//! assert!(supervisor.is_running(&key).await);
//! supervisor.stop(&key).await?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod error;
pub mod http;
pub mod key;
pub mod registry;
pub mod render;
pub mod sample;
pub mod sampler;
pub mod sink;
pub mod state;
pub mod supervisor;
pub mod telemetry;

pub use capture::{CaptureConfig, CaptureLoop, LoopExit, SessionCounters};
pub use error::{AcquireError, ReadError, RenderError, StoreError, SupervisorError};
pub use http::{router, AppState};
pub use key::{KeyError, SessionKey};
pub use registry::{Liveness, SessionRegistry};
pub use render::{renderer_for, Artifact, Renderer, SvgPlotRenderer, WavRenderer};
pub use sample::{RingBuffer, Sample};
pub use sampler::{
    factory_from_settings, AdcSampler, Sampler, SamplerFactory, SamplerGuard, SyntheticSampler,
};
pub use sink::{FileSink, MemorySink, SessionStatus, Sink, SinkCall};
pub use state::{InvalidTransition, SessionEvent, SessionState};
pub use supervisor::{
    SessionSnapshot, Started, StopPolicy, StopTier, Stopped, Supervisor, WorkerHandle,
};
