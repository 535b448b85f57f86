//! Shared fixtures for ecggarden integration tests.
//!
//! `ScriptedSampler` produces monotonically increasing values (the call
//! index) and can be told to fail, hang, block its thread or panic.
//! `Tally` counts what the supervisor and loop did to it.

#![allow(dead_code)]

use std::future::pending;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ecggarden::{
    AcquireError, Artifact, MemorySink, ReadError, RenderError, Renderer, Sample, Sampler,
    SamplerFactory, SessionKey, SessionStatus, Sink, StoreError,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct Tally {
    pub opens: AtomicUsize,
    pub reads: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Tally {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct Script {
    /// Every Nth read fails.
    pub fail_every: Option<usize>,
    /// `open` fails.
    pub fail_open: bool,
    /// `open` never completes.
    pub hang_open: bool,
    /// Reads never complete.
    pub hang_reads: bool,
    /// Reads block the runtime thread for this long before returning.
    pub block_reads: Option<Duration>,
    /// Reads panic.
    pub panic_on_read: bool,
    /// Cancel this token once the Nth read returns.
    pub cancel_after: Option<(usize, CancellationToken)>,
}

pub struct ScriptedSampler {
    tally: Arc<Tally>,
    script: Script,
    opened_at: Option<Instant>,
}

impl ScriptedSampler {
    pub fn new(tally: Arc<Tally>, script: Script) -> Self {
        Self {
            tally,
            script,
            opened_at: None,
        }
    }

    pub fn boxed(tally: Arc<Tally>, script: Script) -> Box<dyn Sampler> {
        Box::new(Self::new(tally, script))
    }
}

#[async_trait]
impl Sampler for ScriptedSampler {
    async fn open(&mut self) -> Result<(), AcquireError> {
        self.tally.opens.fetch_add(1, Ordering::SeqCst);
        if self.script.hang_open {
            pending::<()>().await;
        }
        if self.script.fail_open {
            return Err(AcquireError::Unavailable("no device attached".to_string()));
        }
        self.opened_at = Some(Instant::now());
        Ok(())
    }

    async fn read_sample(&mut self) -> Result<Sample, ReadError> {
        if self.script.hang_reads {
            pending::<()>().await;
        }
        if let Some(block) = self.script.block_reads {
            std::thread::sleep(block);
        }
        if self.script.panic_on_read {
            panic!("sampler exploded");
        }

        let n = self.tally.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = &self.script.cancel_after {
            if n >= *limit {
                token.cancel();
            }
        }
        if let Some(every) = self.script.fail_every {
            if n % every == 0 {
                return Err(ReadError::Other(format!("glitch on read {n}")));
            }
        }

        let opened_at = self.opened_at.ok_or(ReadError::NotOpen)?;
        Ok(Sample::new(opened_at.elapsed().as_secs_f64(), n as f64))
    }

    fn close(&mut self) {
        self.tally.closes.fetch_add(1, Ordering::SeqCst);
        self.opened_at = None;
    }
}

/// Every session gets a sampler following `script`, all sharing `tally`.
pub fn scripted_factory(tally: Arc<Tally>, script: Script) -> Arc<dyn SamplerFactory> {
    Arc::new(move |_key: &SessionKey| -> Box<dyn Sampler> {
        ScriptedSampler::boxed(Arc::clone(&tally), script.clone())
    })
}

/// MemorySink whose first `finalize_session` never returns.
pub struct HangingSink {
    pub inner: Arc<MemorySink>,
    hang_next_finalize: AtomicBool,
}

impl HangingSink {
    pub fn new(inner: Arc<MemorySink>) -> Self {
        Self {
            inner,
            hang_next_finalize: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Sink for HangingSink {
    async fn init_session(&self, key: &SessionKey) -> Result<(), StoreError> {
        self.inner.init_session(key).await
    }

    async fn save_artifact(
        &self,
        key: &SessionKey,
        artifact: &Artifact,
        duration: Duration,
    ) -> Result<(), StoreError> {
        self.inner.save_artifact(key, artifact, duration).await
    }

    async fn update_status(
        &self,
        key: &SessionKey,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.update_status(key, status, error).await
    }

    async fn update_count(&self, key: &SessionKey, count: u64) -> Result<(), StoreError> {
        self.inner.update_count(key, count).await
    }

    async fn finalize_session(
        &self,
        key: &SessionKey,
        final_count: u64,
    ) -> Result<(), StoreError> {
        if self.hang_next_finalize.swap(false, Ordering::SeqCst) {
            pending::<()>().await;
        }
        self.inner.finalize_session(key, final_count).await
    }
}

/// Renderer that rejects every window.
pub struct FailingRenderer;

impl Renderer for FailingRenderer {
    fn render(
        &self,
        _window: &[Sample],
        _key: &SessionKey,
        _at: DateTime<Utc>,
    ) -> Result<Vec<u8>, RenderError> {
        Err(RenderError::Other("plot backend unavailable".to_string()))
    }

    fn mime_type(&self) -> &'static str {
        "image/svg+xml"
    }
}
