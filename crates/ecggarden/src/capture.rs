//! The per-session capture loop.
//!
//! Samples at a fixed period into a bounded ring buffer and, whenever the
//! flush interval has elapsed, renders the buffer and hands the artifact to
//! the sink. Read, render and persist faults are logged and skipped; only a
//! failure to acquire the sampler ends the session early.
//!
//! Two signals end the loop. `cancel` is checked at the top of every
//! iteration. `force` is raced against acquisition and the whole sampling
//! phase, so it also interrupts an open, read or sleep that never returns. Both paths release the
//! sampler and write the terminal session record before returning.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use ecgconf::CaptureSettings;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AcquireError;
use crate::key::SessionKey;
use crate::render::{Artifact, Renderer};
use crate::sample::{RingBuffer, Sample};
use crate::sampler::{Sampler, SamplerGuard};
use crate::sink::{SessionStatus, Sink};
use crate::state::{SessionEvent, SessionState};

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub sample_rate_hz: u32,
    pub flush_interval: Duration,
    pub buffer_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 100,
            flush_interval: Duration::from_secs(5),
            buffer_capacity: 500,
        }
    }
}

impl CaptureConfig {
    pub fn from_settings(settings: &CaptureSettings) -> Self {
        Self {
            sample_rate_hz: settings.sample_rate_hz,
            flush_interval: settings.flush_interval(),
            buffer_capacity: settings.buffer_capacity,
        }
    }

    /// Pause between reads. Drift from slow reads is not compensated.
    pub fn sample_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.sample_rate_hz.max(1)))
    }
}

/// Written only by the owning loop; the supervisor reads them for reporting.
#[derive(Debug, Default)]
pub struct SessionCounters {
    samples: AtomicU64,
    flushes: AtomicU64,
}

impl SessionCounters {
    pub fn sample_count(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    fn record_sample(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    fn record_flush(&self) -> u64 {
        self.flushes.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// State a worker shares with the handle that supervises it.
#[derive(Debug)]
pub(crate) struct SessionShared {
    pub(crate) counters: SessionCounters,
    state: Mutex<SessionState>,
    terminal_written: AtomicBool,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self {
            counters: SessionCounters::default(),
            state: Mutex::new(SessionState::Idle),
            terminal_written: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move an idle session to running. Later states are left alone.
    pub(crate) fn begin(&self, key: &SessionKey) {
        if self.state() == SessionState::Idle {
            self.apply(key, SessionEvent::Started);
        }
    }

    /// Apply `event`, keeping the current state if the transition is invalid.
    pub(crate) fn apply(&self, key: &SessionKey, event: SessionEvent) -> SessionState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.transition(event) {
            Ok(next) => {
                let from = *state;
                if next != from {
                    tracing::debug!(session.key = %key, from = %from, to = %next, "Session transition");
                }
                *state = next;
            }
            Err(e) => tracing::debug!(session.key = %key, error = %e, "Ignored session event"),
        }
        *state
    }

    /// Set by the worker once its own terminal write has returned.
    pub(crate) fn mark_terminal_written(&self) {
        self.terminal_written.store(true, Ordering::SeqCst);
    }

    /// For use after the worker is gone: true if the caller should write
    /// the terminal record because the worker never did.
    pub(crate) fn claim_terminal(&self) -> bool {
        !self.terminal_written.swap(true, Ordering::SeqCst)
    }
}

/// Why a capture loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Cooperative cancellation observed at the top of an iteration.
    Cancelled,
    /// The forceful termination signal cut acquisition or sampling short.
    Interrupted,
    /// The sampler could not be opened; nothing was sampled.
    AcquireFailed,
}

pub struct CaptureLoop {
    key: SessionKey,
    config: CaptureConfig,
    sampler: SamplerGuard,
    renderer: Arc<dyn Renderer>,
    sink: Arc<dyn Sink>,
    cancel: CancellationToken,
    force: CancellationToken,
    shared: Arc<SessionShared>,
    buffer: RingBuffer<Sample>,
    read_failures: u64,
}

impl CaptureLoop {
    pub fn new(
        key: SessionKey,
        config: CaptureConfig,
        sampler: Box<dyn Sampler>,
        renderer: Arc<dyn Renderer>,
        sink: Arc<dyn Sink>,
        cancel: CancellationToken,
        force: CancellationToken,
    ) -> Self {
        let buffer = RingBuffer::with_capacity(config.buffer_capacity);
        Self {
            key,
            config,
            sampler: SamplerGuard::new(sampler),
            renderer,
            sink,
            cancel,
            force,
            shared: Arc::new(SessionShared::new()),
            buffer,
            read_failures: 0,
        }
    }

    pub(crate) fn shared(&self) -> Arc<SessionShared> {
        Arc::clone(&self.shared)
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.shared.counters
    }

    pub fn buffer(&self) -> &RingBuffer<Sample> {
        &self.buffer
    }

    pub fn read_failures(&self) -> u64 {
        self.read_failures
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Run until cancelled, interrupted or the sampler cannot be acquired.
    pub async fn run(&mut self) -> LoopExit {
        let key = self.key.clone();
        self.shared.begin(&key);

        let force = self.force.clone();
        let phase = tokio::select! {
            biased;
            _ = force.cancelled() => None,
            phase = self.acquire_and_sample() => Some(phase),
        };

        self.sampler.close();

        let exit = match phase {
            Some(Ok(())) => LoopExit::Cancelled,
            None => {
                tracing::warn!(session.key = %key, "Capture interrupted by forced termination");
                LoopExit::Interrupted
            }
            Some(Err(e)) => {
                tracing::error!(session.key = %key, error = %e, "Sampler acquisition failed");
                self.shared.apply(&key, SessionEvent::Failed);
                let message = e.to_string();
                if let Err(e) = self
                    .sink
                    .update_status(&key, SessionStatus::Error, Some(&message))
                    .await
                {
                    tracing::warn!(session.key = %key, error = %e, "Failed to record session error");
                }
                self.shared.mark_terminal_written();
                return LoopExit::AcquireFailed;
            }
        };

        let samples = self.shared.counters.sample_count();
        let flushes = self.shared.counters.flush_count();
        if let Err(e) = self.sink.finalize_session(&key, flushes).await {
            tracing::warn!(session.key = %key, error = %e, "Failed to finalize session record");
        }
        self.shared.mark_terminal_written();

        tracing::info!(
            session.key = %key,
            session.samples = samples,
            session.flushes = flushes,
            session.read_failures = self.read_failures,
            "Capture stopped"
        );
        exit
    }

    /// Everything `force` can cut short: acquisition, session init and sampling.
    async fn acquire_and_sample(&mut self) -> Result<(), AcquireError> {
        self.sampler.open().await?;

        if let Err(e) = self.sink.init_session(&self.key).await {
            tracing::warn!(session.key = %self.key, error = %e, "Failed to initialize session record");
        }

        tracing::info!(
            session.key = %self.key,
            capture.rate_hz = self.config.sample_rate_hz,
            capture.flush_ms = self.config.flush_interval.as_millis() as u64,
            "Capture started"
        );

        self.sample_until_cancelled().await;
        Ok(())
    }

    async fn sample_until_cancelled(&mut self) {
        let period = self.config.sample_period();
        let mut last_flush = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.sampler.read().await {
                Ok(sample) => {
                    self.buffer.push(sample);
                    self.shared.counters.record_sample();
                }
                Err(e) => {
                    self.read_failures += 1;
                    tracing::warn!(session.key = %self.key, error = %e, "Sample read failed");
                }
            }

            let elapsed = last_flush.elapsed();
            if elapsed >= self.config.flush_interval {
                if !self.buffer.is_empty() {
                    self.flush(elapsed).await;
                }
                last_flush = Instant::now();
            }

            tokio::time::sleep(period).await;
        }
    }

    async fn flush(&mut self, window: Duration) {
        let snapshot = self.buffer.snapshot();
        let now = Utc::now();

        let bytes = match self.renderer.render(&snapshot, &self.key, now) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(session.key = %self.key, error = %e, "Render failed, window skipped");
                return;
            }
        };

        let artifact = Artifact {
            bytes,
            mime_type: self.renderer.mime_type(),
            created_at: now,
        };

        if let Err(e) = self.sink.save_artifact(&self.key, &artifact, window).await {
            tracing::warn!(session.key = %self.key, error = %e, "Artifact save failed, window skipped");
            return;
        }

        let flushes = self.shared.counters.record_flush();
        tracing::info!(
            session.key = %self.key,
            session.flushes = flushes,
            artifact.samples = snapshot.len(),
            artifact.size = artifact.bytes.len(),
            "Flush saved"
        );

        if let Err(e) = self.sink.update_count(&self.key, flushes).await {
            tracing::warn!(session.key = %self.key, error = %e, "Failed to update artifact count");
        }
    }
}
