//! Supervisor: launches one capture worker per session and tears it down.
//!
//! Each worker is a tokio task behind a panic boundary. Stop escalates in
//! three tiers, each tried only if the previous did not observe exit:
//!
//! 1. cooperative: cancel token, checked between samples; wait up to T1
//! 2. forceful: second token, interrupts acquisition or sampling; wait up to T2
//! 3. unconditional: abort the task and wait for its exit guard to drop
//!
//! Liveness is a `watch` flag flipped by a guard the task owns, so "live"
//! means the task's future has not been dropped yet.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ecgconf::{EcgConfig, StopSettings};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureConfig, CaptureLoop, SessionShared};
use crate::error::SupervisorError;
use crate::key::SessionKey;
use crate::registry::{Liveness, SessionRegistry};
use crate::render::{renderer_for, Renderer};
use crate::sampler::{factory_from_settings, SamplerFactory};
use crate::sink::{SessionStatus, Sink};
use crate::state::{SessionEvent, SessionState};

#[derive(Debug, Clone, PartialEq)]
pub struct StopPolicy {
    /// T1: wait after cooperative cancellation.
    pub graceful_timeout: Duration,
    /// T2: wait after the forceful request.
    pub terminate_timeout: Duration,
    /// Bound on waiting for an abort to land. `None` waits indefinitely.
    pub kill_confirm_timeout: Option<Duration>,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(5),
            terminate_timeout: Duration::from_secs(2),
            kill_confirm_timeout: None,
        }
    }
}

impl StopPolicy {
    pub fn from_settings(settings: &StopSettings) -> Self {
        Self {
            graceful_timeout: Duration::from_millis(settings.graceful_timeout_ms),
            terminate_timeout: Duration::from_millis(settings.terminate_timeout_ms),
            kill_confirm_timeout: settings.kill_confirm_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Which escalation tier ended the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTier {
    /// The worker had already exited; the entry was only reaped.
    AlreadyExited,
    Graceful,
    Terminated,
    Killed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Started {
    pub key: SessionKey,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stopped {
    pub key: SessionKey,
    pub tier: StopTier,
    pub sample_count: u64,
    pub flush_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub key: SessionKey,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub sample_count: u64,
    pub flush_count: u64,
}

/// Flips the liveness flag when the worker's future is dropped, whether it
/// completed, panicked or was aborted.
struct ExitGuard {
    exited: watch::Sender<bool>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.exited.send_replace(true);
    }
}

/// Everything the task owns. Fields drop in order, so the sampler is
/// released before the exit flag flips.
struct WorkerUnit {
    capture: CaptureLoop,
    _exit: ExitGuard,
}

/// Owned by the registry. Removed only once its worker has exited.
pub struct WorkerHandle {
    key: SessionKey,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    force: CancellationToken,
    exited: watch::Receiver<bool>,
    abort: OnceLock<AbortHandle>,
    shared: Arc<SessionShared>,
}

impl Liveness for WorkerHandle {
    fn is_live(&self) -> bool {
        !*self.exited.borrow()
    }
}

impl WorkerHandle {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    async fn wait_exited(&self) {
        let mut exited = self.exited.clone();
        // Err means the sender is gone, which only happens after the guard dropped.
        let _ = exited.wait_for(|done| *done).await;
    }

    async fn exited_within(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait_exited()).await.is_ok()
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key.clone(),
            state: self.shared.state(),
            started_at: self.created_at,
            sample_count: self.shared.counters.sample_count(),
            flush_count: self.shared.counters.flush_count(),
        }
    }

    fn stopped(&self, tier: StopTier) -> Stopped {
        Stopped {
            key: self.key.clone(),
            tier,
            sample_count: self.shared.counters.sample_count(),
            flush_count: self.shared.counters.flush_count(),
        }
    }
}

pub struct Supervisor {
    registry: SessionRegistry<WorkerHandle>,
    samplers: Arc<dyn SamplerFactory>,
    renderer: Arc<dyn Renderer>,
    sink: Arc<dyn Sink>,
    capture: CaptureConfig,
    policy: StopPolicy,
}

impl Supervisor {
    pub fn new(
        samplers: Arc<dyn SamplerFactory>,
        renderer: Arc<dyn Renderer>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            samplers,
            renderer,
            sink,
            capture: CaptureConfig::default(),
            policy: StopPolicy::default(),
        }
    }

    /// Sampler, renderer, cadence and stop policy all taken from `config`.
    pub fn from_config(config: &EcgConfig, sink: Arc<dyn Sink>) -> Self {
        let rate = config.capture.sample_rate_hz;
        Self::new(
            factory_from_settings(&config.sampler, rate),
            renderer_for(
                config.capture.artifact_format,
                rate,
                config.sampler.reference_volts,
            ),
            sink,
        )
        .with_capture_config(CaptureConfig::from_settings(&config.capture))
        .with_stop_policy(StopPolicy::from_settings(&config.stop))
    }

    pub fn with_capture_config(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_stop_policy(mut self, policy: StopPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn capture_config(&self) -> &CaptureConfig {
        &self.capture
    }

    pub fn stop_policy(&self) -> &StopPolicy {
        &self.policy
    }

    /// Launch a worker for `key`. Returns without waiting for the first sample.
    pub async fn start(&self, key: &SessionKey) -> Result<Started, SupervisorError> {
        if let Some(existing) = self.registry.get(key) {
            if existing.is_live() {
                return Err(SupervisorError::AlreadyRunning(key.clone()));
            }
            self.reap(&existing).await;
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            SupervisorError::LaunchFailed {
                key: key.clone(),
                reason: e.to_string(),
            }
        })?;

        let cancel = CancellationToken::new();
        let force = CancellationToken::new();
        let capture = CaptureLoop::new(
            key.clone(),
            self.capture.clone(),
            self.samplers.create(key),
            Arc::clone(&self.renderer),
            Arc::clone(&self.sink),
            cancel.clone(),
            force.clone(),
        );
        let shared = capture.shared();
        let (exit_tx, exit_rx) = watch::channel(false);

        let handle = Arc::new(WorkerHandle {
            key: key.clone(),
            created_at: Utc::now(),
            cancel,
            force,
            exited: exit_rx,
            abort: OnceLock::new(),
            shared: Arc::clone(&shared),
        });

        if !self.registry.insert(key.clone(), Arc::clone(&handle)) {
            return Err(SupervisorError::AlreadyRunning(key.clone()));
        }
        shared.begin(key);

        let unit = WorkerUnit {
            capture,
            _exit: ExitGuard { exited: exit_tx },
        };
        let task = runtime.spawn(run_worker(unit, Arc::clone(&self.sink), shared));
        let _ = handle.abort.set(task.abort_handle());

        tracing::info!(session.key = %key, "Capture session launched");

        Ok(Started {
            key: key.clone(),
            created_at: handle.created_at,
        })
    }

    /// Stop the worker for `key`, escalating as needed, then drop its entry.
    pub async fn stop(&self, key: &SessionKey) -> Result<Stopped, SupervisorError> {
        let handle = self
            .registry
            .get(key)
            .ok_or_else(|| SupervisorError::NotFound(key.clone()))?;

        if !handle.is_live() {
            self.reap(&handle).await;
            return Ok(handle.stopped(StopTier::AlreadyExited));
        }

        handle.shared.apply(key, SessionEvent::StopRequested);
        tracing::info!(session.key = %key, "Stopping capture session");
        handle.cancel.cancel();

        let tier = if handle.exited_within(self.policy.graceful_timeout).await {
            StopTier::Graceful
        } else {
            tracing::warn!(
                session.key = %key,
                timeout_ms = self.policy.graceful_timeout.as_millis() as u64,
                "Worker ignored cancellation, forcing termination"
            );
            handle.force.cancel();

            if handle.exited_within(self.policy.terminate_timeout).await {
                StopTier::Terminated
            } else {
                tracing::error!(
                    session.key = %key,
                    timeout_ms = self.policy.terminate_timeout.as_millis() as u64,
                    "Worker ignored forced termination, aborting"
                );
                if let Some(abort) = handle.abort.get() {
                    abort.abort();
                }

                let confirmed = match self.policy.kill_confirm_timeout {
                    None => {
                        handle.wait_exited().await;
                        true
                    }
                    Some(limit) => handle.exited_within(limit).await,
                };

                if !confirmed {
                    let waited = self.policy.kill_confirm_timeout.unwrap_or_default();
                    tracing::error!(
                        session.key = %key,
                        waited_ms = waited.as_millis() as u64,
                        "Abort not confirmed, abandoning worker"
                    );
                    self.registry.remove_if_same(key, &handle);
                    if handle.shared.claim_terminal() {
                        self.record_error(key, "worker did not exit after abort").await;
                    }
                    return Err(SupervisorError::StopFailed {
                        key: key.clone(),
                        waited,
                    });
                }
                StopTier::Killed
            }
        };

        self.registry.remove_if_same(key, &handle);
        self.finalize_if_unwritten(&handle).await;
        handle.shared.apply(key, SessionEvent::Exited);

        let stopped = handle.stopped(tier);
        tracing::info!(
            session.key = %key,
            stop.tier = ?stopped.tier,
            session.samples = stopped.sample_count,
            session.flushes = stopped.flush_count,
            "Capture session stopped"
        );
        Ok(stopped)
    }

    /// Self-healing: a dead entry found here is reaped.
    pub async fn is_running(&self, key: &SessionKey) -> bool {
        match self.registry.get(key) {
            Some(handle) if handle.is_live() => true,
            Some(handle) => {
                self.reap(&handle).await;
                false
            }
            None => false,
        }
    }

    /// Stop every registered session. Returns how many were actually live.
    pub async fn cleanup_all(&self) -> usize {
        let keys = self.registry.keys();
        if keys.is_empty() {
            return 0;
        }

        let results = futures::future::join_all(keys.iter().map(|key| self.stop(key))).await;

        let mut stopped = 0;
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(s) if s.tier != StopTier::AlreadyExited => stopped += 1,
                Ok(_) | Err(SupervisorError::NotFound(_)) => {}
                Err(e) => tracing::error!(session.key = %key, error = %e, "Cleanup failed to stop session"),
            }
        }

        tracing::info!(sessions.cleaned = stopped, "Cleanup complete");
        stopped
    }

    /// Snapshot of live sessions. Dead entries found on the way are reaped.
    pub async fn sessions(&self) -> Vec<SessionSnapshot> {
        let mut live = Vec::new();
        for (_key, handle) in self.registry.entries() {
            if handle.is_live() {
                live.push(handle.snapshot());
            } else {
                self.reap(&handle).await;
            }
        }
        live
    }

    pub fn session(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        self.registry
            .get(key)
            .filter(|handle| handle.is_live())
            .map(|handle| handle.snapshot())
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        self.registry.keys()
    }

    async fn reap(&self, handle: &Arc<WorkerHandle>) {
        if self.registry.remove_if_same(&handle.key, handle) {
            tracing::debug!(session.key = %handle.key, "Reaped exited worker");
        }
        self.finalize_if_unwritten(handle).await;
        handle.shared.apply(&handle.key, SessionEvent::Exited);
    }

    /// Write the terminal record for a worker that could not write its own.
    async fn finalize_if_unwritten(&self, handle: &WorkerHandle) {
        if !handle.shared.claim_terminal() {
            return;
        }
        let flushes = handle.shared.counters.flush_count();
        tracing::warn!(session.key = %handle.key, "Worker exited without a terminal record, finalizing");
        if let Err(e) = self.sink.finalize_session(&handle.key, flushes).await {
            tracing::warn!(session.key = %handle.key, error = %e, "Failed to finalize session record");
        }
    }

    async fn record_error(&self, key: &SessionKey, message: &str) {
        if let Err(e) = self
            .sink
            .update_status(key, SessionStatus::Error, Some(message))
            .await
        {
            tracing::warn!(session.key = %key, error = %e, "Failed to record session error");
        }
    }
}

async fn run_worker(mut unit: WorkerUnit, sink: Arc<dyn Sink>, shared: Arc<SessionShared>) {
    let key = unit.capture.key().clone();

    match AssertUnwindSafe(unit.capture.run()).catch_unwind().await {
        Ok(exit) => tracing::debug!(session.key = %key, exit = ?exit, "Worker finished"),
        Err(panic) => {
            let message = panic_message(&*panic);
            tracing::error!(session.key = %key, panic = %message, "Capture worker panicked");
            shared.apply(&key, SessionEvent::Failed);
            let error = format!("worker panicked: {message}");
            if let Err(e) = sink
                .update_status(&key, SessionStatus::Error, Some(&error))
                .await
            {
                tracing::warn!(session.key = %key, error = %e, "Failed to record session error");
            }
            shared.mark_terminal_written();
        }
    }

    shared.apply(&key, SessionEvent::Exited);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
