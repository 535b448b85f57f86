//! Supervisor control surface: start, stop escalation, reaping, cleanup.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{scripted_factory, HangingSink, Tally, Script};
use ecggarden::{
    MemorySink, SamplerFactory, SessionKey, SessionState, SessionStatus, Sink, StopPolicy,
    StopTier, Supervisor, SupervisorError, SvgPlotRenderer,
};
use tokio::time::Instant;

fn supervisor(samplers: Arc<dyn SamplerFactory>, sink: Arc<dyn Sink>) -> Supervisor {
    Supervisor::new(samplers, Arc::new(SvgPlotRenderer::new(3.3)), sink)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_reports_already_running() {
    let tally = Tally::new();
    let sup = supervisor(
        scripted_factory(tally.clone(), Script::default()),
        Arc::new(MemorySink::new()),
    );
    let key = SessionKey::from(42u32);

    sup.start(&key).await.unwrap();
    let second = sup.start(&key).await;

    assert!(matches!(second, Err(SupervisorError::AlreadyRunning(k)) if k == key));
    assert_eq!(sup.keys(), vec![key.clone()]);

    settle().await;
    assert_eq!(tally.opens(), 1, "only one worker was launched");
    sup.stop(&key).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_admit_one() {
    let sup = supervisor(
        scripted_factory(Tally::new(), Script::default()),
        Arc::new(MemorySink::new()),
    );
    let key = SessionKey::from(1u32);

    let results = futures::future::join_all((0..8).map(|_| sup.start(&key))).await;
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(SupervisorError::AlreadyRunning(_))))
        .count();

    assert_eq!(ok, 1);
    assert_eq!(rejected, 7);
    sup.cleanup_all().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_unknown_key_is_not_found() {
    let sup = supervisor(
        scripted_factory(Tally::new(), Script::default()),
        Arc::new(MemorySink::new()),
    );
    let running = SessionKey::from(1u32);
    sup.start(&running).await.unwrap();

    let result = sup.stop(&SessionKey::from(2u32)).await;

    assert!(matches!(result, Err(SupervisorError::NotFound(_))));
    assert_eq!(sup.keys(), vec![running.clone()]);
    assert!(sup.is_running(&running).await);
    sup.stop(&running).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop() {
    let tally = Tally::new();
    let sink = Arc::new(MemorySink::new());
    let sup = supervisor(scripted_factory(tally.clone(), Script::default()), sink.clone());
    let key = SessionKey::from(42u32);

    sup.start(&key).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sup.is_running(&key).await);

    let stopped = sup.stop(&key).await.unwrap();

    assert_eq!(stopped.tier, StopTier::Graceful);
    assert!(stopped.sample_count >= 99);
    assert!(!sup.is_running(&key).await);
    assert!(sup.keys().is_empty());
    assert_eq!(tally.closes(), 1);
    assert_eq!(sink.finalize_count(&key), 1);
    assert_eq!(sink.record(&key).unwrap().status, SessionStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_hung_read_escalates_to_terminate() {
    let tally = Tally::new();
    let sink = Arc::new(MemorySink::new());
    let script = Script {
        hang_reads: true,
        ..Script::default()
    };
    let sup = supervisor(scripted_factory(tally.clone(), script), sink.clone());
    let key = SessionKey::from(5u32);

    sup.start(&key).await.unwrap();
    settle().await;

    let before = Instant::now();
    let stopped = sup.stop(&key).await.unwrap();

    assert_eq!(stopped.tier, StopTier::Terminated);
    assert!(before.elapsed() >= Duration::from_secs(5));
    assert!(!sup.is_running(&key).await);
    assert_eq!(tally.closes(), 1);
    assert_eq!(sink.finalize_count(&key), 1, "worker wrote its own record");
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_worker_is_killed_and_finalized() {
    let tally = Tally::new();
    let memory = Arc::new(MemorySink::new());
    let sink = Arc::new(HangingSink::new(memory.clone()));
    let script = Script {
        hang_reads: true,
        ..Script::default()
    };
    let sup = supervisor(scripted_factory(tally.clone(), script), sink);
    let key = SessionKey::from(13u32);

    sup.start(&key).await.unwrap();
    settle().await;

    let before = Instant::now();
    let stopped = sup.stop(&key).await.unwrap();

    assert_eq!(stopped.tier, StopTier::Killed);
    assert!(before.elapsed() >= Duration::from_secs(7));
    assert!(sup.keys().is_empty());
    assert!(!sup.is_running(&key).await);
    assert_eq!(tally.closes(), 1);

    // The worker hung in its own finalize, so the supervisor wrote it.
    assert_eq!(memory.finalize_count(&key), 1);
    assert_eq!(memory.record(&key).unwrap().status, SessionStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_hung_open_escalates_to_terminate() {
    let tally = Tally::new();
    let sink = Arc::new(MemorySink::new());
    let script = Script {
        hang_open: true,
        ..Script::default()
    };
    let sup = supervisor(scripted_factory(tally.clone(), script), sink.clone());
    let key = SessionKey::from(15u32);

    sup.start(&key).await.unwrap();
    settle().await;

    let stopped = sup.stop(&key).await.unwrap();

    assert_eq!(stopped.tier, StopTier::Terminated);
    assert_eq!(stopped.sample_count, 0);
    assert!(sup.keys().is_empty());
    assert_eq!(tally.closes(), 1);
    assert_eq!(sink.finalize_count(&key), 1, "worker wrote its own record");
    assert_eq!(sink.record(&key).unwrap().status, SessionStatus::Stopped);
}

// A read that blocks its thread cannot be aborted, so this needs real
// worker threads and real time.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unkillable_worker_reports_stop_failed() {
    let sink = Arc::new(MemorySink::new());
    let script = Script {
        block_reads: Some(Duration::from_millis(1_500)),
        ..Script::default()
    };
    let sup = supervisor(scripted_factory(Tally::new(), script), sink.clone()).with_stop_policy(
        StopPolicy {
            graceful_timeout: Duration::from_millis(50),
            terminate_timeout: Duration::from_millis(50),
            kill_confirm_timeout: Some(Duration::from_millis(100)),
        },
    );
    let key = SessionKey::from(1u32);

    sup.start(&key).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = sup.stop(&key).await;

    match result {
        Err(SupervisorError::StopFailed { key: k, waited }) => {
            assert_eq!(k, key);
            assert_eq!(waited, Duration::from_millis(100));
        }
        other => panic!("expected StopFailed, got {other:?}"),
    }
    assert!(sup.keys().is_empty(), "abandoned worker keeps no entry");
    assert!(!sup.is_running(&key).await);

    let record = sink.record(&key).unwrap();
    assert_eq!(record.status, SessionStatus::Error);
    assert_eq!(
        record.last_error.as_deref(),
        Some("worker did not exit after abort")
    );
}

#[tokio::test(start_paused = true)]
async fn test_dead_worker_is_reaped_by_is_running() {
    let sink = Arc::new(MemorySink::new());
    let script = Script {
        fail_open: true,
        ..Script::default()
    };
    let sup = supervisor(scripted_factory(Tally::new(), script), sink.clone());
    let key = SessionKey::from(8u32);

    sup.start(&key).await.unwrap();
    settle().await;

    assert_eq!(sup.keys(), vec![key.clone()], "stale entry until someone looks");
    assert!(!sup.is_running(&key).await);
    assert!(sup.keys().is_empty());

    let record = sink.record(&key).unwrap();
    assert_eq!(record.status, SessionStatus::Error);
    assert_eq!(sink.finalize_count(&key), 0, "error record is not overwritten");
}

#[tokio::test(start_paused = true)]
async fn test_stop_on_dead_worker_succeeds_after_reap() {
    let script = Script {
        fail_open: true,
        ..Script::default()
    };
    let sup = supervisor(scripted_factory(Tally::new(), script), Arc::new(MemorySink::new()));
    let key = SessionKey::from(8u32);

    sup.start(&key).await.unwrap();
    settle().await;

    let stopped = sup.stop(&key).await.unwrap();
    assert_eq!(stopped.tier, StopTier::AlreadyExited);
    assert!(sup.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_all_counts_only_live_sessions() {
    let tally = Tally::new();
    let sink = Arc::new(MemorySink::new());
    let healthy = scripted_factory(tally.clone(), Script::default());
    let broken = scripted_factory(
        Tally::new(),
        Script {
            fail_open: true,
            ..Script::default()
        },
    );
    let stale = SessionKey::from(99u32);
    let stale_key = stale.clone();
    let samplers: Arc<dyn SamplerFactory> = Arc::new(move |key: &SessionKey| {
        if *key == stale_key {
            broken.create(key)
        } else {
            healthy.create(key)
        }
    });
    let sup = supervisor(samplers, sink.clone());

    for id in 1..=3u32 {
        sup.start(&SessionKey::from(id)).await.unwrap();
    }
    sup.start(&stale).await.unwrap();
    settle().await;
    assert_eq!(sup.keys().len(), 4);

    let cleaned = sup.cleanup_all().await;

    assert_eq!(cleaned, 3);
    assert!(sup.keys().is_empty());
    assert_eq!(tally.closes(), 3);
    for id in 1..=3u32 {
        assert_eq!(sink.finalize_count(&SessionKey::from(id)), 1);
    }
    assert_eq!(sink.record(&stale).unwrap().status, SessionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_worker_panic_is_contained() {
    let sink = Arc::new(MemorySink::new());
    let panicking = SessionKey::from(66u32);
    let panicking_key = panicking.clone();
    let bad = scripted_factory(
        Tally::new(),
        Script {
            panic_on_read: true,
            ..Script::default()
        },
    );
    let good = scripted_factory(Tally::new(), Script::default());
    let samplers: Arc<dyn SamplerFactory> = Arc::new(move |key: &SessionKey| {
        if *key == panicking_key {
            bad.create(key)
        } else {
            good.create(key)
        }
    });
    let sup = supervisor(samplers, sink.clone());
    let healthy = SessionKey::from(1u32);

    sup.start(&healthy).await.unwrap();
    sup.start(&panicking).await.unwrap();
    settle().await;

    assert!(!sup.is_running(&panicking).await);
    assert!(sup.is_running(&healthy).await);

    let record = sink.record(&panicking).unwrap();
    assert_eq!(record.status, SessionStatus::Error);
    assert!(record.last_error.unwrap().contains("sampler exploded"));

    sup.stop(&healthy).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let tally = Tally::new();
    let sink = Arc::new(MemorySink::new());
    let sup = supervisor(scripted_factory(tally.clone(), Script::default()), sink.clone());
    let key = SessionKey::from(4u32);

    sup.start(&key).await.unwrap();
    settle().await;
    sup.stop(&key).await.unwrap();

    sup.start(&key).await.unwrap();
    settle().await;
    assert!(sup.is_running(&key).await);
    assert_eq!(tally.opens(), 2);
    assert_eq!(sink.record(&key).unwrap().status, SessionStatus::Running);

    sup.stop(&key).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sessions_snapshot() {
    let sup = supervisor(
        scripted_factory(Tally::new(), Script::default()),
        Arc::new(MemorySink::new()),
    );
    let a = SessionKey::from(1u32);
    let b = SessionKey::from(2u32);

    let started = sup.start(&a).await.unwrap();
    sup.start(&b).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let sessions = sup.sessions().await;
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].key, a);
    assert_eq!(sessions[0].started_at, started.created_at);
    assert!(sessions.iter().all(|s| s.state == SessionState::Running));
    assert!(sessions.iter().all(|s| s.sample_count > 0));

    assert_eq!(sup.cleanup_all().await, 2);
    assert!(sup.sessions().await.is_empty());
}
