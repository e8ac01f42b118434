//! Ledger conformance suite, run against every backend.

#![cfg(all(feature = "memory", feature = "sqlite"))]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio_stream::StreamExt;

use ledger_queue::{
    Dispatcher, JobError, JobEvent, JobRegistry, LeaseReaper, LedgerBackend, MemoryBackend,
    NewJob, PollOutcome, QueueConfig, SqliteBackend, Worker,
};

const LEASE: Duration = Duration::from_secs(60);

fn mail_payload() -> Vec<u8> {
    br#"{"uuid":"3f1c","job":"send_mail","data":{"to":"reader@example.org"}}"#.to_vec()
}

fn stale() -> chrono::DateTime<Utc> {
    Utc::now() - chrono::Duration::minutes(10)
}

async fn sqlite_backend() -> SqliteBackend {
    let path = std::env::temp_dir().join(format!("ledger-queue-{}.db", uuid::Uuid::new_v4()));
    let backend = SqliteBackend::connect(&format!("sqlite://{}", path.display()))
        .await
        .unwrap();
    backend.migrate().await.unwrap();
    backend
}

fn test_config() -> QueueConfig {
    QueueConfig {
        base_delay: Duration::ZERO,
        idle_poll_interval: Duration::from_millis(10),
        reaper_interval: Duration::from_secs(1),
        ..QueueConfig::default()
    }
}

/// Registry with one always-succeeding and one always-retryable handler
fn counting_registry(calls: &Arc<AtomicU32>) -> Arc<JobRegistry<()>> {
    let mut registry = JobRegistry::new();

    let ok_calls = calls.clone();
    registry
        .register_fn("send_mail", move |_, _| {
            let calls = ok_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

    let failing_calls = calls.clone();
    registry
        .register_fn("smtp_down", move |_, _| {
            let calls = failing_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(JobError::retryable("connection refused"))
            }
        })
        .unwrap();

    let flaky_calls = calls.clone();
    registry
        .register_fn("flaky_mail", move |_, _| {
            let calls = flaky_calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(JobError::retryable("greylisted"))
                } else {
                    Ok(())
                }
            }
        })
        .unwrap();

    Arc::new(registry)
}

/// N concurrent claims against one eligible job: exactly one wins
async fn single_winner_under_concurrent_claims<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let job_id = backend.insert(NewJob::new("mail", mail_payload())).await.unwrap();

    let now = Utc::now();
    let claims: Vec<_> = (0..16)
        .map(|_| {
            let backend = backend.clone();
            tokio::spawn(async move { backend.claim_next("mail", now, LEASE).await.unwrap() })
        })
        .collect();

    let mut winners = Vec::new();
    for claim in claims {
        if let Some(record) = claim.await.unwrap() {
            winners.push(record);
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, job_id);
    assert_eq!(winners[0].attempts, 1);
}

/// Concurrent claimers drain a queue without handing any job out twice
async fn every_job_claimed_exactly_once<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let mut expected = HashSet::new();
    for _ in 0..40 {
        expected.insert(backend.insert(NewJob::new("mail", mail_payload())).await.unwrap());
    }

    let claimers: Vec<_> = (0..8)
        .map(|_| {
            let backend = backend.clone();
            tokio::spawn(async move {
                let mut mine = Vec::new();
                let mut empty_polls = 0;
                while empty_polls < 3 {
                    match backend.claim_next("mail", Utc::now(), LEASE).await.unwrap() {
                        Some(record) => {
                            empty_polls = 0;
                            mine.push(record.id);
                        }
                        None => empty_polls += 1,
                    }
                }
                mine
            })
        })
        .collect();

    let mut claimed = Vec::new();
    for claimer in claimers {
        claimed.extend(claimer.await.unwrap());
    }

    let unique: HashSet<_> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), unique.len(), "a job was claimed twice");
    assert_eq!(unique, expected);
}

/// Always-succeeding handler: row deleted, failed store untouched
async fn success_deletes_the_row<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let calls = Arc::new(AtomicU32::new(0));
    let dispatcher = Dispatcher::new(backend.clone());
    let worker = Worker::new(backend.clone(), counting_registry(&calls), (), test_config()).unwrap();

    let id = dispatcher.enqueue("default", "send_mail", &serde_json::json!({}), None).await.unwrap();

    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Completed(id));
    assert!(backend.get(id).await.unwrap().is_none());
    assert!(backend.failed_jobs(10).await.unwrap().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Always-retryable handler: attempts reach the ceiling, then exactly one failed record
async fn retries_exhaust_into_one_failed_record<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let calls = Arc::new(AtomicU32::new(0));
    let dispatcher = Dispatcher::new(backend.clone());
    let config = QueueConfig { max_attempts: 4, ..test_config() };
    let worker = Worker::new(backend.clone(), counting_registry(&calls), (), config).unwrap();

    let id = dispatcher.enqueue("default", "smtp_down", &serde_json::json!({}), None).await.unwrap();

    assert_eq!(worker.run_until_idle().await.unwrap(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(backend.get(id).await.unwrap().is_none());
    assert_eq!(backend.size("default").await.unwrap(), 0);

    let failed = backend.failed_jobs(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].job_id, id);
    assert_eq!(failed[0].attempts, 4);
    assert!(failed[0].error.contains("connection refused"));
}

/// Release then claim after `available_at`: same job, one more attempt
async fn release_then_reclaim_same_job<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let id = backend.insert(NewJob::new("mail", mail_payload())).await.unwrap();
    let first = backend.claim_next("mail", Utc::now(), LEASE).await.unwrap().unwrap();

    let retry_at = Utc::now() + chrono::Duration::seconds(30);
    assert!(backend.release(&first, retry_at).await.unwrap());

    let released = backend.get(id).await.unwrap().unwrap();
    assert!(released.reserved_at.is_none());
    assert_eq!(released.attempts, first.attempts);

    assert!(backend.claim_next("mail", Utc::now(), LEASE).await.unwrap().is_none());

    let later = retry_at + chrono::Duration::seconds(1);
    let second = backend.claim_next("mail", later, LEASE).await.unwrap().unwrap();
    assert_eq!(second.id, id);
    assert_eq!(second.attempts, first.attempts + 1);
}

/// Expired reservation is reclaimed without touching attempts
async fn reclaim_keeps_attempt_count<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let id = backend
        .insert(NewJob::new("mail", mail_payload()).with_available_at(stale()))
        .await
        .unwrap();
    let held = backend.claim_next("mail", stale(), LEASE).await.unwrap().unwrap();
    assert_eq!(held.attempts, 1);

    // A fresh reservation is not touched
    let fresh = backend.insert(NewJob::new("newsletters", mail_payload())).await.unwrap();
    backend.claim_next("newsletters", Utc::now(), LEASE).await.unwrap().unwrap();

    assert_eq!(backend.reclaim_expired(LEASE, Utc::now()).await.unwrap(), 1);

    let record = backend.get(id).await.unwrap().unwrap();
    assert!(record.reserved_at.is_none());
    assert_eq!(record.attempts, 1);
    assert!(backend.get(fresh).await.unwrap().unwrap().reserved_at.is_some());
}

/// Delayed job is invisible until `now + delay`
async fn delayed_job_waits<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let dispatcher = Dispatcher::new(backend.clone());
    let delay = Duration::from_secs(300);

    let id = dispatcher
        .enqueue("mail", "send_mail", &serde_json::json!({}), Some(delay))
        .await
        .unwrap();

    assert!(backend.claim_next("mail", Utc::now(), LEASE).await.unwrap().is_none());

    let almost = Utc::now() + chrono::Duration::seconds(290);
    assert!(backend.claim_next("mail", almost, LEASE).await.unwrap().is_none());

    let after = Utc::now() + chrono::Duration::seconds(301);
    assert_eq!(backend.claim_next("mail", after, LEASE).await.unwrap().unwrap().id, id);
}

/// Jobs of one queue come out in enqueue order
async fn claims_are_fifo<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(backend.insert(NewJob::new("mail", mail_payload())).await.unwrap());
    }
    backend.insert(NewJob::new("newsletters", mail_payload())).await.unwrap();

    let mut claimed = Vec::new();
    while let Some(record) = backend.claim_next("mail", Utc::now(), LEASE).await.unwrap() {
        claimed.push(record.id);
    }

    assert_eq!(claimed, ids);
    assert_eq!(backend.size("newsletters").await.unwrap(), 1);
}

/// Fails once, is released with backoff, then succeeds on the second claim
async fn mail_job_recovers_after_one_failure<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let calls = Arc::new(AtomicU32::new(0));
    let dispatcher = Dispatcher::new(backend.clone());
    let config = QueueConfig { base_delay: Duration::from_millis(40), ..test_config() };
    let worker = Worker::new(backend.clone(), counting_registry(&calls), (), config)
        .unwrap()
        .with_observability(dispatcher.observability().clone());

    let mut events = Box::pin(dispatcher.observability().event_stream());
    let id = dispatcher
        .enqueue("default", "flaky_mail", &serde_json::json!({ "to": "reader@example.org" }), None)
        .await
        .unwrap();

    let outcome = worker.poll_once().await.unwrap();
    assert!(matches!(outcome, PollOutcome::Released { job_id, .. } if job_id == id));
    assert_eq!(backend.get(id).await.unwrap().unwrap().attempts, 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Completed(id));
    assert_eq!(backend.size("default").await.unwrap(), 0);

    let mut names = Vec::new();
    for _ in 0..5 {
        let event: JobEvent = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .expect("Timeout waiting for event")
            .expect("Stream ended");
        names.push(event.event_name());
    }
    assert_eq!(names, vec!["enqueued", "claimed", "released", "claimed", "completed"]);
}

/// Operator surface: inspect, retry, forget and flush failed jobs, clear a queue
async fn operator_commands<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let mut failed_ids = Vec::new();
    for reason in ["bounced", "blocked", "spam"] {
        let id = backend.insert(NewJob::new("mail", mail_payload())).await.unwrap();
        let claim = backend.claim_next("mail", Utc::now(), LEASE).await.unwrap().unwrap();
        assert!(backend.mark_failed_permanently(&claim, reason).await.unwrap());
        failed_ids.push(id);
    }

    let failed = backend.failed_jobs(10).await.unwrap();
    assert_eq!(failed.iter().map(|f| f.error.as_str()).collect::<Vec<_>>(), vec!["spam", "blocked", "bounced"]);
    assert_eq!(backend.failed_jobs(1).await.unwrap().len(), 1);
    assert!(failed.iter().all(|f| f.uuid.as_deref() == Some("3f1c")));

    let retried = backend.retry_failed(failed[0].id).await.unwrap().unwrap();
    assert!(!failed_ids.contains(&retried));
    let fresh = backend.get(retried).await.unwrap().unwrap();
    assert_eq!(fresh.attempts, 0);
    assert_eq!(fresh.payload, mail_payload());
    assert!(backend.retry_failed(failed[0].id).await.unwrap().is_none());

    assert!(backend.forget_failed(failed[1].id).await.unwrap());
    assert!(!backend.forget_failed(failed[1].id).await.unwrap());
    assert_eq!(backend.flush_failed().await.unwrap(), 1);
    assert!(backend.failed_jobs(10).await.unwrap().is_empty());

    backend.insert(NewJob::new("mail", mail_payload())).await.unwrap();
    assert_eq!(backend.size("mail").await.unwrap(), 2);
    assert_eq!(backend.clear("mail").await.unwrap(), 2);
    assert_eq!(backend.size("mail").await.unwrap(), 0);
}

/// Resolution calls on a vanished row report `false` instead of failing
async fn resolving_missing_rows<B: LedgerBackend + 'static>(backend: Arc<B>) {
    backend.insert(NewJob::new("mail", mail_payload())).await.unwrap();
    let claim = backend.claim_next("mail", Utc::now(), LEASE).await.unwrap().unwrap();
    assert!(backend.mark_succeeded(&claim).await.unwrap());

    assert!(!backend.mark_succeeded(&claim).await.unwrap());
    assert!(!backend.release(&claim, Utc::now()).await.unwrap());
    assert!(!backend.mark_failed_permanently(&claim, "gone").await.unwrap());
    assert!(backend.failed_jobs(10).await.unwrap().is_empty());
}

/// A worker whose lease expired cannot resolve the row under the next claim
async fn expired_claim_cannot_resolve_new_claim<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let id = backend
        .insert(NewJob::new("mail", mail_payload()).with_available_at(stale()))
        .await
        .unwrap();
    let expired = backend.claim_next("mail", stale(), LEASE).await.unwrap().unwrap();
    let current = backend.claim_next("mail", Utc::now(), LEASE).await.unwrap().unwrap();
    assert_eq!(current.id, id);
    assert_eq!(current.attempts, 2);

    assert!(!backend.mark_succeeded(&expired).await.unwrap());
    assert!(!backend.release(&expired, Utc::now()).await.unwrap());
    assert!(!backend.mark_failed_permanently(&expired, "late").await.unwrap());

    let record = backend.get(id).await.unwrap().unwrap();
    assert_eq!(record.reserved_at, current.reserved_at);
    assert!(backend.failed_jobs(10).await.unwrap().is_empty());

    // Once the reaper frees the row the expired claim still cannot touch it
    let later = Utc::now() + chrono::Duration::seconds(LEASE.as_secs() as i64 + 1);
    assert_eq!(backend.reclaim_expired(LEASE, later).await.unwrap(), 1);
    assert!(!backend.mark_succeeded(&current).await.unwrap());
    assert_eq!(backend.size("mail").await.unwrap(), 1);
}

/// Workers resolving many claims at once: every transition lands
async fn concurrent_resolutions_all_land<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let mut claims = Vec::new();
    for _ in 0..60 {
        backend.insert(NewJob::new("mail", mail_payload())).await.unwrap();
    }
    while let Some(claim) = backend.claim_next("mail", Utc::now(), LEASE).await.unwrap() {
        claims.push(claim);
    }
    assert_eq!(claims.len(), 60);

    let tasks: Vec<_> = claims
        .into_iter()
        .enumerate()
        .map(|(i, claim)| {
            let backend = backend.clone();
            tokio::spawn(async move {
                let resolved = match i % 3 {
                    0 => backend.mark_succeeded(&claim).await,
                    1 => backend.release(&claim, Utc::now()).await,
                    _ => backend.mark_failed_permanently(&claim, "mailbox full").await,
                };
                (claim.id, i % 3, resolved)
            })
        })
        .collect();

    let mut released = Vec::new();
    for task in tasks {
        let (id, kind, resolved) = task.await.unwrap();
        assert!(matches!(resolved, Ok(true)), "job {id} was not resolved: {resolved:?}");
        if kind == 1 {
            released.push(id);
        }
    }

    assert_eq!(backend.size("mail").await.unwrap(), 20);
    assert_eq!(backend.failed_jobs(100).await.unwrap().len(), 20);
    for id in released {
        assert!(backend.get(id).await.unwrap().unwrap().reserved_at.is_none());
    }
}

/// Two workers and a reaper under a validated config: a job never runs twice at once
async fn lease_outlasts_every_execution<B: LedgerBackend + 'static>(backend: Arc<B>) {
    let unsafe_config = QueueConfig {
        lease_duration: Duration::from_millis(400),
        reaper_interval: Duration::from_millis(50),
        job_timeout: Duration::from_secs(2),
        max_attempts: 2,
        ..test_config()
    };
    assert!(unsafe_config.validate().is_err());
    let config = QueueConfig { job_timeout: Duration::from_millis(250), ..unsafe_config };

    let running = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));
    let executions = Arc::new(AtomicU32::new(0));

    let mut registry: JobRegistry<()> = JobRegistry::new();
    registry
        .register_fn("slow_newsletter", {
            let (running, peak, executions) = (running.clone(), peak.clone(), executions.clone());
            move |_, _| {
                let (running, peak, executions) = (running.clone(), peak.clone(), executions.clone());
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    let _guard = Running::enter(running, &peak);
                    tokio::time::sleep(Duration::from_millis(600)).await;
                    Ok(())
                }
            }
        })
        .unwrap();
    let registry = Arc::new(registry);

    let id = Dispatcher::new(backend.clone())
        .enqueue("default", "slow_newsletter", &serde_json::json!({}), None)
        .await
        .unwrap();

    let workers: Vec<_> = (0..2)
        .map(|_| Worker::new(backend.clone(), registry.clone(), (), config.clone()).unwrap().spawn())
        .collect();
    let reaper = LeaseReaper::new(backend.clone(), &config).unwrap().spawn();

    for _ in 0..100 {
        if !backend.failed_jobs(1).await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for worker in workers {
        worker.shutdown().await.unwrap();
    }
    reaper.shutdown().await.unwrap();

    let failed = backend.failed_jobs(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].job_id, id);
    assert!(failed[0].error.contains("timed out"));
    assert_eq!(executions.load(Ordering::SeqCst), 2);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

/// Counts a handler as running until it returns or is aborted
struct Running(Arc<AtomicU32>);

impl Running {
    fn enter(running: Arc<AtomicU32>, peak: &AtomicU32) -> Self {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(running)
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

macro_rules! conformance {
    ($($name:ident),* $(,)?) => {
        mod memory {
            use super::*;
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $name() {
                    super::$name(Arc::new(MemoryBackend::new())).await;
                }
            )*
        }

        mod sqlite {
            use super::*;
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $name() {
                    super::$name(Arc::new(sqlite_backend().await)).await;
                }
            )*
        }
    };
}

conformance!(
    single_winner_under_concurrent_claims,
    every_job_claimed_exactly_once,
    success_deletes_the_row,
    retries_exhaust_into_one_failed_record,
    release_then_reclaim_same_job,
    reclaim_keeps_attempt_count,
    delayed_job_waits,
    claims_are_fifo,
    mail_job_recovers_after_one_failure,
    operator_commands,
    resolving_missing_rows,
    expired_claim_cannot_resolve_new_claim,
    concurrent_resolutions_all_land,
    lease_outlasts_every_execution,
);
