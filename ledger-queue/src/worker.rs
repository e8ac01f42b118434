use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn, error, debug, instrument};

use crate::{
    QueueResult, QueueError, JobError, JobId, JobRecord,
    backend::LedgerBackend,
    codec::{Envelope, JobCodec, json::JsonCodec},
    config::QueueConfig,
    job::{JobRegistry, BoxJobFuture},
    observability::ObservabilityLayer,
    types::time,
};

/// Exponential retry backoff: `min(base * 2^(attempts-1), max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Equal jitter: keep half the delay, randomize the other half
    pub jitter: bool,
}

impl Backoff {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            base: config.base_delay,
            max: config.max_delay,
            jitter: config.backoff_jitter,
        }
    }

    /// Deterministic delay after the given number of attempts
    pub fn ceiling(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// Delay to apply after the given number of attempts
    pub fn delay(&self, attempts: u32) -> Duration {
        let ceiling = self.ceiling(attempts);
        if !self.jitter {
            return ceiling;
        }

        let half = ceiling / 2;
        half + (ceiling - half).mul_f64(rand::thread_rng().gen::<f64>())
    }
}

/// Result of a single poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing claimable on any queue
    Idle,
    /// Handler succeeded and the row was deleted
    Completed(JobId),
    /// Handler failed and the job was released for another attempt
    Released { job_id: JobId, available_at: DateTime<Utc> },
    /// Job moved to the failed store
    Failed(JobId),
}

impl PollOutcome {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Idle => None,
            Self::Completed(id) | Self::Failed(id) | Self::Released { job_id: id, .. } => Some(*id),
        }
    }
}

/// Handle for managing worker lifecycle
pub struct WorkerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<QueueResult<u64>>,
}

impl WorkerHandle {
    /// Stop polling once the in-flight job is resolved. Returns the number of
    /// jobs the worker processed.
    pub async fn shutdown(self) -> QueueResult<u64> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))?
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

/// Polls the configured queues in priority order and resolves each claimed job
pub struct Worker<B: LedgerBackend + ?Sized, C> {
    backend: Arc<B>,
    registry: Arc<JobRegistry<C>>,
    context: C,
    codec: Arc<dyn JobCodec>,
    observability: ObservabilityLayer,
    backoff: Backoff,
    config: QueueConfig,
}

impl<B, C> Worker<B, C>
where
    B: LedgerBackend + ?Sized + 'static,
    C: Clone + Send + Sync + 'static,
{
    pub fn new(
        backend: Arc<B>,
        registry: Arc<JobRegistry<C>>,
        context: C,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        config.validate()?;

        Ok(Self {
            backend,
            registry,
            context,
            codec: Arc::new(JsonCodec),
            observability: ObservabilityLayer::new(),
            backoff: Backoff::from_config(&config),
            config,
        })
    }

    pub fn with_codec(mut self, codec: Arc<dyn JobCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_observability(mut self, observability: ObservabilityLayer) -> Self {
        self.observability = observability;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn observability(&self) -> &ObservabilityLayer {
        &self.observability
    }

    /// Claim from the first queue that has work and resolve that one job
    pub async fn poll_once(&self) -> QueueResult<PollOutcome> {
        for queue in &self.config.queues {
            let claimed = self.backend
                .claim_next(queue, Utc::now(), self.config.lease_duration)
                .await?;

            if let Some(record) = claimed {
                return self.process(record).await;
            }
        }

        Ok(PollOutcome::Idle)
    }

    /// Process jobs until a poll finds nothing. Returns the number processed.
    pub async fn run_until_idle(&self) -> QueueResult<u64> {
        let mut processed = 0;

        while self.poll_once().await? != PollOutcome::Idle {
            processed += 1;
        }

        Ok(processed)
    }

    /// Run until `max_jobs` is reached; store errors are retried, never returned
    pub async fn run(&self) -> QueueResult<u64> {
        let (_keep_alive, mut shutdown_rx) = oneshot::channel();
        self.run_loop(&mut shutdown_rx).await
    }

    /// Run on a background task
    pub fn spawn(self) -> WorkerHandle
    where
        B: Send + Sync,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let join_handle = tokio::spawn(async move {
            self.run_loop(&mut shutdown_rx).await
        });

        WorkerHandle {
            shutdown_tx,
            join_handle,
        }
    }

    async fn run_loop(&self, shutdown_rx: &mut oneshot::Receiver<()>) -> QueueResult<u64> {
        let mut processed = 0u64;
        let mut store_backoff = self.config.store_error_backoff;

        info!("Worker started for queues: {:?}", self.config.queues);

        loop {
            if self.config.max_jobs.is_some_and(|max| processed >= max) {
                info!("Worker reached max_jobs ({})", processed);
                break;
            }
            if !matches!(shutdown_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                info!("Worker shutdown requested");
                break;
            }

            match self.poll_once().await {
                Ok(PollOutcome::Idle) => {
                    store_backoff = self.config.store_error_backoff;
                    if pause(self.config.idle_poll_interval, shutdown_rx).await {
                        info!("Worker shutdown requested");
                        break;
                    }
                }
                Ok(_) => {
                    store_backoff = self.config.store_error_backoff;
                    processed += 1;
                }
                Err(e) => {
                    error!("Error polling ledger, retrying in {:?}: {}", store_backoff, e);
                    if pause(store_backoff, shutdown_rx).await {
                        break;
                    }
                    store_backoff = store_backoff.saturating_mul(2).min(self.config.max_delay.max(store_backoff));
                }
            }
        }

        info!("Worker stopped after {} jobs", processed);
        Ok(processed)
    }

    #[instrument(skip(self, record), fields(job_id = %record.id, queue = %record.queue, attempts = record.attempts))]
    async fn process(&self, record: JobRecord) -> QueueResult<PollOutcome> {
        self.observability.record_job_claimed(record.id, record.attempts);

        let envelope = match self.codec.decode(&record.payload) {
            Ok(envelope) => envelope,
            Err(e) => return self.fail(&record, "unknown", &e.to_string()).await,
        };

        let future = match self.registry.prepare(&envelope, self.context.clone()) {
            Ok(future) => future,
            Err(e) => return self.fail(&record, &envelope.job, &e.to_string()).await,
        };

        let timeout = self.execution_timeout(&envelope);
        let max_attempts = envelope.max_tries.unwrap_or(self.config.max_attempts);

        debug!("Processing job {} of type {}", record.id, envelope.job);
        let started = Instant::now();

        match execute(future, timeout).await {
            Ok(()) => {
                if !self.backend.mark_succeeded(&record).await? {
                    warn!("Job {} lost its lease before it completed", record.id);
                }
                self.observability.record_job_completed(record.id, &envelope.job, started.elapsed());
                info!("Job {} completed successfully", record.id);
                Ok(PollOutcome::Completed(record.id))
            }

            Err(job_error) if job_error.is_retryable() && record.attempts < max_attempts => {
                let available_at = time::after(Utc::now(), self.backoff.delay(record.attempts));
                let message = job_error.to_string();

                if !self.backend.release(&record, available_at).await? {
                    warn!("Job {} lost its lease before it was released", record.id);
                }
                self.observability.record_job_released(record.id, &envelope.job, available_at, &message);
                warn!("Job {} failed, will retry at {}: {}", record.id, available_at, message);
                Ok(PollOutcome::Released { job_id: record.id, available_at })
            }

            Err(job_error) => self.fail(&record, &envelope.job, &job_error.to_string()).await,
        }
    }

    /// Envelope timeout, unless it would outlive the lease
    fn execution_timeout(&self, envelope: &Envelope) -> Duration {
        match envelope.timeout() {
            Some(timeout) if timeout >= self.config.lease_duration => {
                warn!(
                    "Job type {} asks for a {:?} timeout, longer than the {:?} lease; using {:?}",
                    envelope.job, timeout, self.config.lease_duration, self.config.job_timeout
                );
                self.config.job_timeout
            }
            Some(timeout) => timeout,
            None => self.config.job_timeout,
        }
    }

    async fn fail(&self, record: &JobRecord, job_type: &str, message: &str) -> QueueResult<PollOutcome> {
        if !self.backend.mark_failed_permanently(record, message).await? {
            warn!("Job {} lost its lease before it failed", record.id);
        }
        self.observability.record_job_failed(record.id, job_type, message);
        error!("Job {} failed permanently after {} attempts: {}", record.id, record.attempts, message);
        Ok(PollOutcome::Failed(record.id))
    }
}

/// Run the handler on its own task so a timeout can abort it
async fn execute(future: BoxJobFuture, timeout: Duration) -> Result<(), JobError> {
    let mut handle = tokio::spawn(future);

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(JobError::Retryable(join_failure(join_error))),
        Err(_) => {
            // The job may be released only once the handler is gone
            handle.abort();
            let _ = handle.await;
            Err(JobError::Timeout(timeout))
        }
    }
}

fn join_failure(join_error: JoinError) -> String {
    if !join_error.is_panic() {
        return "handler task was cancelled".to_string();
    }

    let panic = join_error.into_panic();
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    format!("handler panicked: {}", detail)
}

/// Sleep, waking early on shutdown. Returns whether shutdown was requested.
async fn pause(duration: Duration, shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown_rx => true,
    }
}
