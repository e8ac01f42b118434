//! Background mail delivery for the site.
//!
//! One worker drains the `mail` queue before `newsletters`, so transactional
//! mail is never stuck behind a large newsletter fan-out.

pub mod jobs;

use anyhow::Result;
use ledger_queue::prelude::*;
use ledger_queue::FailedJobId;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use jobs::*;

pub struct BackgroundSystem<B: LedgerBackend + 'static> {
    dispatcher: Dispatcher<B>,
    registry: Arc<JobRegistry<SiteContext>>,
    context: SiteContext,
    config: QueueConfig,
    worker: Option<WorkerHandle>,
    reaper: Option<ReaperHandle>,
}

impl<B: LedgerBackend + 'static> BackgroundSystem<B> {
    pub fn new(backend: Arc<B>, context: SiteContext, config: QueueConfig) -> Result<Self> {
        config.validate()?;

        let registry = JobRegistry::new()
            .with::<SendMailJob>()?
            .with::<SendNewsletterJob>()?;

        Ok(Self {
            dispatcher: Dispatcher::new(backend),
            registry: Arc::new(registry),
            context,
            config,
            worker: None,
            reaper: None,
        })
    }

    /// Worker sharing this system's backend, registry and observability layer
    pub fn worker(&self) -> Result<Worker<B, SiteContext>> {
        let worker = Worker::new(
            self.dispatcher.backend().clone(),
            self.registry.clone(),
            self.context.clone(),
            self.config.clone(),
        )?
        .with_observability(self.dispatcher.observability().clone());

        Ok(worker)
    }

    /// Start the worker and the lease reaper
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let reaper = LeaseReaper::new(self.dispatcher.backend().clone(), &self.config)?
            .with_observability(self.dispatcher.observability().clone());

        self.worker = Some(self.worker()?.spawn());
        self.reaper = Some(reaper.spawn());

        info!("Background mail system started on queues {:?}", self.config.queues);
        Ok(())
    }

    pub fn dispatcher(&self) -> &Dispatcher<B> {
        &self.dispatcher
    }

    pub async fn enqueue_mail(&self, job: SendMailJob) -> Result<JobId> {
        Ok(self.dispatcher.dispatch(&job).await?)
    }

    /// Dispatch one job per active subscriber. Returns the number dispatched.
    pub async fn fan_out_newsletter(&self, newsletter_id: i64, delay: Option<Duration>) -> Result<usize> {
        if self.context.directory.newsletter(newsletter_id).is_none() {
            anyhow::bail!("newsletter {} not found", newsletter_id);
        }

        let subscribers = self.context.directory.active_subscribers();
        for subscriber in &subscribers {
            let job = SendNewsletterJob::new(newsletter_id, subscriber.id);
            self.dispatcher
                .dispatch_to(SendNewsletterJob::QUEUE, &job, delay)
                .await?;
        }

        info!("Dispatched newsletter {} to {} subscribers", newsletter_id, subscribers.len());
        Ok(subscribers.len())
    }

    /// Move a failed job back onto its queue
    pub async fn retry_failed(&self, id: i64) -> Result<Option<JobId>> {
        Ok(self.dispatcher.backend().retry_failed(FailedJobId(id)).await?)
    }

    pub async fn stats(&self) -> Result<Value> {
        let backend = self.dispatcher.backend();
        let snapshot = self.dispatcher.observability().metrics().snapshot();

        let mut queues = serde_json::Map::new();
        for queue in &self.config.queues {
            queues.insert(queue.clone(), json!(backend.size(queue).await?));
        }

        let failed: Vec<Value> = backend
            .failed_jobs(20)
            .await?
            .into_iter()
            .map(|record| json!({
                "id": record.id.0,
                "queue": record.queue,
                "attempts": record.attempts,
                "error": record.error,
                "failed_at": record.failed_at.to_rfc3339(),
            }))
            .collect();

        Ok(json!({
            "status": if self.worker.is_some() { "running" } else { "stopped" },
            "queues": queues,
            "recent_failures": failed,
            "jobs": {
                "enqueued": snapshot.jobs_enqueued,
                "completed": snapshot.jobs_completed,
                "retried": snapshot.jobs_retried,
                "failed": snapshot.jobs_failed,
                "leases_reclaimed": snapshot.leases_reclaimed,
                "success_rate": snapshot.success_rate(),
            },
        }))
    }

    /// Stop the worker after its current job, then the reaper
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            let processed = worker.shutdown().await?;
            info!("Worker stopped after {} jobs", processed);
        }
        if let Some(reaper) = self.reaper.take() {
            reaper.shutdown().await?;
        }
        Ok(())
    }
}
