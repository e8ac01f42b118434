use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use tracing::{info, instrument};

use crate::{
    QueueResult, JobId, NewJob, Job,
    backend::LedgerBackend,
    codec::{Envelope, JobCodec, json::JsonCodec},
    observability::ObservabilityLayer,
};

/// Inserts jobs into the ledger. Never runs a handler inline.
pub struct Dispatcher<B: LedgerBackend + ?Sized> {
    backend: Arc<B>,
    codec: Arc<dyn JobCodec>,
    observability: ObservabilityLayer,
}

impl<B: LedgerBackend + ?Sized> Clone for Dispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            codec: self.codec.clone(),
            observability: self.observability.clone(),
        }
    }
}

impl<B: LedgerBackend + ?Sized> Dispatcher<B> {
    /// Dispatcher with the JSON codec
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            codec: Arc::new(JsonCodec),
            observability: ObservabilityLayer::new(),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn JobCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Share counters and events with workers built from the same layer
    pub fn with_observability(mut self, observability: ObservabilityLayer) -> Self {
        self.observability = observability;
        self
    }

    /// Enqueue `args` for the handler registered as `job`
    #[instrument(skip(self, args), fields(queue = %queue, job = %job))]
    pub async fn enqueue<A>(
        &self,
        queue: &str,
        job: &str,
        args: &A,
        delay: Option<Duration>,
    ) -> QueueResult<JobId>
    where
        A: Serialize + Sync + ?Sized,
    {
        let envelope = Envelope::new(job, &args)?;
        self.insert(queue, envelope, delay).await
    }

    /// Enqueue a typed job on its own queue
    pub async fn dispatch<J: Job>(&self, job: &J) -> QueueResult<JobId> {
        self.dispatch_to(J::QUEUE, job, None).await
    }

    /// Enqueue a typed job on an explicit queue, optionally delayed
    #[instrument(skip(self, job), fields(queue = %queue, job = J::JOB_TYPE))]
    pub async fn dispatch_to<J: Job>(&self, queue: &str, job: &J, delay: Option<Duration>) -> QueueResult<JobId> {
        let envelope = Envelope::for_job(job)?;
        self.insert(queue, envelope, delay).await
    }

    async fn insert(&self, queue: &str, envelope: Envelope, delay: Option<Duration>) -> QueueResult<JobId> {
        let payload = self.codec.encode(&envelope)?;

        let mut new_job = NewJob::new(queue, payload);
        if let Some(delay) = delay {
            new_job = new_job.delayed_by(delay);
        }
        let available_at = new_job.available_at;

        let job_id = self.backend.insert(new_job).await?;

        self.observability.record_job_enqueued(job_id, queue, &envelope.job, available_at);
        info!("Enqueued job {} ({}) on queue {}", job_id, envelope.job, queue);
        Ok(job_id)
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn observability(&self) -> &ObservabilityLayer {
        &self.observability
    }
}
