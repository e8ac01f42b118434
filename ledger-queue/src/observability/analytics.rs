use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::debug;

use crate::{JobId, JobEvent};
use super::LiveMetrics;

const EVENT_CAPACITY: usize = 10_000;

/// Counters plus a broadcast of [`JobEvent`]s, shared by dispatcher, workers and reaper
#[derive(Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<JobEvent>,
    metrics: Arc<LiveMetrics>,
}

impl ObservabilityLayer {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            event_broadcaster,
            metrics: Arc::new(LiveMetrics::new()),
        }
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.event_broadcaster.send(event);
    }

    pub fn record_job_enqueued(&self, job_id: JobId, queue: &str, job_type: &str, available_at: DateTime<Utc>) {
        self.emit(JobEvent::Enqueued {
            job_id,
            queue: queue.to_string(),
            job_type: job_type.to_string(),
            available_at,
            at: Utc::now(),
        });
        self.metrics.increment_jobs_enqueued(job_type);
        debug!("Recorded job enqueued: {} ({})", job_id, job_type);
    }

    pub fn record_job_claimed(&self, job_id: JobId, attempts: u32) {
        self.emit(JobEvent::Claimed {
            job_id,
            attempts,
            at: Utc::now(),
        });
        self.metrics.increment_jobs_claimed();
    }

    pub fn record_job_completed(&self, job_id: JobId, job_type: &str, elapsed: Duration) {
        self.emit(JobEvent::Completed {
            job_id,
            at: Utc::now(),
        });
        self.metrics.increment_jobs_completed(job_type, elapsed);
        debug!("Recorded job completed: {} ({})", job_id, job_type);
    }

    pub fn record_job_released(&self, job_id: JobId, job_type: &str, available_at: DateTime<Utc>, error: &str) {
        self.emit(JobEvent::Released {
            job_id,
            available_at,
            error: error.to_string(),
            at: Utc::now(),
        });
        self.metrics.increment_jobs_retried(job_type);
        debug!("Recorded job released: {} ({})", job_id, job_type);
    }

    pub fn record_job_failed(&self, job_id: JobId, job_type: &str, error: &str) {
        self.emit(JobEvent::Failed {
            job_id,
            error: error.to_string(),
            at: Utc::now(),
        });
        self.metrics.increment_jobs_failed(job_type);
        debug!("Recorded job failed: {} ({})", job_id, job_type);
    }

    pub fn record_leases_reclaimed(&self, count: u64) {
        self.emit(JobEvent::Reclaimed {
            count,
            at: Utc::now(),
        });
        self.metrics.add_leases_reclaimed(count);
    }

    /// Raw broadcast receiver
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_broadcaster.subscribe()
    }

    /// Events from now on; a slow consumer skips what it lagged behind on
    pub fn event_stream(&self) -> impl Stream<Item = JobEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|event| event.ok())
    }

    pub fn metrics(&self) -> &LiveMetrics {
        &self.metrics
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}
