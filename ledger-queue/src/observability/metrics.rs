use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Live counters for queue operations
#[derive(Default)]
pub struct LiveMetrics {
    jobs_enqueued: AtomicU64,
    jobs_claimed: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_failed: AtomicU64,
    leases_reclaimed: AtomicU64,

    job_types: Mutex<HashMap<String, JobTypeMetrics>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_job_type(&self, job_type: &str, f: impl FnOnce(&mut JobTypeMetrics)) {
        let mut job_types = self.job_types.lock();
        f(job_types.entry(job_type.to_string()).or_default());
    }

    pub fn increment_jobs_enqueued(&self, job_type: &str) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
        self.with_job_type(job_type, |m| m.enqueued += 1);
    }

    pub fn increment_jobs_claimed(&self) {
        self.jobs_claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_jobs_completed(&self, job_type: &str, elapsed: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.with_job_type(job_type, |m| {
            m.completed += 1;
            m.total_runtime += elapsed;
        });
    }

    pub fn increment_jobs_retried(&self, job_type: &str) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
        self.with_job_type(job_type, |m| m.retried += 1);
    }

    pub fn increment_jobs_failed(&self, job_type: &str) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.with_job_type(job_type, |m| m.failed += 1);
    }

    pub fn add_leases_reclaimed(&self, count: u64) {
        self.leases_reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn jobs_enqueued(&self) -> u64 {
        self.jobs_enqueued.load(Ordering::Relaxed)
    }

    pub fn jobs_claimed(&self) -> u64 {
        self.jobs_claimed.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn leases_reclaimed(&self) -> u64 {
        self.leases_reclaimed.load(Ordering::Relaxed)
    }

    /// Get metrics for a specific job type
    pub fn job_type_metrics(&self, job_type: &str) -> Option<JobTypeMetrics> {
        self.job_types.lock().get(job_type).cloned()
    }

    /// Collect a point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            jobs_enqueued: self.jobs_enqueued(),
            jobs_claimed: self.jobs_claimed(),
            jobs_completed: self.jobs_completed(),
            jobs_retried: self.jobs_retried(),
            jobs_failed: self.jobs_failed(),
            leases_reclaimed: self.leases_reclaimed(),
            job_types: self.job_types.lock().clone(),
        }
    }
}

/// Metrics for a specific job type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobTypeMetrics {
    pub enqueued: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    /// Summed handler runtime of completed attempts
    pub total_runtime: Duration,
}

impl JobTypeMetrics {
    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.completed + self.failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.completed as f64 / total_processed as f64) * 100.0
        }
    }

    pub fn average_runtime(&self) -> Option<Duration> {
        u32::try_from(self.completed)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| self.total_runtime / n)
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub jobs_enqueued: u64,
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub leases_reclaimed: u64,
    pub job_types: HashMap<String, JobTypeMetrics>,
}

impl MetricsSnapshot {
    /// Calculate overall success rate
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.jobs_completed + self.jobs_failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.jobs_completed as f64 / total_processed as f64) * 100.0
        }
    }

    /// Enqueued jobs not yet resolved to success or failure
    pub fn jobs_outstanding(&self) -> u64 {
        self.jobs_enqueued.saturating_sub(self.jobs_completed + self.jobs_failed)
    }
}
