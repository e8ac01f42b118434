use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    QueueResult, JobId, FailedJobId, NewJob, JobRecord, FailedJobRecord,
    backend::{LedgerBackend, payload_uuid},
    types::time,
};

#[derive(Default)]
struct Ledger {
    next_id: i64,
    next_failed_id: i64,
    jobs: BTreeMap<JobId, JobRecord>,
    failed: BTreeMap<FailedJobId, FailedJobRecord>,
}

impl Ledger {
    fn allocate_id(&mut self) -> JobId {
        self.next_id += 1;
        JobId(self.next_id)
    }

    fn holds(&self, claim: &JobRecord) -> bool {
        self.jobs.get(&claim.id).is_some_and(|record| record.is_held_by(claim))
    }

    fn push_failed(&mut self, record: JobRecord, error: &str, now: DateTime<Utc>) {
        self.next_failed_id += 1;
        let id = FailedJobId(self.next_failed_id);
        self.failed.insert(id, FailedJobRecord {
            id,
            job_id: record.id,
            uuid: payload_uuid(&record.payload),
            queue: record.queue,
            payload: record.payload,
            attempts: record.attempts,
            error: error.to_string(),
            failed_at: now,
        });
    }
}

/// In-memory ledger for testing and single-process development.
///
/// One mutex guards the whole ledger, so every primitive is atomic with
/// respect to every other, the same guarantee a SQL store gives per row.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    ledger: Arc<Mutex<Ledger>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdate a reservation so it reads as expired (test helper)
    pub fn force_lease_expiry(&self, id: JobId, lease: Duration) -> bool {
        let mut ledger = self.ledger.lock();
        match ledger.jobs.get_mut(&id) {
            Some(record) if record.reserved_at.is_some() => {
                record.reserved_at = Some(time::before(Utc::now(), lease + Duration::from_secs(1)));
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl LedgerBackend for MemoryBackend {
    async fn insert(&self, job: NewJob) -> QueueResult<JobId> {
        let mut ledger = self.ledger.lock();
        let id = ledger.allocate_id();

        ledger.jobs.insert(id, JobRecord {
            id,
            queue: job.queue,
            payload: job.payload,
            attempts: 0,
            available_at: job.available_at,
            reserved_at: None,
            created_at: Utc::now(),
        });

        Ok(id)
    }

    async fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> QueueResult<Option<JobRecord>> {
        let mut ledger = self.ledger.lock();

        let candidate = ledger.jobs
            .values()
            .filter(|record| record.queue == queue && record.is_claimable(lease, now))
            .min_by_key(|record| record.order_key())
            .map(|record| record.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let Some(record) = ledger.jobs.get_mut(&id) else {
            return Ok(None);
        };
        record.reserved_at = Some(now);
        record.attempts += 1;

        Ok(Some(record.clone()))
    }

    async fn mark_succeeded(&self, claim: &JobRecord) -> QueueResult<bool> {
        let mut ledger = self.ledger.lock();
        if !ledger.holds(claim) {
            return Ok(false);
        }
        ledger.jobs.remove(&claim.id);
        Ok(true)
    }

    async fn release(&self, claim: &JobRecord, available_at: DateTime<Utc>) -> QueueResult<bool> {
        let mut ledger = self.ledger.lock();
        match ledger.jobs.get_mut(&claim.id) {
            Some(record) if record.is_held_by(claim) => {
                record.reserved_at = None;
                record.available_at = available_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed_permanently(&self, claim: &JobRecord, error: &str) -> QueueResult<bool> {
        let mut ledger = self.ledger.lock();
        if !ledger.holds(claim) {
            return Ok(false);
        }
        match ledger.jobs.remove(&claim.id) {
            Some(record) => {
                ledger.push_failed(record, error, Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reclaim_expired(&self, lease: Duration, now: DateTime<Utc>) -> QueueResult<u64> {
        let mut ledger = self.ledger.lock();
        let mut reclaimed = 0;

        for record in ledger.jobs.values_mut() {
            if record.lease_expired(lease, now) {
                record.reserved_at = None;
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.ledger.lock().jobs.get(&id).cloned())
    }

    async fn size(&self, queue: &str) -> QueueResult<u64> {
        let ledger = self.ledger.lock();
        Ok(ledger.jobs.values().filter(|record| record.queue == queue).count() as u64)
    }

    async fn clear(&self, queue: &str) -> QueueResult<u64> {
        let mut ledger = self.ledger.lock();
        let before = ledger.jobs.len();
        ledger.jobs.retain(|_, record| record.queue != queue);
        Ok((before - ledger.jobs.len()) as u64)
    }

    async fn failed_jobs(&self, limit: usize) -> QueueResult<Vec<FailedJobRecord>> {
        let ledger = self.ledger.lock();
        Ok(ledger.failed.values().rev().take(limit).cloned().collect())
    }

    async fn retry_failed(&self, id: FailedJobId) -> QueueResult<Option<JobId>> {
        let mut ledger = self.ledger.lock();
        let Some(failed) = ledger.failed.remove(&id) else {
            return Ok(None);
        };

        let now = Utc::now();
        let job_id = ledger.allocate_id();
        ledger.jobs.insert(job_id, JobRecord {
            id: job_id,
            queue: failed.queue,
            payload: failed.payload,
            attempts: 0,
            available_at: now,
            reserved_at: None,
            created_at: now,
        });

        Ok(Some(job_id))
    }

    async fn forget_failed(&self, id: FailedJobId) -> QueueResult<bool> {
        Ok(self.ledger.lock().failed.remove(&id).is_some())
    }

    async fn flush_failed(&self) -> QueueResult<u64> {
        let mut ledger = self.ledger.lock();
        let count = ledger.failed.len() as u64;
        ledger.failed.clear();
        Ok(count)
    }
}
