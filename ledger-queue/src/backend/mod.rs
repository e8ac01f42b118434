#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::{
    QueueResult, JobId, FailedJobId, NewJob, JobRecord, FailedJobRecord,
};

/// How many times `claim_next` re-selects after losing a race before giving up
pub const DEFAULT_CLAIM_ATTEMPTS: u32 = 3;

/// Ledger primitives every storage backend provides.
///
/// Every state transition is a conditional update on one row, so any number
/// of workers may share a backend without further coordination.
///
/// The resolution calls take the record `claim_next` returned and only apply
/// while the row still carries that reservation. A worker whose lease was
/// reclaimed gets `false` and cannot touch a later claim of the same row.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Insert a new unreserved row with zero attempts
    async fn insert(&self, job: NewJob) -> QueueResult<JobId>;

    /// Reserve the oldest claimable job of `queue`, bumping its attempts.
    ///
    /// A row is claimable when `available_at <= now` and it is either
    /// unreserved or its reservation is at least `lease` old. Returns `None`
    /// when nothing is claimable or every selected row was taken by another
    /// worker first.
    async fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> QueueResult<Option<JobRecord>>;

    /// Delete a finished job. Returns whether the claim was still held.
    async fn mark_succeeded(&self, claim: &JobRecord) -> QueueResult<bool>;

    /// Clear the reservation and push `available_at` out for another attempt
    async fn release(&self, claim: &JobRecord, available_at: DateTime<Utc>) -> QueueResult<bool>;

    /// Move the row into the failed store and delete it, atomically
    async fn mark_failed_permanently(&self, claim: &JobRecord, error: &str) -> QueueResult<bool>;

    /// Clear reservations at least `lease` old without touching attempts
    async fn reclaim_expired(&self, lease: Duration, now: DateTime<Utc>) -> QueueResult<u64>;

    /// Fetch a live row
    async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>>;

    /// Live rows on a queue, pending and reserved
    async fn size(&self, queue: &str) -> QueueResult<u64>;

    /// Delete every live row on a queue
    async fn clear(&self, queue: &str) -> QueueResult<u64>;

    /// Failed records, newest first
    async fn failed_jobs(&self, limit: usize) -> QueueResult<Vec<FailedJobRecord>>;

    /// Push a failed job back into the ledger as a fresh job
    async fn retry_failed(&self, id: FailedJobId) -> QueueResult<Option<JobId>>;

    /// Drop one failed record
    async fn forget_failed(&self, id: FailedJobId) -> QueueResult<bool>;

    /// Drop every failed record
    async fn flush_failed(&self) -> QueueResult<u64>;
}

/// Extract the envelope uuid for the failed store, if the payload is readable
pub(crate) fn payload_uuid(payload: &[u8]) -> Option<String> {
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()?
        .get("uuid")?
        .as_str()
        .map(str::to_string)
}
