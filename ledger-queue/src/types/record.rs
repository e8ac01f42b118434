use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{time, FailedJobId, JobId};

/// Job status as derived from a ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Unreserved, but `available_at` is still in the future
    Delayed,

    /// Unreserved and claimable
    Available,

    /// Held by a worker whose lease has not run out
    Reserved,

    /// Reserved, but the lease ran out; the reaper or the next claim will recover it
    Expired,
}

impl JobStatus {
    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Delayed => "delayed",
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Expired => "expired",
        }
    }
}

/// One live row of the job ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Ledger identity, also the FIFO tie-break
    pub id: JobId,

    /// Logical queue name
    pub queue: String,

    /// Encoded envelope (opaque to the ledger)
    pub payload: Vec<u8>,

    /// Attempts started so far; bumped once per claim
    pub attempts: u32,

    /// Earliest time the job may be claimed
    pub available_at: DateTime<Utc>,

    /// Set while a worker holds the job
    pub reserved_at: Option<DateTime<Utc>>,

    /// Enqueue time, FIFO order key
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// Unreserved and due
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.reserved_at.is_none() && self.available_at <= now
    }

    /// Reserved for at least `lease`
    pub fn lease_expired(&self, lease: Duration, now: DateTime<Utc>) -> bool {
        match self.reserved_at {
            Some(reserved_at) => reserved_at <= time::before(now, lease),
            None => false,
        }
    }

    /// Whether this row is still reserved by `claim`
    pub fn is_held_by(&self, claim: &JobRecord) -> bool {
        self.id == claim.id && self.reserved_at.is_some() && self.reserved_at == claim.reserved_at
    }

    /// The predicate the claim protocol guards its update with
    pub fn is_claimable(&self, lease: Duration, now: DateTime<Utc>) -> bool {
        self.available_at <= now && (self.reserved_at.is_none() || self.lease_expired(lease, now))
    }

    /// Derive the status of this row at `now`
    pub fn status(&self, lease: Duration, now: DateTime<Utc>) -> JobStatus {
        match self.reserved_at {
            Some(_) if self.lease_expired(lease, now) => JobStatus::Expired,
            Some(_) => JobStatus::Reserved,
            None if self.available_at > now => JobStatus::Delayed,
            None => JobStatus::Available,
        }
    }

    /// FIFO ordering key within a queue
    pub(crate) fn order_key(&self) -> (DateTime<Utc>, JobId) {
        (self.created_at, self.id)
    }
}

/// Terminal copy of a job that exhausted its attempts or failed permanently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJobRecord {
    /// Failed-store identity
    pub id: FailedJobId,

    /// Ledger id the job had while it was live
    pub job_id: JobId,

    /// Envelope uuid, when the payload could be decoded
    pub uuid: Option<String>,

    pub queue: String,

    pub payload: Vec<u8>,

    pub attempts: u32,

    /// Final error description
    pub error: String,

    pub failed_at: DateTime<Utc>,
}
