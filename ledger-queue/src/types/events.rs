use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Minimal stable event protocol for structured observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// Job was inserted into the ledger
    Enqueued {
        job_id: JobId,
        queue: String,
        job_type: String,
        available_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// Job was claimed by a worker
    Claimed {
        job_id: JobId,
        attempts: u32,
        at: DateTime<Utc>,
    },

    /// Job was released for another attempt
    Released {
        job_id: JobId,
        available_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    /// Job completed and was deleted
    Completed {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Job moved to the failed store
    Failed {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },

    /// Reaper cleared expired reservations
    Reclaimed {
        count: u64,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Claimed { .. } => "claimed",
            Self::Released { .. } => "released",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Reclaimed { .. } => "reclaimed",
        }
    }

    /// Get the job ID, for events about a single job
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Claimed { job_id, .. }
            | Self::Released { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. } => Some(*job_id),
            Self::Reclaimed { .. } => None,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. }
            | Self::Claimed { at, .. }
            | Self::Released { at, .. }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::Reclaimed { at, .. } => at,
        }
    }
}
