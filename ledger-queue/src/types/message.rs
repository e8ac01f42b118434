use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Insert request for the ledger - what the dispatcher hands to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Target queue name
    pub queue: String,

    /// Encoded envelope (opaque bytes)
    pub payload: Vec<u8>,

    /// When the job becomes claimable
    pub available_at: DateTime<Utc>,
}

impl NewJob {
    /// Create a job that is claimable immediately
    pub fn new(queue: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            queue: queue.into(),
            payload,
            available_at: Utc::now(),
        }
    }

    /// Set when the job becomes claimable
    pub fn with_available_at(mut self, available_at: DateTime<Utc>) -> Self {
        self.available_at = available_at;
        self
    }

    /// Delay the job relative to now
    pub fn delayed_by(self, delay: std::time::Duration) -> Self {
        self.with_available_at(super::time::after(Utc::now(), delay))
    }
}
