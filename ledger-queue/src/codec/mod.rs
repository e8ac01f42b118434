//! Payload codec: turns a handler id plus its arguments into the opaque bytes
//! stored in the ledger, and back.

pub mod json;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::{Job, QueueResult};

/// Decoded form of a ledger payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Stable identity of this dispatch, kept when the job lands in the failed store
    pub uuid: String,

    /// Handler identifier used for registry dispatch
    pub job: String,

    /// Per-job attempt ceiling; the worker default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tries: Option<u32>,

    /// Per-job execution timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Handler arguments
    pub data: serde_json::Value,
}

impl Envelope {
    /// Wrap arbitrary arguments for the named handler
    pub fn new(job: impl Into<String>, args: &impl Serialize) -> QueueResult<Self> {
        Ok(Self {
            uuid: Uuid::new_v4().to_string(),
            job: job.into(),
            max_tries: None,
            timeout_ms: None,
            data: serde_json::to_value(args)?,
        })
    }

    /// Wrap a typed job, carrying its attempt and timeout overrides
    pub fn for_job<J: Job>(job: &J) -> QueueResult<Self> {
        let mut envelope = Self::new(J::JOB_TYPE, job)?;
        envelope.max_tries = J::MAX_ATTEMPTS;
        envelope.timeout_ms = J::TIMEOUT.map(|t| t.as_millis().min(u64::MAX as u128) as u64);
        Ok(envelope)
    }

    /// Execution timeout requested by the dispatcher, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Rebuild the typed arguments
    pub fn args<T: DeserializeOwned>(&self) -> QueueResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Trait for job payload codecs
pub trait JobCodec: Send + Sync {
    /// Encode an envelope into ledger bytes
    fn encode(&self, envelope: &Envelope) -> QueueResult<Vec<u8>>;

    /// Decode ledger bytes; corrupt payloads yield `QueueError::Serialization`
    fn decode(&self, bytes: &[u8]) -> QueueResult<Envelope>;

    /// Get codec identifier
    fn codec_id(&self) -> &'static str;
}
