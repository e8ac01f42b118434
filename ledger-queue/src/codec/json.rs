use crate::{QueueResult, codec::{Envelope, JobCodec}};

/// JSON codec for job serialization
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl JobCodec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> QueueResult<Vec<u8>> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn decode(&self, bytes: &[u8]) -> QueueResult<Envelope> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn codec_id(&self) -> &'static str {
        "json"
    }
}
