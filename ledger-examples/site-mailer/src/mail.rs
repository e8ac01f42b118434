use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// One outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// Relay unreachable or greylisting; worth another attempt
    #[error("mail relay unavailable: {0}")]
    Unavailable(String),

    /// Recipient or content refused for good
    #[error("message rejected: {0}")]
    Rejected(String),
}

/// Outgoing mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Transport that only writes each message to the log
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        info!(to = %message.to, subject = %message.subject, "Delivered mail");
        Ok(())
    }
}

/// Transport that keeps messages in memory; can be told to fail first
#[derive(Debug, Default, Clone)]
pub struct OutboxMailer {
    sent: Arc<Mutex<Vec<MailMessage>>>,
    failures: Arc<Mutex<Vec<MailError>>>,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error to return from the next `send` call
    pub fn fail_next(&self, error: MailError) {
        self.failures.lock().push(error);
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        if let Some(error) = self.failures.lock().pop() {
            return Err(error);
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}
