use async_trait::async_trait;
use ledger_queue::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::SiteContext;
use crate::mail::MailMessage;

/// Single transactional mail (contact form replies, event confirmations)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMailJob {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl SendMailJob {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[async_trait]
impl Job for SendMailJob {
    type Context = SiteContext;

    const JOB_TYPE: &'static str = "send_mail";
    const QUEUE: &'static str = "mail";
    const MAX_ATTEMPTS: Option<u32> = Some(5);
    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(30));

    async fn handle(&self, ctx: Self::Context) -> Result<(), JobError> {
        if !self.to.contains('@') {
            return Err(JobError::permanent(format!("invalid recipient address: {}", self.to)));
        }

        let message = MailMessage {
            from: ctx.mail_from.clone(),
            to: self.to.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
        };

        ctx.mailer.send(&message).await?;
        info!("Sent mail to {}", self.to);
        Ok(())
    }
}
