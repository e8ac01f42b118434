use async_trait::async_trait;
use ledger_queue::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::SiteContext;
use crate::mail::MailMessage;

/// One newsletter to one subscriber. Both are loaded by id when the job runs,
/// so edits made after dispatch are picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendNewsletterJob {
    pub newsletter_id: i64,
    pub subscriber_id: i64,
}

impl SendNewsletterJob {
    pub fn new(newsletter_id: i64, subscriber_id: i64) -> Self {
        Self {
            newsletter_id,
            subscriber_id,
        }
    }
}

#[async_trait]
impl Job for SendNewsletterJob {
    type Context = SiteContext;

    const JOB_TYPE: &'static str = "send_newsletter";
    const QUEUE: &'static str = "newsletters";
    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(60));

    async fn handle(&self, ctx: Self::Context) -> Result<(), JobError> {
        let newsletter = ctx.directory
            .newsletter(self.newsletter_id)
            .ok_or_else(|| JobError::permanent(format!("newsletter {} not found", self.newsletter_id)))?;

        let subscriber = ctx.directory
            .subscriber(self.subscriber_id)
            .ok_or_else(|| JobError::permanent(format!("subscriber {} not found", self.subscriber_id)))?;

        if !subscriber.subscribed {
            debug!("Subscriber {} unsubscribed, skipping newsletter {}", subscriber.id, newsletter.id);
            return Ok(());
        }

        let message = MailMessage {
            from: ctx.mail_from.clone(),
            to: subscriber.email.clone(),
            subject: newsletter.subject.clone(),
            body: newsletter.body.replace("{name}", &subscriber.name),
        };

        ctx.mailer.send(&message).await?;
        info!("Sent newsletter {} to subscriber {}", newsletter.id, subscriber.id);
        Ok(())
    }
}
