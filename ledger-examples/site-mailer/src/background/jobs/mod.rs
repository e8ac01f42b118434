pub mod send_mail;
pub mod send_newsletter;

pub use send_mail::SendMailJob;
pub use send_newsletter::SendNewsletterJob;

use ledger_queue::JobError;
use std::sync::Arc;

use crate::directory::Directory;
use crate::mail::{MailError, Mailer};

/// Everything a site job needs at run time, cloned into each execution
#[derive(Clone)]
pub struct SiteContext {
    pub directory: Arc<Directory>,
    pub mailer: Arc<dyn Mailer>,
    /// Sender address for outgoing mail
    pub mail_from: String,
}

impl From<MailError> for JobError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::Unavailable(_) => JobError::retryable(err.to_string()),
            MailError::Rejected(_) => JobError::permanent(err.to_string()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::directory::{Newsletter, Subscriber};
    use crate::mail::OutboxMailer;

    pub fn context() -> (SiteContext, OutboxMailer) {
        let directory = Directory::new();
        directory.upsert_subscriber(Subscriber {
            id: 1,
            email: "ada@example.org".into(),
            name: "Ada".into(),
            subscribed: true,
        });
        directory.upsert_subscriber(Subscriber {
            id: 2,
            email: "grace@example.org".into(),
            name: "Grace".into(),
            subscribed: true,
        });
        directory.upsert_newsletter(Newsletter {
            id: 10,
            subject: "Spring events".into(),
            body: "Hello {name}, the spring programme is out.".into(),
        });

        let outbox = OutboxMailer::new();
        let ctx = SiteContext {
            directory: Arc::new(directory),
            mailer: Arc::new(outbox.clone()),
            mail_from: "news@example.org".into(),
        };
        (ctx, outbox)
    }
}
