use anyhow::{Context, Result};
use ledger_queue::QueueConfig;
use std::env;
use std::path::PathBuf;

/// Queues the site worker drains, in priority order
pub const SITE_QUEUES: [&str; 2] = ["mail", "newsletters"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite URL of the job ledger
    pub database_url: String,
    /// JSON file with subscribers and newsletters
    pub directory_path: Option<PathBuf>,
    /// Sender address for outgoing mail
    pub mail_from: String,
    pub queue: QueueConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut queue = QueueConfig::from_env().context("invalid queue configuration")?;
        if env::var("QUEUE_QUEUES").is_err() {
            queue = queue.with_queues(SITE_QUEUES);
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://site-mailer.db".to_string()),
            directory_path: env::var("SITE_DIRECTORY").ok().map(PathBuf::from),
            mail_from: env::var("MAIL_FROM").unwrap_or_else(|_| "news@localhost".to_string()),
            queue,
        })
    }
}
