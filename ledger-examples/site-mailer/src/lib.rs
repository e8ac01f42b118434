pub mod background;
pub mod config;
pub mod directory;
pub mod mail;

use anyhow::{Context, Result};
use ledger_queue::SqliteBackend;
use std::sync::Arc;

use background::{BackgroundSystem, SiteContext};
use config::AppConfig;
use directory::Directory;
use mail::{LogMailer, Mailer};

/// Open the ledger, load the directory and start background delivery
pub async fn build(config: &AppConfig) -> Result<BackgroundSystem<SqliteBackend>> {
    let backend = SqliteBackend::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open job ledger at {}", config.database_url))?;
    backend.migrate().await?;

    let directory = match &config.directory_path {
        Some(path) => Directory::load(path)?,
        None => Directory::new(),
    };

    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);
    let context = SiteContext {
        directory: Arc::new(directory),
        mailer,
        mail_from: config.mail_from.clone(),
    };

    let mut system = BackgroundSystem::new(Arc::new(backend), context, config.queue.clone())?;
    system.start()?;
    Ok(system)
}
