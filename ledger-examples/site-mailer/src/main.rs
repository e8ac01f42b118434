use anyhow::{bail, Result};
use site_mailer::config::AppConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    ledger_queue::init_tracing();

    let config = AppConfig::from_env()?;
    let system = site_mailer::build(&config).await?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] => {}
        ["send-newsletter", id] => {
            let count = system.fan_out_newsletter(id.parse()?, None).await?;
            info!("Queued newsletter {} for {} subscribers", id, count);
        }
        ["retry-failed", id] => match system.retry_failed(id.parse()?).await? {
            Some(job_id) => info!("Failed job {} requeued as {}", id, job_id),
            None => info!("No failed job with id {}", id),
        },
        ["stats"] => {
            println!("{}", serde_json::to_string_pretty(&system.stats().await?)?);
        }
        other => bail!("unknown command: {}", other.join(" ")),
    }

    info!("site-mailer running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    system.shutdown().await
}
