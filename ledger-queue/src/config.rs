use std::env;
use std::time::Duration;
use serde::Deserialize;

use crate::{QueueError, QueueResult};

/// Worker and reaper configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a reservation stays valid before the job may be reclaimed
    #[serde(with = "humantime_serde")]
    pub lease_duration: Duration,
    /// Attempt ceiling for jobs whose envelope carries none
    pub max_attempts: u32,
    /// Backoff after the first failed attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Backoff cap
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Randomize half of every backoff
    pub backoff_jitter: bool,
    /// Sleep between polls that found nothing
    #[serde(with = "humantime_serde")]
    pub idle_poll_interval: Duration,
    /// Queues in priority order
    pub queues: Vec<String>,
    /// Execution timeout for jobs whose envelope carries none
    #[serde(with = "humantime_serde")]
    pub job_timeout: Duration,
    /// Reaper tick
    #[serde(with = "humantime_serde")]
    pub reaper_interval: Duration,
    /// First pause after a store error; doubles up to `max_delay`
    #[serde(with = "humantime_serde")]
    pub store_error_backoff: Duration,
    /// Stop the worker after this many jobs
    pub max_jobs: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(90),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600), // 1 hour
            backoff_jitter: false,
            idle_poll_interval: Duration::from_secs(3),
            queues: vec!["default".to_string()],
            job_timeout: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(30),
            store_error_backoff: Duration::from_secs(1),
            max_jobs: None,
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by `QUEUE_*` environment variables.
    ///
    /// Durations use humantime syntax (`90s`, `5m`), `QUEUE_QUEUES` is a
    /// comma-separated priority list.
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> QueueResult<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("QUEUE_LEASE_DURATION") {
            config.lease_duration = parse_duration("QUEUE_LEASE_DURATION", &v)?;
        }
        if let Some(v) = lookup("QUEUE_MAX_ATTEMPTS") {
            config.max_attempts = parse_number("QUEUE_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("QUEUE_BASE_DELAY") {
            config.base_delay = parse_duration("QUEUE_BASE_DELAY", &v)?;
        }
        if let Some(v) = lookup("QUEUE_MAX_DELAY") {
            config.max_delay = parse_duration("QUEUE_MAX_DELAY", &v)?;
        }
        if let Some(v) = lookup("QUEUE_BACKOFF_JITTER") {
            config.backoff_jitter = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("QUEUE_IDLE_POLL_INTERVAL") {
            config.idle_poll_interval = parse_duration("QUEUE_IDLE_POLL_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("QUEUE_QUEUES") {
            config.queues = v
                .split(',')
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("QUEUE_JOB_TIMEOUT") {
            config.job_timeout = parse_duration("QUEUE_JOB_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("QUEUE_REAPER_INTERVAL") {
            config.reaper_interval = parse_duration("QUEUE_REAPER_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("QUEUE_STORE_ERROR_BACKOFF") {
            config.store_error_backoff = parse_duration("QUEUE_STORE_ERROR_BACKOFF", &v)?;
        }
        if let Some(v) = lookup("QUEUE_MAX_JOBS") {
            config.max_jobs = Some(parse_number("QUEUE_MAX_JOBS", &v)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the worker or reaper cannot run with
    pub fn validate(&self) -> QueueResult<()> {
        if self.queues.is_empty() {
            return Err(QueueError::InvalidConfig("at least one queue is required".into()));
        }
        if self.max_attempts == 0 {
            return Err(QueueError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.lease_duration.is_zero() {
            return Err(QueueError::InvalidConfig("lease_duration must be positive".into()));
        }
        if self.reaper_interval >= self.lease_duration {
            return Err(QueueError::InvalidConfig(format!(
                "reaper_interval ({:?}) must be shorter than lease_duration ({:?})",
                self.reaper_interval, self.lease_duration
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(QueueError::InvalidConfig("base_delay exceeds max_delay".into()));
        }
        if self.job_timeout.is_zero() {
            return Err(QueueError::InvalidConfig("job_timeout must be positive".into()));
        }
        // A handler still inside its timeout must never lose its lease
        if self.job_timeout >= self.lease_duration {
            return Err(QueueError::InvalidConfig(format!(
                "job_timeout ({:?}) must be shorter than lease_duration ({:?})",
                self.job_timeout, self.lease_duration
            )));
        }
        Ok(())
    }

    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }
}

fn parse_duration(key: &str, value: &str) -> QueueResult<Duration> {
    humantime_serde::re::humantime::parse_duration(value.trim())
        .map_err(|e| QueueError::InvalidConfig(format!("{key}: {e}")))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> QueueResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| QueueError::InvalidConfig(format!("{key}: {e}")))
}
