//! # ledger-queue: database-backed job queue
//!
//! Jobs live as rows in a ledger table. Workers claim them with a single
//! conditional update, run the registered handler under a timeout, and then
//! delete the row, release it with an exponential backoff, or move it to the
//! failed-jobs store. A lease reaper makes rows held by crashed workers
//! claimable again. Delivery is at-least-once, so handlers should be idempotent.
//!
//! ## Quick start
//!
//! ```no_run
//! use ledger_queue::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct SendWelcomeMail {
//!     subscriber_id: i64,
//! }
//!
//! #[async_trait]
//! impl Job for SendWelcomeMail {
//!     type Context = ();
//!
//!     const JOB_TYPE: &'static str = "send_welcome_mail";
//!     const QUEUE: &'static str = "mail";
//!
//!     async fn handle(&self, _ctx: ()) -> Result<(), JobError> {
//!         // Load the subscriber by id and send the mail
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> QueueResult<()> {
//! let backend = Arc::new(SqliteBackend::connect("sqlite://queue.db").await?);
//! backend.migrate().await?;
//!
//! let dispatcher = Dispatcher::new(backend.clone());
//! dispatcher.dispatch(&SendWelcomeMail { subscriber_id: 42 }).await?;
//!
//! let registry = Arc::new(JobRegistry::new().with::<SendWelcomeMail>()?);
//! let config = QueueConfig::default().with_queues(["mail"]);
//!
//! let reaper = LeaseReaper::new(backend.clone(), &config)?.spawn();
//! let worker = Worker::new(backend, registry, (), config)?.spawn();
//!
//! tokio::signal::ctrl_c().await.ok();
//! worker.shutdown().await?;
//! reaper.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod types;
pub mod error;
pub mod codec;
pub mod job;
pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod worker;
pub mod reaper;
pub mod observability;

pub use types::{JobId, FailedJobId, NewJob, JobRecord, JobStatus, FailedJobRecord, JobEvent};
pub use error::{QueueError, QueueResult, JobError};
pub use codec::{Envelope, JobCodec};
pub use codec::json::JsonCodec;
pub use job::{Job, JobRegistry};
pub use backend::LedgerBackend;
pub use config::QueueConfig;
pub use dispatcher::Dispatcher;
pub use worker::{Worker, WorkerHandle, PollOutcome, Backoff};
pub use reaper::{LeaseReaper, ReaperHandle};

pub use observability::{ObservabilityLayer, LiveMetrics};

#[cfg(feature = "memory")]
pub use backend::memory::MemoryBackend;

#[cfg(feature = "sqlite")]
pub use backend::sqlite::SqliteBackend;

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

pub mod prelude {
    pub use crate::{
        Dispatcher, Worker, WorkerHandle, LeaseReaper, ReaperHandle, Job, LedgerBackend,
    };

    pub use crate::{
        JobId, JobStatus, JobError, QueueError, QueueResult, QueueConfig, PollOutcome,
    };

    pub use crate::{JobCodec, JsonCodec, JobRegistry};

    pub use crate::{ObservabilityLayer, LiveMetrics};

    #[cfg(feature = "memory")]
    pub use crate::MemoryBackend;

    #[cfg(feature = "sqlite")]
    pub use crate::SqliteBackend;

    pub use async_trait::async_trait;
}
