use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn, debug};

use crate::{
    QueueResult, QueueError,
    backend::LedgerBackend,
    config::QueueConfig,
    observability::ObservabilityLayer,
};

/// Lease expiry reaper: makes jobs held by dead or hung workers claimable again.
///
/// Stateless; any number of reapers may run against the same ledger.
pub struct LeaseReaper<B: LedgerBackend + ?Sized> {
    backend: Arc<B>,
    lease: Duration,
    interval: Duration,
    observability: ObservabilityLayer,
}

impl<B: LedgerBackend + ?Sized + 'static> LeaseReaper<B> {
    /// Reaper using the lease and interval of a validated configuration
    pub fn new(backend: Arc<B>, config: &QueueConfig) -> QueueResult<Self> {
        Self::with_interval(backend, config.lease_duration, config.reaper_interval)
    }

    pub fn with_interval(backend: Arc<B>, lease: Duration, interval: Duration) -> QueueResult<Self> {
        if interval.is_zero() || interval >= lease {
            return Err(QueueError::InvalidConfig(format!(
                "reaper interval ({:?}) must be positive and shorter than the lease ({:?})",
                interval, lease
            )));
        }

        Ok(Self {
            backend,
            lease,
            interval,
            observability: ObservabilityLayer::new(),
        })
    }

    pub fn with_observability(mut self, observability: ObservabilityLayer) -> Self {
        self.observability = observability;
        self
    }

    /// Run one reaper cycle
    pub async fn reap_once(&self) -> QueueResult<u64> {
        let reclaimed = self.backend.reclaim_expired(self.lease, Utc::now()).await?;

        if reclaimed > 0 {
            self.observability.record_leases_reclaimed(reclaimed);
            info!("Reclaimed {} expired leases", reclaimed);
        } else {
            debug!("No expired leases found");
        }

        Ok(reclaimed)
    }

    /// Tick until shutdown; errors are logged and the next tick tries again
    pub fn spawn(self) -> ReaperHandle
    where
        B: Send + Sync,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Starting lease reaper with interval: {:?}", self.interval);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.reap_once().await {
                            warn!("Error during lease reaping: {}", e);
                        }
                    }
                }
            }

            info!("Lease reaper stopped");
        });

        ReaperHandle {
            shutdown_tx,
            join_handle,
        }
    }
}

/// Handle for stopping a spawned [`LeaseReaper`]
pub struct ReaperHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Reaper join error: {}", e)))
    }
}
