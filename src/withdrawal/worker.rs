//! Reconcile Worker
//!
//! Background worker that scans for withdrawals stuck in non-terminal
//! statuses with a gateway transfer code and reconciles them against
//! gateway truth. Uses the exact same `verify` path as the admin action, so
//! there is a single balance-mutation code path.
//!
//! Each scan also re-drives the ledger commit/release owed by PAID/FAILED
//! requests whose settlement didn't land (a ledger error after the status
//! CAS), so locked funds never stay stuck.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::engine::LifecycleEngine;

/// Configuration for the reconcile worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for stale requests
    pub scan_interval: Duration,
    /// How long a request must sit untouched to be considered stale
    pub stale_threshold: Duration,
    /// Maximum requests to reconcile per scan
    pub batch_size: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(120),
            batch_size: 100,
        }
    }
}

pub struct ReconcileWorker {
    engine: Arc<LifecycleEngine>,
    config: WorkerConfig,
}

impl ReconcileWorker {
    pub fn new(engine: Arc<LifecycleEngine>, config: WorkerConfig) -> Self {
        Self { engine, config }
    }

    pub fn with_defaults(engine: Arc<LifecycleEngine>) -> Self {
        Self::new(engine, WorkerConfig::default())
    }

    /// Run the reconcile loop forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting reconcile worker"
        );

        loop {
            if let Err(e) = self.scan_and_reconcile().await {
                error!(error = %e, "Reconcile scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan cycle; returns how many requests changed status or
    /// had an owed ledger settlement applied
    pub async fn scan_and_reconcile(&self) -> Result<usize, super::error::WithdrawalError> {
        let settled = self.settle_owed_ledger_ops().await?;

        let stale = self
            .engine
            .store()
            .find_stale(self.config.stale_threshold, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            debug!("No stale withdrawals found");
            return Ok(settled);
        }

        info!(count = stale.len(), "Found stale withdrawals to reconcile");

        let mut corrected = 0;
        for record in stale {
            match self.engine.verify(record.id, None).await {
                Ok(outcome) if outcome.changed => {
                    info!(
                        request_id = %record.id,
                        old_status = %record.status,
                        new_status = %outcome.record.status,
                        "Withdrawal status reconciled"
                    );
                    corrected += 1;
                }
                Ok(_) => {
                    debug!(request_id = %record.id, "Withdrawal already in sync");
                }
                Err(e) => {
                    // Leave it for the next scan; gateway calls are safe to
                    // retry verbatim.
                    error!(request_id = %record.id, error = %e, "Failed to reconcile withdrawal");
                }
            }
        }

        if corrected > 0 {
            info!(count = corrected, "Reconciled withdrawals this scan");
        }
        Ok(settled + corrected)
    }

    /// Re-drive owed ledger commits/releases flagged by won PAID/FAILED
    /// transitions; returns how many landed this pass
    async fn settle_owed_ledger_ops(&self) -> Result<usize, super::error::WithdrawalError> {
        let unsettled = self
            .engine
            .store()
            .find_unsettled(self.config.batch_size)
            .await?;

        let mut settled = 0;
        for record in unsettled {
            match self.engine.retry_ledger_settlement(record.id).await {
                Ok(true) => settled += 1,
                Ok(false) => {}
                Err(e) => {
                    // Stays flagged; next scan retries.
                    error!(request_id = %record.id, error = %e, "Owed ledger settlement still failing");
                }
            }
        }

        if settled > 0 {
            info!(count = settled, "Applied owed ledger settlements this scan");
        }
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(60));
        assert_eq!(config.stale_threshold, Duration::from_secs(120));
        assert_eq!(config.batch_size, 100);
    }
}
