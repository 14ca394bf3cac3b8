//! Stale Job Sweeper
//!
//! Background worker that fails jobs stuck in `processing`.
//!
//! A job only stays in `processing` if its dispatcher died between claim and
//! terminal write. Whether the broadcast went out is unknown, so the job is
//! failed with a reconcile marker instead of being re-queued.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::cycle;
use crate::ledger::{LedgerError, LedgerStore};
use crate::metrics::Metrics;
use crate::shutdown::Shutdown;

pub const STALE_REASON: &str = "stale: dispatcher lost during processing, reconcile manually";

/// Configuration for the sweeper
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to look for stuck jobs
    pub sweep_interval: Duration,
    /// How long a job must sit in `processing` to be considered lost
    pub stale_timeout: Duration,
}

pub struct StaleJobSweeper {
    ledger: Arc<dyn LedgerStore>,
    config: SweeperConfig,
    metrics: Arc<Metrics>,
}

impl StaleJobSweeper {
    pub fn new(ledger: Arc<dyn LedgerStore>, config: SweeperConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            ledger,
            config,
            metrics,
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            stale_timeout_secs = self.config.stale_timeout.as_secs(),
            "Starting stale job sweeper"
        );

        let sweeper = self.clone();
        cycle::run_periodic("stale_job_sweeper", self.config.sweep_interval, shutdown, move || {
            let sweeper = sweeper.clone();
            async move {
                if let Err(e) = sweeper.sweep_once().await {
                    error!(error = %e, "Stale job sweep failed");
                }
            }
        })
        .await;
    }

    /// Fail every stuck job; returns how many were failed
    pub async fn sweep_once(&self) -> Result<usize, LedgerError> {
        let stale = self
            .ledger
            .fail_stale_jobs(self.config.stale_timeout, STALE_REASON)
            .await?;

        if stale.is_empty() {
            debug!("No stale withdrawal jobs");
            return Ok(0);
        }

        for job in &stale {
            error!(
                job_id = job.id,
                owner_id = job.owner_id,
                to = %job.to_address,
                amount = %job.amount,
                reconcile = true,
                "Withdrawal stuck in processing marked failed; check chain for the transfer"
            );
            self.metrics.stale_jobs_failed.inc();
            self.metrics.reconcile_required.inc();

            if job.request_id.is_some() {
                match self.ledger.sync_withdrawal_request(job).await {
                    Ok(true) => {}
                    Ok(false) => error!(
                        job_id = job.id,
                        request_id = ?job.request_id,
                        reconcile = true,
                        "Paired withdrawal request not found"
                    ),
                    Err(e) => error!(
                        job_id = job.id,
                        request_id = ?job.request_id,
                        error = %e,
                        reconcile = true,
                        "Failed to mirror stale failure onto paired request"
                    ),
                }
            }
        }

        info!(count = stale.len(), "Failed stale withdrawal jobs");
        Ok(stale.len())
    }
}
