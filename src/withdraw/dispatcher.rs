//! Withdrawal Dispatcher - executes each queued withdrawal exactly once
//!
//! Per cycle: poll pending jobs (skipping owners at their velocity limit),
//! read the hot wallet balance once, then per job: claim (CAS pending ->
//! processing, reserving the owner's funds), validate, check funds,
//! broadcast once, write the terminal state, mirror it to the paired request
//! record. A job is never broadcast twice; a failed job stays failed and the
//! request side creates a new job to retry.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::error::WithdrawError;
use super::state::JobStatus;
use super::validation::{validate_address, validate_amounts};
use crate::chain::ChainClient;
use crate::cycle::{self, CycleGuard};
use crate::ledger::{ClaimOutcome, CompletionOutcome, LedgerStore, WithdrawalJob};
use crate::metrics::{LoopKind, Metrics};
use crate::money::TokenUnits;
use crate::shutdown::Shutdown;
use crate::ttl_store::TtlCounterStore;

/// Ledger writes after a broadcast are retried this many times before
/// the job is left for manual reconciliation
const TERMINAL_WRITE_ATTEMPTS: u32 = 3;
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub hot_wallet: String,
    pub units: TokenUnits,
    pub batch_size: u32,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub min_withdrawal: Decimal,
    pub max_withdrawal: Decimal,
    /// Claims per owner per window; `None` disables the limit
    pub owner_limit: Option<OwnerLimit>,
}

#[derive(Debug, Clone, Copy)]
pub struct OwnerLimit {
    pub max_claims: u32,
    pub window: Duration,
}

/// Hot wallet funds a cycle may still commit to broadcasts
///
/// Each broadcast reserves its amount first, so concurrent jobs in one cycle
/// never count the same funds twice. A reservation is kept once the
/// broadcast is attempted.
#[derive(Debug)]
pub struct HotWalletBudget {
    remaining: Mutex<u128>,
}

impl HotWalletBudget {
    pub fn new(raw: u128) -> Self {
        Self {
            remaining: Mutex::new(raw),
        }
    }

    /// Take `raw` from the budget; `Err` carries what is left
    fn try_reserve(&self, raw: u128) -> Result<(), u128> {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        if *remaining < raw {
            return Err(*remaining);
        }
        *remaining -= raw;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { tx_id: String },
    Failed { reason: String },
    /// Another dispatcher claimed it first
    ClaimLost,
    /// Owner over the velocity limit; left pending
    Deferred,
    /// Ledger unreachable; job state unknown to this cycle
    Error,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub jobs: u64,
    pub completed: u64,
    pub failed: u64,
    pub claim_lost: u64,
    pub deferred: u64,
    pub errors: u64,
}

impl DispatchReport {
    fn record(&mut self, outcome: &JobOutcome) {
        self.jobs += 1;
        match outcome {
            JobOutcome::Completed { .. } => self.completed += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::ClaimLost => self.claim_lost += 1,
            JobOutcome::Deferred => self.deferred += 1,
            JobOutcome::Error => self.errors += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed(DispatchReport),
    Skipped,
    /// Pending jobs could not be read
    PollFailed,
    /// Hot wallet balance could not be read; nothing was claimed
    HotWalletUnavailable,
}

pub struct WithdrawalDispatcher {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<dyn LedgerStore>,
    settings: DispatcherSettings,
    metrics: Arc<Metrics>,
    guard: CycleGuard,
    owner_claims: Option<TtlCounterStore<i64>>,
}

impl WithdrawalDispatcher {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<dyn LedgerStore>,
        settings: DispatcherSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        let owner_claims = settings
            .owner_limit
            .map(|limit| TtlCounterStore::new(limit.window));
        Self {
            chain,
            ledger,
            settings,
            metrics,
            guard: CycleGuard::new(),
            owner_claims,
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        info!(
            hot_wallet = %self.settings.hot_wallet,
            batch_size = self.settings.batch_size,
            concurrency = self.settings.concurrency,
            "Withdrawal dispatcher starting"
        );

        let dispatcher = self.clone();
        cycle::run_periodic(
            LoopKind::WithdrawalDispatcher.as_str(),
            self.settings.poll_interval,
            shutdown,
            move || {
                let dispatcher = dispatcher.clone();
                async move {
                    dispatcher.dispatch_once().await;
                }
            },
        )
        .await;
    }

    pub async fn dispatch_once(&self) -> DispatchOutcome {
        let Some(_permit) = self.guard.try_enter() else {
            self.metrics.dispatch_cycles_skipped.inc();
            warn!("Previous dispatch cycle still running, skipping this tick");
            return DispatchOutcome::Skipped;
        };

        let exhausted = self.exhausted_owners();
        let jobs = match self
            .ledger
            .pending_jobs(self.settings.batch_size, &exhausted)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to poll pending withdrawal jobs");
                return DispatchOutcome::PollFailed;
            }
        };

        let mut report = DispatchReport::default();
        if !jobs.is_empty() {
            let budget = match self.chain.token_balance(&self.settings.hot_wallet).await {
                Ok(raw) => HotWalletBudget::new(raw),
                Err(e) => {
                    error!(
                        error = %e,
                        pending = jobs.len(),
                        "Hot wallet balance unavailable, leaving jobs pending"
                    );
                    return DispatchOutcome::HotWalletUnavailable;
                }
            };

            let outcomes: Vec<JobOutcome> =
                stream::iter(jobs.into_iter().map(|job| self.process_job(job, &budget)))
                    .buffer_unordered(self.settings.concurrency)
                    .collect()
                    .await;
            for outcome in &outcomes {
                report.record(outcome);
            }
            info!(
                jobs = report.jobs,
                completed = report.completed,
                failed = report.failed,
                claim_lost = report.claim_lost,
                deferred = report.deferred,
                "Dispatch cycle finished"
            );
        }

        self.metrics.dispatch_cycles.inc();
        self.metrics.record_cycle(LoopKind::WithdrawalDispatcher);
        DispatchOutcome::Completed(report)
    }

    /// Owners already at their velocity limit; their jobs stay out of the poll
    fn exhausted_owners(&self) -> Vec<i64> {
        match (&self.owner_claims, self.settings.owner_limit) {
            (Some(store), Some(limit)) => {
                store.purge_expired();
                store.exhausted(limit.max_claims)
            }
            _ => Vec::new(),
        }
    }

    /// Claim and execute one job against this cycle's hot wallet budget
    pub async fn process_job(&self, job: WithdrawalJob, budget: &HotWalletBudget) -> JobOutcome {
        if let (Some(store), Some(limit)) = (&self.owner_claims, self.settings.owner_limit)
            && !store.try_acquire(&job.owner_id, limit.max_claims)
        {
            debug!(job_id = job.id, owner_id = job.owner_id, "Owner over withdrawal velocity limit, deferring");
            self.metrics.jobs_deferred.inc();
            return JobOutcome::Deferred;
        }

        let available = match self.ledger.claim_job(job.id).await {
            Ok(ClaimOutcome::Claimed { available }) => available,
            Ok(ClaimOutcome::NotPending) => {
                self.release_owner_slot(job.owner_id);
                debug!(job_id = job.id, "Job already claimed elsewhere");
                self.metrics.claim_conflicts.inc();
                return JobOutcome::ClaimLost;
            }
            Err(e) => {
                self.release_owner_slot(job.owner_id);
                error!(job_id = job.id, error = %e, "Failed to claim job");
                return JobOutcome::Error;
            }
        };
        self.metrics.jobs_claimed.inc();
        info!(
            job_id = job.id,
            owner_id = job.owner_id,
            to = %job.to_address,
            amount = %job.amount,
            "Withdrawal claimed"
        );

        match self.execute(&job, available, budget).await {
            Ok(tx_id) => self.finish_completed(job, tx_id).await,
            Err(e) => self.finish_failed(job, e).await,
        }
    }

    fn release_owner_slot(&self, owner_id: i64) {
        if let Some(store) = &self.owner_claims {
            store.release(&owner_id);
        }
    }

    /// Validation and funds checks, then a single broadcast.
    ///
    /// `available` is the owner's balance net of their other in-flight jobs,
    /// as read by the claim.
    async fn execute(
        &self,
        job: &WithdrawalJob,
        available: Option<Decimal>,
        budget: &HotWalletBudget,
    ) -> Result<String, WithdrawError> {
        validate_address(&job.to_address)?;
        validate_amounts(job, self.settings.min_withdrawal, self.settings.max_withdrawal)?;
        let raw_amount = self.settings.units.to_raw(job.amount)?;

        let available = available.ok_or(WithdrawError::UnknownOwner(job.owner_id))?;
        if available < job.total_debit() {
            return Err(WithdrawError::InsufficientOwnerBalance {
                owner_id: job.owner_id,
                needed: job.total_debit(),
                available,
            });
        }

        if let Err(left) = budget.try_reserve(raw_amount) {
            return Err(WithdrawError::InsufficientHotWallet {
                needed: job.amount,
                available: self.settings.units.to_ledger(left)?,
            });
        }

        self.chain
            .broadcast_transfer(&job.to_address, raw_amount)
            .await
            .map_err(WithdrawError::Broadcast)
    }

    async fn finish_completed(&self, mut job: WithdrawalJob, tx_id: String) -> JobOutcome {
        info!(job_id = job.id, tx_id = %tx_id, "Withdrawal broadcast");

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self
                .ledger
                .complete_job(job.id, &tx_id, job.total_debit())
                .await
            {
                Ok(outcome) => break Some(outcome),
                Err(e) if attempt < TERMINAL_WRITE_ATTEMPTS => {
                    warn!(job_id = job.id, attempt, error = %e, "Completion write failed, retrying");
                    tokio::time::sleep(TERMINAL_WRITE_BACKOFF * attempt).await;
                }
                Err(e) => {
                    error!(
                        job_id = job.id,
                        tx_id = %tx_id,
                        error = %e,
                        reconcile = true,
                        "Broadcast succeeded but completion could not be recorded"
                    );
                    break None;
                }
            }
        };

        match outcome {
            Some(CompletionOutcome::Completed { debited }) => {
                if !debited {
                    error!(
                        job_id = job.id,
                        owner_id = job.owner_id,
                        debit = %job.total_debit(),
                        reconcile = true,
                        "Owner balance could not cover the debit of a completed withdrawal"
                    );
                    self.metrics.reconcile_required.inc();
                }
                self.metrics.jobs_completed.inc();
                job.status = JobStatus::Completed;
                job.tx_id = Some(tx_id.clone());
                job.error = None;
                if let Ok(Some(stored)) = self.ledger.get_job(job.id).await {
                    job = stored;
                }
                self.sync_request(&job).await;
                JobOutcome::Completed { tx_id }
            }
            Some(CompletionOutcome::NotProcessing) => {
                error!(
                    job_id = job.id,
                    tx_id = %tx_id,
                    reconcile = true,
                    "Broadcast succeeded but job had already left processing"
                );
                self.metrics.reconcile_required.inc();
                JobOutcome::Error
            }
            None => {
                self.metrics.reconcile_required.inc();
                JobOutcome::Error
            }
        }
    }

    async fn finish_failed(&self, mut job: WithdrawalJob, err: WithdrawError) -> JobOutcome {
        let reason = err.to_string();
        if err.is_ambiguous() {
            error!(
                job_id = job.id,
                to = %job.to_address,
                amount = %job.amount,
                error = %err,
                reconcile = true,
                "Broadcast failed; transfer may still land on chain"
            );
            self.metrics.reconcile_required.inc();
        } else {
            warn!(job_id = job.id, error = %err, "Withdrawal rejected before broadcast");
        }

        match self.ledger.fail_job(job.id, &reason).await {
            Ok(true) => {
                self.metrics.jobs_failed.inc();
                job.status = JobStatus::Failed;
                job.error = Some(reason.clone());
                self.sync_request(&job).await;
                JobOutcome::Failed { reason }
            }
            Ok(false) => {
                warn!(job_id = job.id, "Job left processing before it could be failed");
                JobOutcome::Error
            }
            Err(e) => {
                error!(
                    job_id = job.id,
                    error = %e,
                    reason = %reason,
                    reconcile = true,
                    "Failed to record withdrawal failure; job stays processing until the stale sweep"
                );
                JobOutcome::Error
            }
        }
    }

    /// Mirror the terminal job onto its paired request record
    async fn sync_request(&self, job: &WithdrawalJob) {
        if job.request_id.is_none() {
            return;
        }
        match self.ledger.sync_withdrawal_request(job).await {
            Ok(true) => debug!(job_id = job.id, "Paired request updated"),
            Ok(false) => {
                error!(
                    job_id = job.id,
                    request_id = ?job.request_id,
                    status = %job.status,
                    reconcile = true,
                    "Paired withdrawal request not found"
                );
                self.metrics.reconcile_required.inc();
            }
            Err(e) => {
                error!(
                    job_id = job.id,
                    request_id = ?job.request_id,
                    status = %job.status,
                    tx_id = ?job.tx_id,
                    error = %e,
                    reconcile = true,
                    "Job is terminal but its paired request could not be updated"
                );
                self.metrics.reconcile_required.inc();
            }
        }
    }
}
