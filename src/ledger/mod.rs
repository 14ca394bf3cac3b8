//! Ledger Store
//!
//! Wallet balances, the dedup ledger, withdrawal jobs and the worker
//! registry. The scanner and dispatcher coordinate only through these
//! operations, so each one that touches more than one row is atomic.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use models::{
    ClaimOutcome, CompletionOutcome, CreditOutcome, CreditRequest, ProcessedTransaction, Wallet, WithdrawalJob,
    WithdrawalRequest, WorkerRegistration, WorkerStatus,
};
pub use postgres::PgLedger;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Wallets ordered by address, strictly after `after`
    async fn list_wallets(&self, after: Option<&str>, limit: u32)
    -> Result<Vec<Wallet>, LedgerError>;

    /// Insert the dedup row and credit the wallet in one transaction.
    /// A known tx id is `AlreadyCredited`; any error leaves nothing written.
    async fn credit_deposit(&self, credit: &CreditRequest) -> Result<CreditOutcome, LedgerError>;

    /// Oldest `pending` jobs first, skipping jobs of `exclude_owners`
    async fn pending_jobs(
        &self,
        limit: u32,
        exclude_owners: &[i64],
    ) -> Result<Vec<WithdrawalJob>, LedgerError>;

    async fn get_job(&self, job_id: i64) -> Result<Option<WithdrawalJob>, LedgerError>;

    /// `pending -> processing`, reporting the owner's unreserved balance.
    /// Claims for the same owner are serialized, so two claims never both
    /// see funds only one of them can spend.
    async fn claim_job(&self, job_id: i64) -> Result<ClaimOutcome, LedgerError>;

    /// `processing -> completed` with tx id, debiting the owner in the same transaction
    async fn complete_job(
        &self,
        job_id: i64,
        tx_id: &str,
        debit: Decimal,
    ) -> Result<CompletionOutcome, LedgerError>;

    /// `processing -> failed` with reason; false if the job was not processing
    async fn fail_job(&self, job_id: i64, reason: &str) -> Result<bool, LedgerError>;

    /// Mirror a job's terminal state onto its paired request record.
    /// False when the job has no paired record or it no longer exists.
    async fn sync_withdrawal_request(&self, job: &WithdrawalJob) -> Result<bool, LedgerError>;

    /// Move jobs stuck in `processing` longer than `older_than` to `failed`
    async fn fail_stale_jobs(
        &self,
        older_than: Duration,
        reason: &str,
    ) -> Result<Vec<WithdrawalJob>, LedgerError>;

    async fn upsert_worker(&self, registration: &WorkerRegistration) -> Result<(), LedgerError>;

    /// False if the registration row is gone
    async fn heartbeat_worker(&self, worker_id: &str) -> Result<bool, LedgerError>;

    async fn mark_worker_stopped(&self, worker_id: &str) -> Result<(), LedgerError>;

    async fn ping(&self) -> Result<(), LedgerError>;
}
