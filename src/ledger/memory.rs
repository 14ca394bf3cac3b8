//! In-memory ledger store
//!
//! Same contract as the Postgres store, with every operation applied under one
//! lock so each call is atomic. Used by tests and local dry runs; includes
//! failure injection for the credit and paired-record paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::LedgerStore;
use super::error::LedgerError;
use super::models::{
    ClaimOutcome, CompletionOutcome, CreditOutcome, CreditRequest, ProcessedTransaction, Wallet, WithdrawalJob,
    WithdrawalRequest, WorkerRegistration, WorkerStatus,
};
use super::postgres::DEBIT_SHORTFALL;
use crate::withdraw::state::JobStatus;

#[derive(Default)]
struct State {
    wallets: BTreeMap<String, Wallet>,
    processed: HashMap<String, ProcessedTransaction>,
    jobs: BTreeMap<i64, WithdrawalJob>,
    requests: HashMap<i64, WithdrawalRequest>,
    workers: HashMap<String, WorkerRegistration>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
    fail_credits: AtomicBool,
    fail_request_sync: AtomicBool,
    unavailable: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_wallet(&self, address: &str, owner_id: i64, balance: Decimal) {
        self.state.lock().await.wallets.insert(
            address.to_string(),
            Wallet {
                address: address.to_string(),
                owner_id,
                balance,
            },
        );
    }

    pub async fn wallet(&self, address: &str) -> Option<Wallet> {
        self.state.lock().await.wallets.get(address).cloned()
    }

    pub async fn processed(&self) -> Vec<ProcessedTransaction> {
        self.state.lock().await.processed.values().cloned().collect()
    }

    /// Insert a `pending` job the way the request side would, with its paired record
    pub async fn submit_withdrawal(
        &self,
        owner_id: i64,
        to_address: &str,
        amount: Decimal,
        fee: Decimal,
    ) -> i64 {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let request_id = state.next_id();
        state.requests.insert(
            request_id,
            WithdrawalRequest {
                id: request_id,
                owner_id,
                status: JobStatus::Pending.as_str().to_string(),
                tx_id: None,
                error: None,
                updated_at: now,
            },
        );
        let id = state.next_id();
        state.jobs.insert(
            id,
            WithdrawalJob {
                id,
                request_id: Some(request_id),
                owner_id,
                to_address: to_address.to_string(),
                amount,
                fee,
                status: JobStatus::Pending,
                tx_id: None,
                error: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub async fn request(&self, request_id: i64) -> Option<WithdrawalRequest> {
        self.state.lock().await.requests.get(&request_id).cloned()
    }

    /// Backdate a job's `updated_at`, as if its dispatcher died long ago
    pub async fn backdate_job(&self, job_id: i64, updated_at: DateTime<Utc>) {
        if let Some(job) = self.state.lock().await.jobs.get_mut(&job_id) {
            job.updated_at = updated_at;
        }
    }

    pub async fn worker(&self, worker_id: &str) -> Option<WorkerRegistration> {
        self.state.lock().await.workers.get(worker_id).cloned()
    }

    /// Make the next credits fail before anything is written
    pub fn fail_credits(&self, fail: bool) {
        self.fail_credits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_request_sync(&self, fail: bool) {
        self.fail_request_sync.store(fail, Ordering::SeqCst);
    }

    /// Every operation fails, as with a lost database connection
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn list_wallets(
        &self,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Wallet>, LedgerError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let iter: Box<dyn Iterator<Item = &Wallet> + Send> = match after {
            Some(after) => Box::new(
                state
                    .wallets
                    .range::<str, _>((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                    .map(|(_, w)| w),
            ),
            None => Box::new(state.wallets.values()),
        };
        Ok(iter.take(limit as usize).cloned().collect())
    }

    async fn credit_deposit(&self, credit: &CreditRequest) -> Result<CreditOutcome, LedgerError> {
        self.check_available()?;
        if credit.amount.is_sign_negative() {
            return Err(LedgerError::InvalidAmount(credit.amount.to_string()));
        }
        if self.fail_credits.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("injected credit failure".into()));
        }

        let mut state = self.state.lock().await;
        if state.processed.contains_key(&credit.tx_id) {
            return Ok(CreditOutcome::AlreadyCredited);
        }
        let wallet = state
            .wallets
            .get_mut(&credit.address)
            .ok_or_else(|| LedgerError::WalletNotFound(credit.address.clone()))?;
        wallet.balance += credit.amount;

        state.processed.insert(
            credit.tx_id.clone(),
            ProcessedTransaction {
                tx_id: credit.tx_id.clone(),
                owner_id: credit.owner_id,
                amount: credit.amount,
                address: credit.address.clone(),
            },
        );
        Ok(CreditOutcome::Credited)
    }

    async fn pending_jobs(
        &self,
        limit: u32,
        exclude_owners: &[i64],
    ) -> Result<Vec<WithdrawalJob>, LedgerError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && !exclude_owners.contains(&j.owner_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<WithdrawalJob>, LedgerError> {
        self.check_available()?;
        Ok(self.state.lock().await.jobs.get(&job_id).cloned())
    }

    async fn claim_job(&self, job_id: i64) -> Result<ClaimOutcome, LedgerError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let owner_id = match state.jobs.get(&job_id) {
            Some(job) if job.status.can_transition_to(JobStatus::Processing) => job.owner_id,
            _ => return Ok(ClaimOutcome::NotPending),
        };

        let reserved: Decimal = state
            .jobs
            .values()
            .filter(|j| j.owner_id == owner_id && j.status == JobStatus::Processing)
            .map(WithdrawalJob::total_debit)
            .sum();
        let balance = state
            .wallets
            .values()
            .find(|w| w.owner_id == owner_id)
            .map(|w| w.balance);

        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.status = JobStatus::Processing;
            job.updated_at = Utc::now();
        }
        Ok(ClaimOutcome::Claimed {
            available: balance.map(|b| b - reserved),
        })
    }

    async fn complete_job(
        &self,
        job_id: i64,
        tx_id: &str,
        debit: Decimal,
    ) -> Result<CompletionOutcome, LedgerError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let owner_id = match state.jobs.get(&job_id) {
            Some(job) if job.status.can_transition_to(JobStatus::Completed) => job.owner_id,
            _ => return Ok(CompletionOutcome::NotProcessing),
        };

        let debited = match state.wallets.values_mut().find(|w| w.owner_id == owner_id) {
            Some(wallet) if wallet.balance >= debit => {
                wallet.balance -= debit;
                true
            }
            _ => false,
        };

        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.status = JobStatus::Completed;
            job.tx_id = Some(tx_id.to_string());
            job.error = (!debited).then(|| DEBIT_SHORTFALL.to_string());
            job.updated_at = Utc::now();
        }
        Ok(CompletionOutcome::Completed { debited })
    }

    async fn fail_job(&self, job_id: i64, reason: &str) -> Result<bool, LedgerError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status.can_transition_to(JobStatus::Failed) => {
                job.status = JobStatus::Failed;
                job.error = Some(reason.to_string());
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sync_withdrawal_request(&self, job: &WithdrawalJob) -> Result<bool, LedgerError> {
        self.check_available()?;
        if self.fail_request_sync.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("injected request sync failure".into()));
        }
        let Some(request_id) = job.request_id else {
            return Ok(false);
        };

        let mut state = self.state.lock().await;
        match state.requests.get_mut(&request_id) {
            Some(request) => {
                request.status = job.status.as_str().to_string();
                request.tx_id = job.tx_id.clone();
                request.error = job.error.clone();
                request.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fail_stale_jobs(
        &self,
        older_than: Duration,
        reason: &str,
    ) -> Result<Vec<WithdrawalJob>, LedgerError> {
        self.check_available()?;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| LedgerError::InvalidAmount(e.to_string()))?;

        let mut state = self.state.lock().await;
        let mut failed = Vec::new();
        for job in state.jobs.values_mut() {
            if job.status.can_transition_to(JobStatus::Failed) && job.updated_at < cutoff {
                job.status = JobStatus::Failed;
                job.error = Some(reason.to_string());
                job.updated_at = Utc::now();
                failed.push(job.clone());
            }
        }
        Ok(failed)
    }

    async fn upsert_worker(&self, registration: &WorkerRegistration) -> Result<(), LedgerError> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .workers
            .insert(registration.worker_id.clone(), registration.clone());
        Ok(())
    }

    async fn heartbeat_worker(&self, worker_id: &str) -> Result<bool, LedgerError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        match state.workers.get_mut(worker_id) {
            Some(worker) => {
                worker.last_heartbeat = Utc::now();
                worker.status = WorkerStatus::Running;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_worker_stopped(&self, worker_id: &str) -> Result<(), LedgerError> {
        self.check_available()?;
        if let Some(worker) = self.state.lock().await.workers.get_mut(worker_id) {
            worker.status = WorkerStatus::Stopped;
            worker.last_heartbeat = Utc::now();
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wallet_pagination_is_ordered_and_complete() {
        let ledger = MemoryLedger::new();
        for (i, addr) in ["TC", "TA", "TE", "TB", "TD"].iter().enumerate() {
            ledger.add_wallet(addr, i as i64, Decimal::ZERO).await;
        }

        let first = ledger.list_wallets(None, 2).await.unwrap();
        let second = ledger.list_wallets(Some("TB"), 2).await.unwrap();
        let third = ledger.list_wallets(Some("TD"), 2).await.unwrap();

        let seen: Vec<_> = first
            .iter()
            .chain(&second)
            .chain(&third)
            .map(|w| w.address.as_str())
            .collect();
        assert_eq!(seen, vec!["TA", "TB", "TC", "TD", "TE"]);
    }

    #[tokio::test]
    async fn test_credit_once() {
        let ledger = MemoryLedger::new();
        ledger.add_wallet("TW", 1, Decimal::from(10)).await;
        let credit = CreditRequest {
            tx_id: "abc".into(),
            address: "TW".into(),
            owner_id: 1,
            amount: Decimal::from(5),
        };

        assert_eq!(
            ledger.credit_deposit(&credit).await.unwrap(),
            CreditOutcome::Credited
        );
        assert_eq!(
            ledger.credit_deposit(&credit).await.unwrap(),
            CreditOutcome::AlreadyCredited
        );
        assert_eq!(ledger.wallet("TW").await.unwrap().balance, Decimal::from(15));
        assert_eq!(ledger.processed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_credit_is_not_half_applied() {
        let ledger = MemoryLedger::new();
        ledger.add_wallet("TW", 1, Decimal::ZERO).await;
        let credit = CreditRequest {
            tx_id: "abc".into(),
            address: "TW".into(),
            owner_id: 1,
            amount: Decimal::ONE,
        };

        ledger.fail_credits(true);
        assert!(ledger.credit_deposit(&credit).await.is_err());
        assert!(ledger.processed().await.is_empty());
        assert_eq!(ledger.wallet("TW").await.unwrap().balance, Decimal::ZERO);

        let orphan = CreditRequest {
            address: "TNowhere".into(),
            ..credit.clone()
        };
        ledger.fail_credits(false);
        assert!(matches!(
            ledger.credit_deposit(&orphan).await,
            Err(LedgerError::WalletNotFound(_))
        ));
        assert!(ledger.processed().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let ledger = Arc::new(MemoryLedger::new());
        let job = ledger
            .submit_withdrawal(1, "TDest", Decimal::ONE, Decimal::ZERO)
            .await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.claim_job(job).await }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_claimed() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_claim_reports_balance_net_of_processing_jobs() {
        let ledger = MemoryLedger::new();
        ledger.add_wallet("TW", 1, Decimal::from(100)).await;
        let first = ledger
            .submit_withdrawal(1, "TDest", Decimal::from(60), Decimal::ZERO)
            .await;
        let second = ledger
            .submit_withdrawal(1, "TDest", Decimal::from(59), Decimal::ONE)
            .await;
        let orphan = ledger
            .submit_withdrawal(2, "TDest", Decimal::ONE, Decimal::ZERO)
            .await;

        assert_eq!(
            ledger.claim_job(first).await.unwrap(),
            ClaimOutcome::Claimed {
                available: Some(Decimal::from(100))
            }
        );
        assert_eq!(
            ledger.claim_job(second).await.unwrap(),
            ClaimOutcome::Claimed {
                available: Some(Decimal::from(40))
            }
        );
        assert_eq!(
            ledger.claim_job(orphan).await.unwrap(),
            ClaimOutcome::Claimed { available: None }
        );

        // a failed job no longer holds funds
        assert!(ledger.fail_job(first, "rejected").await.unwrap());
        let third = ledger
            .submit_withdrawal(1, "TDest", Decimal::ONE, Decimal::ZERO)
            .await;
        assert_eq!(
            ledger.claim_job(third).await.unwrap(),
            ClaimOutcome::Claimed {
                available: Some(Decimal::from(40))
            }
        );
    }

    #[tokio::test]
    async fn test_pending_jobs_skip_excluded_owners() {
        let ledger = MemoryLedger::new();
        for _ in 0..3 {
            ledger
                .submit_withdrawal(7, "TDest", Decimal::ONE, Decimal::ZERO)
                .await;
        }
        let other = ledger
            .submit_withdrawal(8, "TDest", Decimal::ONE, Decimal::ZERO)
            .await;

        assert!(
            ledger
                .pending_jobs(2, &[])
                .await
                .unwrap()
                .iter()
                .all(|j| j.owner_id == 7)
        );
        let polled = ledger.pending_jobs(2, &[7]).await.unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].id, other);
    }

    #[tokio::test]
    async fn test_terminal_job_is_immutable() {
        let ledger = MemoryLedger::new();
        ledger.add_wallet("TW", 1, Decimal::from(10)).await;
        let job = ledger
            .submit_withdrawal(1, "TDest", Decimal::from(2), Decimal::ONE)
            .await;

        assert!(ledger.claim_job(job).await.unwrap().is_claimed());
        assert_eq!(
            ledger.complete_job(job, "tx1", Decimal::from(3)).await.unwrap(),
            CompletionOutcome::Completed { debited: true }
        );
        let snapshot = ledger.get_job(job).await.unwrap().unwrap();

        assert!(!ledger.claim_job(job).await.unwrap().is_claimed());
        assert!(!ledger.fail_job(job, "late").await.unwrap());
        assert_eq!(
            ledger.complete_job(job, "tx2", Decimal::ONE).await.unwrap(),
            CompletionOutcome::NotProcessing
        );
        assert!(
            ledger
                .fail_stale_jobs(Duration::ZERO, "stale")
                .await
                .unwrap()
                .is_empty()
        );

        assert_eq!(ledger.get_job(job).await.unwrap().unwrap(), snapshot);
        assert_eq!(ledger.wallet("TW").await.unwrap().balance, Decimal::from(7));
    }

    #[tokio::test]
    async fn test_debit_never_goes_negative() {
        let ledger = MemoryLedger::new();
        ledger.add_wallet("TW", 1, Decimal::ONE).await;
        let job = ledger
            .submit_withdrawal(1, "TDest", Decimal::from(5), Decimal::ZERO)
            .await;

        ledger.claim_job(job).await.unwrap();
        assert_eq!(
            ledger.complete_job(job, "tx", Decimal::from(5)).await.unwrap(),
            CompletionOutcome::Completed { debited: false }
        );
        assert_eq!(ledger.wallet("TW").await.unwrap().balance, Decimal::ONE);
        assert_eq!(
            ledger.get_job(job).await.unwrap().unwrap().error.as_deref(),
            Some(DEBIT_SHORTFALL)
        );
    }
}
