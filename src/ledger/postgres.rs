//! PostgreSQL ledger store
//!
//! Every cross-row invariant is a single statement or a single transaction:
//! dedup insert + credit, job claim (CAS + owner reservation), job
//! completion + owner debit.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::LedgerStore;
use super::error::LedgerError;
use super::models::{
    ClaimOutcome, CompletionOutcome, CreditOutcome, CreditRequest, Wallet, WithdrawalJob, WorkerRegistration,
    WorkerStatus,
};
use crate::withdraw::state::JobStatus;

const JOB_COLUMNS: &str = "id, request_id, owner_id, to_address, amount, fee, status, tx_id, error, created_at, updated_at";

/// Marker written into `error` of a completed job whose owner debit failed
pub const DEBIT_SHORTFALL: &str = "ledger debit shortfall: reconcile manually";

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_job(row: &PgRow) -> Result<WithdrawalJob, LedgerError> {
        let status: String = row.try_get("status")?;
        let status = status.parse::<JobStatus>().map_err(LedgerError::Corrupt)?;

        Ok(WithdrawalJob {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            owner_id: row.try_get("owner_id")?,
            to_address: row.try_get("to_address")?,
            amount: row.try_get("amount")?,
            fee: row.try_get("fee")?,
            status,
            tx_id: row.try_get("tx_id")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn list_wallets(
        &self,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Wallet>, LedgerError> {
        let rows = sqlx::query(
            r#"SELECT address, owner_id, balance FROM wallets
               WHERE $1::VARCHAR IS NULL OR address > $1
               ORDER BY address ASC
               LIMIT $2"#,
        )
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(Wallet {
                    address: r.try_get("address")?,
                    owner_id: r.try_get("owner_id")?,
                    balance: r.try_get("balance")?,
                })
            })
            .collect()
    }

    async fn credit_deposit(&self, credit: &CreditRequest) -> Result<CreditOutcome, LedgerError> {
        if credit.amount.is_sign_negative() {
            return Err(LedgerError::InvalidAmount(credit.amount.to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"INSERT INTO processed_transactions (tx_id, owner_id, amount, address)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (tx_id) DO NOTHING"#,
        )
        .bind(&credit.tx_id)
        .bind(credit.owner_id)
        .bind(credit.amount)
        .bind(&credit.address)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CreditOutcome::AlreadyCredited);
        }

        let updated = sqlx::query(
            r#"UPDATE wallets SET balance = balance + $1, updated_at = NOW()
               WHERE address = $2"#,
        )
        .bind(credit.amount)
        .bind(&credit.address)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // dropping the transaction rolls back the dedup row too
            return Err(LedgerError::WalletNotFound(credit.address.clone()));
        }

        tx.commit().await?;
        Ok(CreditOutcome::Credited)
    }

    async fn pending_jobs(
        &self,
        limit: u32,
        exclude_owners: &[i64],
    ) -> Result<Vec<WithdrawalJob>, LedgerError> {
        let sql = format!(
            r#"SELECT {} FROM withdrawal_jobs
               WHERE status = $1 AND owner_id <> ALL($2)
               ORDER BY created_at ASC, id ASC
               LIMIT $3"#,
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(JobStatus::Pending.as_str())
            .bind(exclude_owners)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<WithdrawalJob>, LedgerError> {
        let sql = format!("SELECT {} FROM withdrawal_jobs WHERE id = $1", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn claim_job(&self, job_id: i64) -> Result<ClaimOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let owner_id = sqlx::query_scalar::<_, i64>(
            "SELECT owner_id FROM withdrawal_jobs WHERE id = $1 AND status = $2",
        )
        .bind(job_id)
        .bind(JobStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(owner_id) = owner_id else {
            return Ok(ClaimOutcome::NotPending);
        };

        // same-owner claims queue here until the earlier one commits
        let balance = sqlx::query_scalar::<_, Decimal>(
            "SELECT balance FROM wallets WHERE owner_id = $1 FOR UPDATE",
        )
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await?;

        let claimed = sqlx::query(
            r#"UPDATE withdrawal_jobs SET status = $1, updated_at = NOW()
               WHERE id = $2 AND status = $3"#,
        )
        .bind(JobStatus::Processing.as_str())
        .bind(job_id)
        .bind(JobStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;
        if !claimed {
            return Ok(ClaimOutcome::NotPending);
        }

        let reserved = sqlx::query_scalar::<_, Decimal>(
            r#"SELECT COALESCE(SUM(amount + fee), 0) FROM withdrawal_jobs
               WHERE owner_id = $1 AND status = $2 AND id <> $3"#,
        )
        .bind(owner_id)
        .bind(JobStatus::Processing.as_str())
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT owner_id, status FROM withdrawal_jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Ok(CompletionOutcome::NotProcessing);
        };
        let status: String = row.try_get("status")?;
        if status != JobStatus::Processing.as_str() {
            return Ok(CompletionOutcome::NotProcessing);
        }
        let owner_id: i64 = row.try_get("owner_id")?;

        let debited = sqlx::query(
            r#"UPDATE wallets SET balance = balance - $1, updated_at = NOW()
               WHERE owner_id = $2 AND balance >= $1"#,
        )
        .bind(debit)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        sqlx::query(
            r#"UPDATE withdrawal_jobs
               SET status = $1, tx_id = $2, error = $3, updated_at = NOW()
               WHERE id = $4"#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(tx_id)
        .bind(if debited { None } else { Some(DEBIT_SHORTFALL) })
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CompletionOutcome::Completed { debited })
    }

    async fn fail_job(&self, job_id: i64, reason: &str) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"UPDATE withdrawal_jobs SET status = $1, error = $2, updated_at = NOW()
               WHERE id = $3 AND status = $4"#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(reason)
        .bind(job_id)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn sync_withdrawal_request(&self, job: &WithdrawalJob) -> Result<bool, LedgerError> {
        let Some(request_id) = job.request_id else {
            return Ok(false);
        };

        let result = sqlx::query(
            r#"UPDATE withdrawal_requests
               SET status = $1, tx_id = $2, error = $3, updated_at = NOW()
               WHERE id = $4"#,
        )
        .bind(job.status.as_str())
        .bind(&job.tx_id)
        .bind(&job.error)
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_stale_jobs(
        &self,
        older_than: Duration,
        reason: &str,
    ) -> Result<Vec<WithdrawalJob>, LedgerError> {
        let sql = format!(
            r#"UPDATE withdrawal_jobs SET status = $1, error = $2, updated_at = NOW()
               WHERE status = $3 AND updated_at < NOW() - INTERVAL '1 second' * $4
               RETURNING {}"#,
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(JobStatus::Failed.as_str())
            .bind(reason)
            .bind(JobStatus::Processing.as_str())
            .bind(older_than.as_secs() as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn upsert_worker(&self, registration: &WorkerRegistration) -> Result<(), LedgerError> {
        sqlx::query(
            r#"INSERT INTO worker_registry (id, type, status, host, pid, last_heartbeat, config)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (id) DO UPDATE
               SET type = EXCLUDED.type,
                   status = EXCLUDED.status,
                   host = EXCLUDED.host,
                   pid = EXCLUDED.pid,
                   last_heartbeat = EXCLUDED.last_heartbeat,
                   config = EXCLUDED.config"#,
        )
        .bind(&registration.worker_id)
        .bind(&registration.worker_type)
        .bind(registration.status.as_str())
        .bind(&registration.host)
        .bind(registration.pid as i32)
        .bind(registration.last_heartbeat)
        .bind(Json(&registration.config))
        .execute(&self.pool)
        .await?;

        info!(worker_id = %registration.worker_id, "Worker registered");
        Ok(())
    }

    async fn heartbeat_worker(&self, worker_id: &str) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"UPDATE worker_registry SET last_heartbeat = NOW(), status = $1
               WHERE id = $2"#,
        )
        .bind(WorkerStatus::Running.as_str())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        debug!(worker_id, "Heartbeat written");
        Ok(result.rows_affected() > 0)
    }

    async fn mark_worker_stopped(&self, worker_id: &str) -> Result<(), LedgerError> {
        sqlx::query("UPDATE worker_registry SET status = $1, last_heartbeat = NOW() WHERE id = $2")
            .bind(WorkerStatus::Stopped.as_str())
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
