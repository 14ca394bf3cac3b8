use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::withdraw::state::JobStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wallet {
    pub address: String,
    pub owner_id: i64,
    pub balance: Decimal,
}

/// Dedup ledger row; its existence is the only proof a tx was credited
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedTransaction {
    pub tx_id: String,
    pub owner_id: i64,
    pub amount: Decimal,
    pub address: String,
}

/// Insert-dedup-row-and-credit request, applied atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditRequest {
    pub tx_id: String,
    pub address: String,
    pub owner_id: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited,
    /// tx id already in the dedup ledger; nothing changed
    AlreadyCredited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Job is now `processing`. `available` is the owner's balance minus what
    /// their other `processing` jobs will debit, read in the same transaction
    /// as the claim; `None` when the owner has no wallet.
    Claimed { available: Option<Decimal> },
    /// Job was not `pending`; someone else got there first
    NotPending,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Job is now `completed`. `debited` is false when the owner's wallet
    /// could not cover the debit; the job records that for reconciliation.
    Completed { debited: bool },
    /// Job was not in `processing`; nothing changed
    NotProcessing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalJob {
    pub id: i64,
    /// Paired `withdrawal_requests` row, when the request side created one
    pub request_id: Option<i64>,
    pub owner_id: i64,
    pub to_address: String,
    pub amount: Decimal,
    pub fee: Decimal,
    #[serde(serialize_with = "serialize_status")]
    pub status: JobStatus,
    pub tx_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WithdrawalJob {
    /// What the owner's ledger balance pays for this withdrawal
    pub fn total_debit(&self) -> Decimal {
        self.amount + self.fee
    }
}

fn serialize_status<S: serde::Serializer>(status: &JobStatus, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(status.as_str())
}

/// External user-facing withdrawal record mirrored from the job's terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalRequest {
    pub id: i64,
    pub owner_id: i64,
    pub status: String,
    pub tx_id: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Stopped,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Running => "running",
            WorkerStatus::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub worker_type: String,
    pub status: WorkerStatus,
    pub host: String,
    pub pid: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub config: serde_json::Value,
}
