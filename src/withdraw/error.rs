use rust_decimal::Decimal;
use thiserror::Error;

use crate::chain::ChainError;
use crate::money::MoneyError;

#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("invalid destination address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("amount {amount} outside allowed range [{min}, {max}]")]
    AmountOutOfBounds {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("owner {0} has no wallet")]
    UnknownOwner(i64),

    #[error("insufficient ledger balance for owner {owner_id}: need {needed}, have {available}")]
    InsufficientOwnerBalance {
        owner_id: i64,
        needed: Decimal,
        available: Decimal,
    },

    #[error("insufficient hot wallet balance: need {needed}, have {available}")]
    InsufficientHotWallet { needed: Decimal, available: Decimal },

    /// Failure during or after sending; the transfer may have landed
    #[error("broadcast failed, on-chain outcome unknown: {0}")]
    Broadcast(ChainError),
}

impl From<MoneyError> for WithdrawError {
    fn from(e: MoneyError) -> Self {
        WithdrawError::InvalidAmount(e.to_string())
    }
}

impl WithdrawError {
    /// A broadcast was attempted and may have succeeded
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, WithdrawError::Broadcast(_))
    }
}
