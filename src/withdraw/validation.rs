//! Pre-broadcast checks that need no chain access

use rust_decimal::Decimal;

use super::error::WithdrawError;
use crate::ledger::WithdrawalJob;

const TRON_ADDRESS_LEN: usize = 34;
const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// TRON base58check address shape: `T` + 33 base58 characters
pub fn validate_address(address: &str) -> Result<(), WithdrawError> {
    let well_formed = address.len() == TRON_ADDRESS_LEN
        && address.starts_with('T')
        && address.chars().all(|c| BASE58_ALPHABET.contains(c));

    if well_formed {
        Ok(())
    } else {
        Err(WithdrawError::InvalidAddress(address.to_string()))
    }
}

/// Positive amount inside `[min, max]`, non-negative fee
pub fn validate_amounts(job: &WithdrawalJob, min: Decimal, max: Decimal) -> Result<(), WithdrawError> {
    if job.amount <= Decimal::ZERO {
        return Err(WithdrawError::InvalidAmount(format!(
            "amount must be positive, got {}",
            job.amount
        )));
    }
    if job.fee < Decimal::ZERO {
        return Err(WithdrawError::InvalidAmount(format!(
            "fee must not be negative, got {}",
            job.fee
        )));
    }
    if job.amount < min || job.amount > max {
        return Err(WithdrawError::AmountOutOfBounds {
            amount: job.amount,
            min,
            max,
        });
    }
    Ok(())
}
