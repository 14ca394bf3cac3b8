use thiserror::Error;

use crate::ledger::LedgerError;
use crate::money::MoneyError;

/// Per-transfer failure; never aborts a scan cycle
#[derive(Debug, Error)]
pub enum CreditError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Bad transfer value: {0}")]
    Value(#[from] MoneyError),
}
