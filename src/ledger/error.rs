use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}
