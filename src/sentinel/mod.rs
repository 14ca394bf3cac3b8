//! Sentinel - inbound deposit detection
//!
//! Watches every user deposit address for confirmed transfers of the
//! configured token and credits each transaction exactly once.
//! Exactly-once rests entirely on the ledger's dedup table: a transfer
//! seen in any number of cycles credits the wallet once.

pub mod error;
pub mod worker;

pub use error::CreditError;
pub use worker::{DepositScanner, ScanOutcome, ScanReport, ScannerSettings};
