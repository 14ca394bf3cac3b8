//! Custody Settlement - keeps the off-chain ledger consistent with on-chain token movement
//!
//! Two independent timer-driven loops share one Ledger Store:
//!
//! ```text
//!             ┌──────────────┐   credit once    ┌──────────────┐
//!  chain ───▶ │   Sentinel   │ ───────────────▶ │              │
//!  (query)    │ (deposits)   │                  │    Ledger    │
//!             └──────────────┘                  │  (Postgres)  │
//!             ┌──────────────┐  claim/complete  │              │
//!  chain ◀─── │  Dispatcher  │ ◀──────────────▶ │              │
//!  (signer)   │(withdrawals) │                  └──────────────┘
//!             └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`chain`] - Chain Client with retry/backoff (HTTP + mock)
//! - [`ledger`] - Ledger Store (Postgres + in-memory)
//! - [`sentinel`] - Deposit Scanner
//! - [`withdraw`] - Withdrawal Dispatcher and stale-job sweeper
//! - [`registry`] - Worker Lifecycle Manager
//! - [`gateway`] - `/health` and `/metrics`
//! - [`metrics`] - Counters and loop liveness stamps
//! - [`money`] - Raw on-chain units <-> ledger decimals

pub mod chain;
pub mod config;
pub mod cycle;
pub mod db;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod money;
pub mod registry;
pub mod sentinel;
pub mod shutdown;
pub mod ttl_store;
pub mod withdraw;

pub use chain::{ChainClient, ChainError, HttpChainClient, MockChainClient, RetryPolicy};
pub use config::AppConfig;
pub use ledger::{LedgerError, LedgerStore, MemoryLedger, PgLedger};
pub use metrics::Metrics;
pub use sentinel::DepositScanner;
pub use withdraw::{StaleJobSweeper, WithdrawalDispatcher};
