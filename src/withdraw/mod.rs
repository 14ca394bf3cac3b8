//! Withdrawal execution
//!
//! Jobs are created `pending` by the request side. The dispatcher claims,
//! validates and broadcasts each one once; the sweeper fails jobs whose
//! dispatcher vanished mid-flight.

pub mod dispatcher;
pub mod error;
pub mod state;
pub mod sweeper;
pub mod validation;

pub use dispatcher::{
    DispatchOutcome, DispatchReport, DispatcherSettings, HotWalletBudget, JobOutcome, OwnerLimit,
    WithdrawalDispatcher,
};
pub use error::WithdrawError;
pub use state::JobStatus;
pub use sweeper::{STALE_REASON, StaleJobSweeper, SweeperConfig};
