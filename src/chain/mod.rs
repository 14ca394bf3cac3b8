//! Chain Client
//!
//! Resilient access to the chain's transfer-query and broadcast APIs.
//! Queries retry transient failures through [`RetryPolicy`]; broadcasts
//! never retry. Filtering by contract, destination and confirmation is left
//! to callers.

pub mod error;
pub mod http;
pub mod mock;
pub mod retry;
pub mod types;

use async_trait::async_trait;

pub use error::ChainError;
pub use http::HttpChainClient;
pub use mock::MockChainClient;
pub use retry::RetryPolicy;
pub use types::TransferRecord;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Recent confirmed-only TRC20 transfers into `address`, unfiltered
    async fn fetch_incoming_transfers(
        &self,
        address: &str,
    ) -> Result<Vec<TransferRecord>, ChainError>;

    /// Raw token balance held by `address`
    async fn token_balance(&self, address: &str) -> Result<u128, ChainError>;

    /// Sign and broadcast a token transfer from the hot wallet; returns the tx id
    async fn broadcast_transfer(&self, to: &str, raw_amount: u128) -> Result<String, ChainError>;
}
