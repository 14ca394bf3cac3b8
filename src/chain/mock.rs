//! Scripted in-process chain for tests and dry runs

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::ChainClient;
use super::error::ChainError;
use super::types::TransferRecord;

#[derive(Default)]
pub struct MockChainClient {
    transfers: Mutex<HashMap<String, Vec<TransferRecord>>>,
    failing: Mutex<HashSet<String>>,
    balance: Mutex<u128>,
    broadcasts: Mutex<Vec<(String, u128)>>,
    fetch_calls: AtomicU32,
    broadcast_calls: AtomicU32,
    fail_broadcast: AtomicBool,
    fail_balance: AtomicBool,
    latency: Mutex<Duration>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfers returned for `address` on every fetch until replaced
    pub fn set_transfers(&self, address: &str, transfers: Vec<TransferRecord>) {
        lock(&self.transfers).insert(address.to_string(), transfers);
    }

    pub fn push_transfer(&self, transfer: TransferRecord) {
        lock(&self.transfers)
            .entry(transfer.to_address.clone())
            .or_default()
            .push(transfer);
    }

    /// Every fetch for `address` fails as if the retry budget were spent
    pub fn fail_address(&self, address: &str) {
        lock(&self.failing).insert(address.to_string());
    }

    pub fn set_hot_wallet_balance(&self, raw: u128) {
        *lock(&self.balance) = raw;
    }

    pub fn fail_broadcasts(&self, fail: bool) {
        self.fail_broadcast.store(fail, Ordering::SeqCst);
    }

    /// Hot wallet balance reads fail as if the query API were down
    pub fn fail_balance_reads(&self, fail: bool) {
        self.fail_balance.store(fail, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn broadcast_calls(&self) -> u32 {
        self.broadcast_calls.load(Ordering::SeqCst)
    }

    pub fn broadcasts(&self) -> Vec<(String, u128)> {
        lock(&self.broadcasts).clone()
    }

    async fn simulate_latency(&self) {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn fetch_incoming_transfers(
        &self,
        address: &str,
    ) -> Result<Vec<TransferRecord>, ChainError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if lock(&self.failing).contains(address) {
            return Err(ChainError::RetriesExhausted {
                attempts: 3,
                last: Box::new(ChainError::Status {
                    status: 500,
                    body: "mock failure".into(),
                }),
            });
        }

        Ok(lock(&self.transfers)
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn token_balance(&self, _address: &str) -> Result<u128, ChainError> {
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(ChainError::RetriesExhausted {
                attempts: 3,
                last: Box::new(ChainError::Status {
                    status: 500,
                    body: "mock failure".into(),
                }),
            });
        }
        Ok(*lock(&self.balance))
    }

    async fn broadcast_transfer(&self, to: &str, raw_amount: u128) -> Result<String, ChainError> {
        let n = self.broadcast_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.simulate_latency().await;

        if self.fail_broadcast.load(Ordering::SeqCst) {
            return Err(ChainError::Timeout(10_000));
        }

        lock(&self.broadcasts).push((to.to_string(), raw_amount));
        let mut balance = lock(&self.balance);
        *balance = balance.saturating_sub(raw_amount);
        Ok(format!("mocktx{:08}", n))
    }
}
