//! Deposit Scanner - credits confirmed inbound transfers exactly once
//!
//! Each cycle pages through every wallet in address order, fetches recent
//! transfers per wallet with bounded concurrency, and credits each matching
//! transfer through the ledger's atomic dedup-insert + credit. A failing
//! wallet or transfer is logged and counted; the cycle carries on.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use super::error::CreditError;
use crate::chain::{ChainClient, TransferRecord};
use crate::cycle::{self, CycleGuard};
use crate::ledger::{CreditOutcome, CreditRequest, LedgerStore, Wallet};
use crate::metrics::{LoopKind, Metrics};
use crate::money::TokenUnits;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub token_contract: String,
    pub units: TokenUnits,
    pub batch_size: u32,
    pub concurrency: usize,
    pub poll_interval: Duration,
}

/// Totals for one completed cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub wallets: u64,
    /// Wallets skipped because the chain call failed
    pub wallet_errors: u64,
    pub credited: u64,
    pub duplicates: u64,
    /// Transfers for another token, another address, or unconfirmed
    pub ignored: u64,
    pub failed: u64,
    /// Wallet pages that could not be read; the rest of the cycle is abandoned
    pub page_errors: u64,
}

impl ScanReport {
    fn merge(&mut self, other: &ScanReport) {
        self.wallets += other.wallets;
        self.wallet_errors += other.wallet_errors;
        self.credited += other.credited;
        self.duplicates += other.duplicates;
        self.ignored += other.ignored;
        self.failed += other.failed;
        self.page_errors += other.page_errors;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed(ScanReport),
    /// The previous cycle was still running
    Skipped,
}

pub struct DepositScanner {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<dyn LedgerStore>,
    settings: ScannerSettings,
    metrics: Arc<Metrics>,
    guard: CycleGuard,
}

impl DepositScanner {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<dyn LedgerStore>,
        settings: ScannerSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            chain,
            ledger,
            settings,
            metrics,
            guard: CycleGuard::new(),
        }
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    /// Tick every poll interval until shutdown
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        info!(
            token = %self.settings.token_contract,
            batch_size = self.settings.batch_size,
            concurrency = self.settings.concurrency,
            "Deposit scanner starting"
        );

        let scanner = self.clone();
        cycle::run_periodic(
            LoopKind::DepositScanner.as_str(),
            self.settings.poll_interval,
            shutdown,
            move || {
                let scanner = scanner.clone();
                async move {
                    scanner.scan_once().await;
                }
            },
        )
        .await;
    }

    /// One full pass over all wallets
    pub async fn scan_once(&self) -> ScanOutcome {
        let Some(_permit) = self.guard.try_enter() else {
            self.metrics.scan_cycles_skipped.inc();
            warn!("Previous deposit scan still running, skipping this tick");
            return ScanOutcome::Skipped;
        };

        let started = std::time::Instant::now();
        let mut report = ScanReport::default();
        let mut after: Option<String> = None;

        loop {
            let page = match self
                .ledger
                .list_wallets(after.as_deref(), self.settings.batch_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(after = ?after, error = %e, "Failed to load wallet page, ending cycle early");
                    report.page_errors += 1;
                    break;
                }
            };

            let page_len = page.len();
            let Some(last) = page.last().map(|w| w.address.clone()) else {
                break;
            };

            let results: Vec<ScanReport> = stream::iter(page.into_iter().map(|w| self.scan_wallet(w)))
                .buffer_unordered(self.settings.concurrency)
                .collect()
                .await;
            for r in &results {
                report.merge(r);
            }

            if page_len < self.settings.batch_size as usize {
                break;
            }
            after = Some(last);
        }

        self.metrics.scan_cycles.inc();
        // a cycle that could not read the wallet list does not count toward liveness
        if report.page_errors == 0 {
            self.metrics.record_cycle(LoopKind::DepositScanner);
        }

        info!(
            wallets = report.wallets,
            credited = report.credited,
            duplicates = report.duplicates,
            wallet_errors = report.wallet_errors,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Deposit scan cycle finished"
        );

        ScanOutcome::Completed(report)
    }

    async fn scan_wallet(&self, wallet: Wallet) -> ScanReport {
        let mut report = ScanReport {
            wallets: 1,
            ..Default::default()
        };
        self.metrics.wallets_scanned.inc();

        let transfers = match self.chain.fetch_incoming_transfers(&wallet.address).await {
            Ok(transfers) => transfers,
            Err(e) => {
                warn!(address = %wallet.address, error = %e, "Wallet skipped this cycle");
                self.metrics.wallet_errors.inc();
                report.wallet_errors = 1;
                return report;
            }
        };

        for transfer in &transfers {
            if !self.is_creditable(transfer, &wallet) {
                report.ignored += 1;
                continue;
            }

            match self.credit(&wallet, transfer).await {
                Ok(CreditOutcome::Credited) => {
                    self.metrics.deposits_credited.inc();
                    report.credited += 1;
                }
                Ok(CreditOutcome::AlreadyCredited) => {
                    self.metrics.deposits_duplicate.inc();
                    report.duplicates += 1;
                }
                Err(e) => {
                    // no dedup row was written, so the next cycle retries it
                    error!(
                        address = %wallet.address,
                        tx_id = %transfer.tx_id,
                        error = %e,
                        "Failed to credit deposit"
                    );
                    self.metrics.deposits_failed.inc();
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn is_creditable(&self, transfer: &TransferRecord, wallet: &Wallet) -> bool {
        transfer.confirmed
            && transfer.to_address == wallet.address
            && transfer.token_contract == self.settings.token_contract
    }

    async fn credit(
        &self,
        wallet: &Wallet,
        transfer: &TransferRecord,
    ) -> Result<CreditOutcome, CreditError> {
        let amount = self.settings.units.parse_raw(&transfer.raw_value)?;

        let outcome = self
            .ledger
            .credit_deposit(&CreditRequest {
                tx_id: transfer.tx_id.clone(),
                address: wallet.address.clone(),
                owner_id: wallet.owner_id,
                amount,
            })
            .await?;

        match outcome {
            CreditOutcome::Credited => info!(
                address = %wallet.address,
                owner_id = wallet.owner_id,
                tx_id = %transfer.tx_id,
                %amount,
                "Deposit credited"
            ),
            CreditOutcome::AlreadyCredited => {
                debug!(tx_id = %transfer.tx_id, "Deposit already credited")
            }
        }

        Ok(outcome)
    }
}
