//! End-to-end settlement behavior over the in-memory ledger and scripted chain

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use custody_settlement::chain::{MockChainClient, TransferRecord};
use custody_settlement::ledger::{LedgerStore, MemoryLedger};
use custody_settlement::metrics::Metrics;
use custody_settlement::money::TokenUnits;
use custody_settlement::sentinel::{DepositScanner, ScanOutcome, ScannerSettings};
use custody_settlement::withdraw::{
    DispatchOutcome, DispatcherSettings, HotWalletBudget, JobOutcome, JobStatus,
    WithdrawalDispatcher,
};

const USDT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
const HOT: &str = "THotWa11etHotWa11etHotWa11etHotWa1";
const W: &str = "TAaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1";
const DEST: &str = "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf";

fn transfer(tx_id: &str, to: &str, raw: &str) -> TransferRecord {
    TransferRecord {
        tx_id: tx_id.to_string(),
        to_address: to.to_string(),
        token_contract: USDT.to_string(),
        raw_value: raw.to_string(),
        confirmed: true,
    }
}

fn scanner(chain: Arc<MockChainClient>, ledger: Arc<MemoryLedger>) -> Arc<DepositScanner> {
    Arc::new(DepositScanner::new(
        chain,
        ledger,
        ScannerSettings {
            token_contract: USDT.to_string(),
            units: TokenUnits::new(6).unwrap(),
            batch_size: 2,
            concurrency: 5,
            poll_interval: Duration::from_secs(15),
        },
        Arc::new(Metrics::new()),
    ))
}

fn dispatcher(chain: Arc<MockChainClient>, ledger: Arc<MemoryLedger>) -> Arc<WithdrawalDispatcher> {
    Arc::new(WithdrawalDispatcher::new(
        chain,
        ledger,
        DispatcherSettings {
            hot_wallet: HOT.to_string(),
            units: TokenUnits::new(6).unwrap(),
            batch_size: 50,
            concurrency: 3,
            poll_interval: Duration::from_secs(10),
            min_withdrawal: Decimal::ONE,
            max_withdrawal: Decimal::from(1_000_000),
            owner_limit: None,
        },
        Arc::new(Metrics::new()),
    ))
}

/// Same transfer seen in two consecutive cycles credits 5.0 once
#[tokio::test]
async fn test_deposit_seen_twice_is_credited_once() {
    let chain = Arc::new(MockChainClient::new());
    let ledger = Arc::new(MemoryLedger::new());
    ledger.add_wallet(W, 1, Decimal::ZERO).await;
    chain.push_transfer(transfer("abc", W, "5000000"));
    let scanner = scanner(chain, ledger.clone());

    scanner.scan_once().await;
    let ScanOutcome::Completed(second) = scanner.scan_once().await else {
        panic!("second scan skipped");
    };

    assert_eq!(second.duplicates, 1);
    assert_eq!(second.credited, 0);
    assert_eq!(ledger.wallet(W).await.unwrap().balance, Decimal::new(50, 1));
    let processed = ledger.processed().await;
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].tx_id, "abc");
}

/// Final balance is B + sum of distinct transfers under duplication and reordering
#[tokio::test]
async fn test_conservation_across_repeated_cycles() {
    let chain = Arc::new(MockChainClient::new());
    let ledger = Arc::new(MemoryLedger::new());
    let wallets = [
        "TAaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1",
        "TAaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa2",
        "TAaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa3",
    ];
    for (i, w) in wallets.iter().enumerate() {
        ledger.add_wallet(w, i as i64 + 1, Decimal::from(10)).await;
    }

    // first cycle sees a subset
    chain.set_transfers(wallets[0], vec![transfer("t1", wallets[0], "1500000")]);
    let scanner = scanner(chain.clone(), ledger.clone());
    scanner.scan_once().await;

    // later cycles see the full history, in a different order, with repeats
    chain.set_transfers(
        wallets[0],
        vec![
            transfer("t2", wallets[0], "250000"),
            transfer("t1", wallets[0], "1500000"),
            transfer("t2", wallets[0], "250000"),
        ],
    );
    chain.set_transfers(wallets[2], vec![transfer("t3", wallets[2], "1")]);
    for _ in 0..3 {
        scanner.scan_once().await;
    }

    assert_eq!(
        ledger.wallet(wallets[0]).await.unwrap().balance,
        Decimal::from(10) + Decimal::new(15, 1) + Decimal::new(25, 2)
    );
    assert_eq!(ledger.wallet(wallets[1]).await.unwrap().balance, Decimal::from(10));
    assert_eq!(
        ledger.wallet(wallets[2]).await.unwrap().balance,
        Decimal::from(10) + Decimal::new(1, 6)
    );
    assert_eq!(ledger.processed().await.len(), 3);
}

/// Amount above the hot wallet balance fails without a broadcast
#[tokio::test]
async fn test_withdrawal_above_hot_wallet_balance_fails() {
    let chain = Arc::new(MockChainClient::new());
    let ledger = Arc::new(MemoryLedger::new());
    ledger.add_wallet(W, 1, Decimal::from(1_000)).await;
    chain.set_hot_wallet_balance(50_000_000);
    let job = ledger
        .submit_withdrawal(1, DEST, Decimal::from(100), Decimal::ZERO)
        .await;

    dispatcher(chain.clone(), ledger.clone()).dispatch_once().await;

    let stored = ledger.get_job(job).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.unwrap().contains("insufficient hot wallet balance"));
    assert_eq!(chain.broadcast_calls(), 0);
}

/// Two dispatchers racing on one job: one claim, one broadcast
#[tokio::test]
async fn test_two_dispatchers_single_claim() {
    let chain = Arc::new(MockChainClient::new());
    let ledger = Arc::new(MemoryLedger::new());
    ledger.add_wallet(W, 1, Decimal::from(1_000)).await;
    chain.set_hot_wallet_balance(1_000_000_000);
    chain.set_latency(Duration::from_millis(20));
    let job_id = ledger
        .submit_withdrawal(1, DEST, Decimal::from(10), Decimal::ZERO)
        .await;
    let job = ledger.get_job(job_id).await.unwrap().unwrap();

    let a = dispatcher(chain.clone(), ledger.clone());
    let b = dispatcher(chain.clone(), ledger.clone());
    let (budget_a, budget_b) = (
        HotWalletBudget::new(1_000_000_000),
        HotWalletBudget::new(1_000_000_000),
    );
    let (ra, rb) = tokio::join!(
        a.process_job(job.clone(), &budget_a),
        b.process_job(job, &budget_b)
    );

    let outcomes = [ra, rb];
    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, JobOutcome::Completed { .. }))
        .count();
    let lost = outcomes
        .iter()
        .filter(|o| **o == JobOutcome::ClaimLost)
        .count();
    assert_eq!((completed, lost), (1, 1));
    assert_eq!(chain.broadcast_calls(), 1);
    assert_eq!(
        ledger.wallet(W).await.unwrap().balance,
        Decimal::from(990)
    );
}

/// Two dispatchers, one owner with 100 and two 60-unit jobs: one broadcast
#[tokio::test]
async fn test_two_dispatchers_cannot_overdraw_one_owner() {
    let chain = Arc::new(MockChainClient::new());
    let ledger = Arc::new(MemoryLedger::new());
    ledger.add_wallet(W, 1, Decimal::from(100)).await;
    chain.set_hot_wallet_balance(1_000_000_000);
    chain.set_latency(Duration::from_millis(20));
    for _ in 0..2 {
        ledger
            .submit_withdrawal(1, DEST, Decimal::from(60), Decimal::ZERO)
            .await;
    }

    let a = dispatcher(chain.clone(), ledger.clone());
    let b = dispatcher(chain.clone(), ledger.clone());
    tokio::join!(a.dispatch_once(), b.dispatch_once());

    assert_eq!(chain.broadcast_calls(), 1);
    assert_eq!(ledger.wallet(W).await.unwrap().balance, Decimal::from(40));
    assert!(ledger.pending_jobs(10, &[]).await.unwrap().is_empty());
}

/// Many concurrent claims on one pending job
#[tokio::test]
async fn test_concurrent_claims_exactly_one_wins() {
    let ledger = Arc::new(MemoryLedger::new());
    let job = ledger
        .submit_withdrawal(1, DEST, Decimal::from(10), Decimal::ZERO)
        .await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.claim_job(job).await.unwrap().is_claimed()
        }));
    }
    let mut winners = 0;
    for h in handles {
        if h.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

/// Nothing mutates a completed or failed job
#[tokio::test]
async fn test_terminal_jobs_are_immutable() {
    let chain = Arc::new(MockChainClient::new());
    let ledger = Arc::new(MemoryLedger::new());
    ledger.add_wallet(W, 1, Decimal::from(1_000)).await;
    chain.set_hot_wallet_balance(1_000_000_000);
    let done = ledger
        .submit_withdrawal(1, DEST, Decimal::from(10), Decimal::ZERO)
        .await;
    let rejected = ledger
        .submit_withdrawal(1, "not-an-address", Decimal::from(10), Decimal::ZERO)
        .await;

    let d = dispatcher(chain.clone(), ledger.clone());
    let DispatchOutcome::Completed(report) = d.dispatch_once().await else {
        panic!("dispatch did not run");
    };
    assert_eq!((report.completed, report.failed), (1, 1));

    let before_done = ledger.get_job(done).await.unwrap().unwrap();
    let before_rejected = ledger.get_job(rejected).await.unwrap().unwrap();

    for id in [done, rejected] {
        assert!(!ledger.claim_job(id).await.unwrap().is_claimed());
        assert!(!ledger.fail_job(id, "late failure").await.unwrap());
        assert!(
            !matches!(
                ledger.complete_job(id, "late-tx", Decimal::ONE).await.unwrap(),
                custody_settlement::ledger::CompletionOutcome::Completed { .. }
            )
        );
    }
    d.dispatch_once().await;

    assert_eq!(ledger.get_job(done).await.unwrap().unwrap(), before_done);
    assert_eq!(ledger.get_job(rejected).await.unwrap().unwrap(), before_rejected);
    assert_eq!(chain.broadcast_calls(), 1);
}
