//! HTTP chain client against an in-process chain API

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde_json::{Value, json};

use custody_settlement::chain::{ChainClient, ChainError, HttpChainClient, RetryPolicy};
use custody_settlement::config::{ChainConfig, HotWalletConfig, TokenConfig};
use custody_settlement::ledger::MemoryLedger;
use custody_settlement::metrics::Metrics;
use custody_settlement::money::TokenUnits;
use custody_settlement::sentinel::{DepositScanner, ScanOutcome, ScannerSettings};

const USDT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
const W1: &str = "TAaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1";
const W2: &str = "TBbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb2";
const W3: &str = "TCcccccccccccccccccccccccccccccccc3";
const DEST: &str = "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf";

#[derive(Default)]
struct FakeChain {
    w2_requests: AtomicU32,
    w2_request_times: std::sync::Mutex<Vec<Instant>>,
    w3_requests: AtomicU32,
    broadcasts: AtomicU32,
}

async fn transfers(
    State(fake): State<Arc<FakeChain>>,
    Path(address): Path<String>,
) -> (StatusCode, Json<Value>) {
    if address == W2 {
        fake.w2_requests.fetch_add(1, Ordering::SeqCst);
        fake.w2_request_times.lock().unwrap().push(Instant::now());
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "upstream unavailable" })),
        );
    }
    if address == W3 {
        fake.w3_requests.fetch_add(1, Ordering::SeqCst);
        return (
            StatusCode::OK,
            Json(json!({ "success": false, "error": "rate limited" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": [{
                "transaction_id": "abc",
                "to": address,
                "value": "5000000",
                "token_info": { "address": USDT, "decimals": 6 }
            }]
        })),
    )
}

async fn account(Path(_address): Path<String>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": [{ "trc20": [{ "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t": "50000000" }] }]
    }))
}

async fn broadcast(State(fake): State<Arc<FakeChain>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    fake.broadcasts.fetch_add(1, Ordering::SeqCst);
    if body["to"] == "TRejectedRejectedRejectedRejected1" {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad destination" })));
    }
    (StatusCode::OK, Json(json!({ "txid": "signed-tx-1" })))
}

async fn start_fake_chain() -> (String, Arc<FakeChain>) {
    let fake = Arc::new(FakeChain::default());
    let app = Router::new()
        .route("/v1/accounts/{address}/transactions/trc20", get(transfers))
        .route("/v1/accounts/{address}", get(account))
        .route("/v1/transfers", post(broadcast))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), fake)
}

fn client(endpoint: &str, base_delay: Duration) -> HttpChainClient {
    let chain = ChainConfig {
        endpoint: endpoint.to_string(),
        api_key: "test-key".to_string(),
        request_timeout_ms: 2_000,
        max_retries: 3,
        retry_base_delay_ms: base_delay.as_millis() as u64,
        retry_jitter: false,
        min_confirmations: 19,
        page_limit: 50,
    };
    let token = TokenConfig {
        symbol: "USDT".to_string(),
        contract: USDT.to_string(),
        decimals: 6,
    };
    let hot_wallet = HotWalletConfig {
        address: DEST.to_string(),
        signer_url: endpoint.to_string(),
        signer_api_key: "signer-key".to_string(),
    };
    HttpChainClient::new(
        &chain,
        &token,
        &hot_wallet,
        RetryPolicy::new(3, base_delay).with_jitter(false),
    )
    .unwrap()
}

#[tokio::test]
async fn test_fetch_parses_trongrid_response() {
    let (endpoint, _fake) = start_fake_chain().await;
    let chain = client(&endpoint, Duration::from_millis(10));

    let records = chain.fetch_incoming_transfers(W1).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tx_id, "abc");
    assert_eq!(records[0].to_address, W1);
    assert_eq!(records[0].token_contract, USDT);
    assert_eq!(records[0].raw_value, "5000000");
    assert!(records[0].confirmed);
}

#[tokio::test]
async fn test_server_errors_exhaust_retries_with_growing_delay() {
    let (endpoint, fake) = start_fake_chain().await;
    let chain = client(&endpoint, Duration::from_millis(40));

    let err = chain.fetch_incoming_transfers(W2).await.unwrap_err();
    match err {
        ChainError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, ChainError::Status { status: 500, .. }));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(fake.w2_requests.load(Ordering::SeqCst), 3);

    let times = fake.w2_request_times.lock().unwrap().clone();
    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];
    assert!(first_gap >= Duration::from_millis(40));
    assert!(second_gap >= Duration::from_millis(80));
}

/// A 200 whose body reports failure is retried like any other bad response
#[tokio::test]
async fn test_provider_failure_body_is_retried() {
    let (endpoint, fake) = start_fake_chain().await;
    let chain = client(&endpoint, Duration::from_millis(10));

    let err = chain.fetch_incoming_transfers(W3).await.unwrap_err();
    match err {
        ChainError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, ChainError::Decode(ref msg) if msg.contains("rate limited")));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(fake.w3_requests.load(Ordering::SeqCst), 3);
}

/// Three 500s for W2: W2 is skipped for the cycle, W1 is still credited
#[tokio::test]
async fn test_failing_wallet_is_skipped_without_crashing_cycle() {
    let (endpoint, fake) = start_fake_chain().await;
    let chain = Arc::new(client(&endpoint, Duration::from_millis(10)));
    let ledger = Arc::new(MemoryLedger::new());
    ledger.add_wallet(W1, 1, Decimal::ZERO).await;
    ledger.add_wallet(W2, 2, Decimal::from(7)).await;
    let metrics = Arc::new(Metrics::new());

    let scanner = DepositScanner::new(
        chain,
        ledger.clone(),
        ScannerSettings {
            token_contract: USDT.to_string(),
            units: TokenUnits::new(6).unwrap(),
            batch_size: 50,
            concurrency: 5,
            poll_interval: Duration::from_secs(15),
        },
        metrics.clone(),
    );

    let ScanOutcome::Completed(report) = scanner.scan_once().await else {
        panic!("scan was skipped");
    };
    assert_eq!(report.wallets, 2);
    assert_eq!(report.wallet_errors, 1);
    assert_eq!(report.credited, 1);
    assert_eq!(fake.w2_requests.load(Ordering::SeqCst), 3);

    assert_eq!(ledger.wallet(W1).await.unwrap().balance, Decimal::from(5));
    assert_eq!(ledger.wallet(W2).await.unwrap().balance, Decimal::from(7));
    assert_eq!(metrics.snapshot().wallet_errors, 1);
}

#[tokio::test]
async fn test_token_balance_reads_trc20_entry() {
    let (endpoint, _fake) = start_fake_chain().await;
    let chain = client(&endpoint, Duration::from_millis(10));

    assert_eq!(chain.token_balance(DEST).await.unwrap(), 50_000_000);
}

#[tokio::test]
async fn test_broadcast_is_single_attempt() {
    let (endpoint, fake) = start_fake_chain().await;
    let chain = client(&endpoint, Duration::from_millis(10));

    let tx = chain.broadcast_transfer(DEST, 1_000_000).await.unwrap();
    assert_eq!(tx, "signed-tx-1");

    let err = chain
        .broadcast_transfer("TRejectedRejectedRejectedRejected1", 1_000_000)
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Rejected(_)));
    assert_eq!(fake.broadcasts.load(Ordering::SeqCst), 2);
}
