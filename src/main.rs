//! Custody Settlement worker
//!
//! ```text
//! custody_settlement [--env dev] [--config path/to/file.yaml]
//! ```
//!
//! Startup order: config -> logging -> database (+ migrations) -> gateway
//! bind -> registry -> loops + gateway serve. SIGINT/SIGTERM stops new cycles, waits for in-flight ones,
//! marks the registration `stopped` and exits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use custody_settlement::chain::{ChainClient, HttpChainClient};
use custody_settlement::config::AppConfig;
use custody_settlement::db::Database;
use custody_settlement::gateway::{self, GatewayState, WatchedLoop};
use custody_settlement::ledger::{LedgerStore, PgLedger};
use custody_settlement::metrics::{LoopKind, Metrics};
use custody_settlement::money::TokenUnits;
use custody_settlement::registry::{self, WorkerLifecycle};
use custody_settlement::sentinel::{DepositScanner, ScannerSettings};
use custody_settlement::shutdown;
use custody_settlement::withdraw::{
    DispatcherSettings, OwnerLimit, StaleJobSweeper, SweeperConfig, WithdrawalDispatcher,
};

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn load_config() -> anyhow::Result<AppConfig> {
    match get_arg(&["--config", "-c"]) {
        Some(path) => AppConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path)),
        None => {
            let env = get_env();
            AppConfig::load(&env).with_context(|| format!("failed to load config for env {}", env))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    let _log_guard = custody_settlement::logging::init_logging(&config.logging);

    let worker_id = config
        .worker
        .id
        .clone()
        .unwrap_or_else(|| registry::worker_id_for(&config.worker.worker_type));
    info!(
        worker_id = %worker_id,
        scanner = config.scanner.enabled,
        dispatcher = config.dispatcher.enabled,
        token = %config.token.symbol,
        "Starting custody settlement worker"
    );

    let db = Database::from_config(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;
    db.migrate().await.context("failed to apply migrations")?;

    let ledger: Arc<dyn LedgerStore> = Arc::new(PgLedger::new(db.pool().clone()));
    let chain: Arc<dyn ChainClient> = Arc::new(
        HttpChainClient::new(
            &config.chain,
            &config.token,
            &config.hot_wallet,
            config.retry_policy(),
        )
        .context("failed to build chain client")?,
    );
    let units = TokenUnits::new(config.token.decimals).context("invalid token decimals")?;
    let metrics = Arc::new(Metrics::new());

    let listener = gateway::bind(&config.gateway.host, config.gateway.port)
        .await
        .with_context(|| {
            format!(
                "failed to bind gateway on {}:{}",
                config.gateway.host, config.gateway.port
            )
        })?;

    let mut lifecycle = WorkerLifecycle::new(
        ledger.clone(),
        worker_id.clone(),
        config.worker.worker_type.clone(),
        config.effective_json(),
        Duration::from_millis(config.worker.heartbeat_interval_ms),
        metrics.clone(),
    );
    lifecycle
        .start()
        .await
        .context("failed to register worker")?;

    let (trigger, shutdown) = shutdown::channel();
    let mut tasks = JoinSet::new();

    if config.scanner.enabled {
        let scanner = Arc::new(DepositScanner::new(
            chain.clone(),
            ledger.clone(),
            ScannerSettings {
                token_contract: config.token.contract.clone(),
                units,
                batch_size: config.scanner.batch_size,
                concurrency: config.scanner.concurrency,
                poll_interval: Duration::from_millis(config.scanner.poll_interval_ms),
            },
            metrics.clone(),
        ));
        tasks.spawn(scanner.run(shutdown.clone()));
    } else {
        warn!("Deposit scanner disabled by config");
    }

    if config.dispatcher.enabled {
        let d = &config.dispatcher;
        let owner_limit = (d.owner_max_claims > 0).then(|| OwnerLimit {
            max_claims: d.owner_max_claims,
            window: Duration::from_secs(d.owner_window_secs),
        });
        let dispatcher = Arc::new(WithdrawalDispatcher::new(
            chain.clone(),
            ledger.clone(),
            DispatcherSettings {
                hot_wallet: config.hot_wallet.address.clone(),
                units,
                batch_size: d.batch_size,
                concurrency: d.concurrency,
                poll_interval: Duration::from_millis(d.poll_interval_ms),
                min_withdrawal: d.min_withdrawal,
                max_withdrawal: d.max_withdrawal,
                owner_limit,
            },
            metrics.clone(),
        ));
        tasks.spawn(dispatcher.run(shutdown.clone()));

        let sweeper = Arc::new(StaleJobSweeper::new(
            ledger.clone(),
            SweeperConfig {
                sweep_interval: Duration::from_millis(d.stale_sweep_interval_ms),
                stale_timeout: Duration::from_secs(d.stale_job_timeout_secs),
            },
            metrics.clone(),
        ));
        tasks.spawn(sweeper.run(shutdown.clone()));
    } else {
        warn!("Withdrawal dispatcher disabled by config");
    }

    let gateway_state = Arc::new(GatewayState::new(
        metrics.clone(),
        ledger.clone(),
        worker_id.clone(),
        vec![
            WatchedLoop {
                kind: LoopKind::DepositScanner,
                poll_interval: Duration::from_millis(config.scanner.poll_interval_ms),
                enabled: config.scanner.enabled,
            },
            WatchedLoop {
                kind: LoopKind::WithdrawalDispatcher,
                poll_interval: Duration::from_millis(config.dispatcher.poll_interval_ms),
                enabled: config.dispatcher.enabled,
            },
        ],
    ));
    let gateway_shutdown = shutdown.clone();
    tasks.spawn(async move {
        if let Err(e) = gateway::serve(listener, gateway_state, gateway_shutdown).await {
            error!(error = %e, "Gateway server error");
        }
    });

    shutdown::wait_for_signal().await;
    info!("Shutting down: waiting for in-flight cycles");
    trigger.trigger();

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Task ended abnormally during shutdown");
        }
    }

    if let Err(e) = lifecycle.stop().await {
        error!(error = %e, "Failed to mark worker stopped");
    }
    db.close().await;

    let snapshot = metrics.snapshot();
    info!(
        deposits_credited = snapshot.deposits_credited,
        jobs_completed = snapshot.jobs_completed,
        jobs_failed = snapshot.jobs_failed,
        reconcile_required = snapshot.reconcile_required,
        "Shutdown complete"
    );
    Ok(())
}
