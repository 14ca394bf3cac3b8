//! Worker Lifecycle Manager
//!
//! Registers this process in `worker_registry`, heartbeats it on a fixed
//! interval and marks it `stopped` on graceful shutdown. Heartbeat failures
//! are logged and counted but never stop the process.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::ledger::{LedgerError, LedgerStore, WorkerRegistration, WorkerStatus};
use crate::metrics::Metrics;
use crate::shutdown::{self, ShutdownTrigger};

/// Host name of this machine, or `unknown-host` if it cannot be read
pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// `{worker_type}-{host}-{pid}`
pub fn worker_id_for(worker_type: &str) -> String {
    format!("{}-{}-{}", worker_type, host_name(), std::process::id())
}

pub struct WorkerLifecycle {
    ledger: Arc<dyn LedgerStore>,
    worker_id: String,
    worker_type: String,
    config: serde_json::Value,
    heartbeat_interval: Duration,
    metrics: Arc<Metrics>,
    heartbeat: Option<(ShutdownTrigger, JoinHandle<()>)>,
}

impl WorkerLifecycle {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        worker_id: String,
        worker_type: String,
        config: serde_json::Value,
        heartbeat_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            ledger,
            worker_id,
            worker_type,
            config,
            heartbeat_interval,
            metrics,
            heartbeat: None,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_heartbeating(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Upsert the registration and start the heartbeat task.
    ///
    /// Registration failure is returned; the caller decides whether to run
    /// unregistered.
    pub async fn start(&mut self) -> Result<(), LedgerError> {
        let registration = WorkerRegistration {
            worker_id: self.worker_id.clone(),
            worker_type: self.worker_type.clone(),
            status: WorkerStatus::Running,
            host: host_name(),
            pid: std::process::id(),
            last_heartbeat: Utc::now(),
            config: self.config.clone(),
        };
        self.ledger.upsert_worker(&registration).await?;
        info!(
            worker_id = %self.worker_id,
            worker_type = %self.worker_type,
            host = %registration.host,
            pid = registration.pid,
            "Worker registered"
        );

        if self.heartbeat.is_none() {
            let (trigger, stop) = shutdown::channel();
            let handle = tokio::spawn(heartbeat_loop(
                self.ledger.clone(),
                self.worker_id.clone(),
                self.heartbeat_interval,
                self.metrics.clone(),
                stop,
            ));
            self.heartbeat = Some((trigger, handle));
        }
        Ok(())
    }

    /// Stop heartbeating and mark the registration `stopped`
    pub async fn stop(&mut self) -> Result<(), LedgerError> {
        if let Some((trigger, handle)) = self.heartbeat.take() {
            trigger.trigger();
            if let Err(e) = handle.await {
                warn!(worker_id = %self.worker_id, error = %e, "Heartbeat task ended abnormally");
            }
        }
        self.ledger.mark_worker_stopped(&self.worker_id).await?;
        info!(worker_id = %self.worker_id, "Worker deregistered");
        Ok(())
    }
}

async fn heartbeat_loop(
    ledger: Arc<dyn LedgerStore>,
    worker_id: String,
    interval: Duration,
    metrics: Arc<Metrics>,
    mut stop: shutdown::Shutdown,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately and registration just happened
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.wait() => break,
            _ = ticker.tick() => {
                match ledger.heartbeat_worker(&worker_id).await {
                    Ok(true) => debug!(worker_id = %worker_id, "Heartbeat"),
                    Ok(false) => {
                        metrics.heartbeat_failures.inc();
                        warn!(worker_id = %worker_id, "Registration row missing, heartbeat not recorded");
                    }
                    Err(e) => {
                        metrics.heartbeat_failures.inc();
                        warn!(worker_id = %worker_id, error = %e, "Heartbeat failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    fn lifecycle(ledger: Arc<MemoryLedger>, metrics: Arc<Metrics>, interval: Duration) -> WorkerLifecycle {
        WorkerLifecycle::new(
            ledger,
            "settlement-test-1".to_string(),
            "settlement".to_string(),
            serde_json::json!({ "scanner": { "enabled": true } }),
            interval,
            metrics,
        )
    }

    #[test]
    fn test_worker_id_format() {
        let id = worker_id_for("scanner");
        assert!(id.starts_with("scanner-"));
        assert!(id.ends_with(&format!("-{}", std::process::id())));
    }

    #[tokio::test]
    async fn test_start_registers_and_stop_marks_stopped() {
        let ledger = Arc::new(MemoryLedger::new());
        let metrics = Arc::new(Metrics::new());
        let mut lc = lifecycle(ledger.clone(), metrics, Duration::from_secs(30));

        lc.start().await.unwrap();
        assert!(lc.is_heartbeating());
        let row = ledger.worker("settlement-test-1").await.unwrap();
        assert_eq!(row.status, WorkerStatus::Running);
        assert_eq!(row.pid, std::process::id());
        assert_eq!(row.config["scanner"]["enabled"], true);

        lc.stop().await.unwrap();
        assert!(!lc.is_heartbeating());
        let row = ledger.worker("settlement-test-1").await.unwrap();
        assert_eq!(row.status, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_heartbeat_advances_last_heartbeat() {
        let ledger = Arc::new(MemoryLedger::new());
        let metrics = Arc::new(Metrics::new());
        let mut lc = lifecycle(ledger.clone(), metrics, Duration::from_millis(20));

        lc.start().await.unwrap();
        let first = ledger.worker("settlement-test-1").await.unwrap().last_heartbeat;
        tokio::time::sleep(Duration::from_millis(70)).await;
        let later = ledger.worker("settlement-test-1").await.unwrap().last_heartbeat;
        assert!(later > first);

        lc.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_failure_is_not_fatal() {
        let ledger = Arc::new(MemoryLedger::new());
        let metrics = Arc::new(Metrics::new());
        let mut lc = lifecycle(ledger.clone(), metrics.clone(), Duration::from_millis(20));

        lc.start().await.unwrap();
        ledger.set_unavailable(true);
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(metrics.snapshot().heartbeat_failures >= 1);
        assert!(lc.is_heartbeating());

        ledger.set_unavailable(false);
        tokio::time::sleep(Duration::from_millis(40)).await;
        lc.stop().await.unwrap();
        assert_eq!(
            ledger.worker("settlement-test-1").await.unwrap().status,
            WorkerStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_registration_failure_is_reported() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_unavailable(true);
        let mut lc = lifecycle(ledger, Arc::new(Metrics::new()), Duration::from_secs(30));

        assert!(lc.start().await.is_err());
        assert!(!lc.is_heartbeating());
    }
}
