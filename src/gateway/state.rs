use std::sync::Arc;
use std::time::Duration;

use crate::ledger::LedgerStore;
use crate::metrics::{LoopKind, Metrics};

/// A poll loop the health check watches
#[derive(Debug, Clone, Copy)]
pub struct WatchedLoop {
    pub kind: LoopKind,
    pub poll_interval: Duration,
    pub enabled: bool,
}

/// Shared state for the HTTP handlers
pub struct GatewayState {
    pub metrics: Arc<Metrics>,
    pub ledger: Arc<dyn LedgerStore>,
    pub worker_id: String,
    pub loops: Vec<WatchedLoop>,
}

impl GatewayState {
    pub fn new(
        metrics: Arc<Metrics>,
        ledger: Arc<dyn LedgerStore>,
        worker_id: String,
        loops: Vec<WatchedLoop>,
    ) -> Self {
        Self {
            metrics,
            ledger,
            worker_id,
            loops,
        }
    }
}
