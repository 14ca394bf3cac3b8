//! Health check handler
//!
//! - Healthy: 200 OK + `{"status": "healthy", ...counters}`
//! - Unhealthy: 503 Service Unavailable + `{"status": "unhealthy", ...counters}`
//!
//! A loop is stale when its last finished cycle is older than twice its poll
//! interval. A loop that has not finished a cycle yet is measured from
//! process start. Disabled loops are reported but never make the check fail.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use super::super::state::{GatewayState, WatchedLoop};
use crate::metrics::{Metrics, MetricsSnapshot, now_ms};

pub const HEALTHY: &str = "healthy";
pub const UNHEALTHY: &str = "unhealthy";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LoopHealth {
    pub name: &'static str,
    pub enabled: bool,
    pub healthy: bool,
    /// Milliseconds since the last finished cycle; `None` before the first
    pub last_cycle_age_ms: Option<i64>,
    pub max_age_ms: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    pub status: &'static str,
    pub worker_id: String,
    pub timestamp_ms: i64,
    pub uptime_ms: i64,
    pub database: bool,
    pub loops: Vec<LoopHealth>,
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HEALTHY
    }
}

/// Judge one loop at `now`
pub fn loop_health(watched: &WatchedLoop, metrics: &Metrics, now: i64) -> LoopHealth {
    let max_age_ms = (watched.poll_interval.as_millis() as i64).saturating_mul(2);
    let last = metrics.last_cycle_ms(watched.kind);
    let reference = last.unwrap_or_else(|| metrics.started_at_ms());
    let healthy = !watched.enabled || now - reference <= max_age_ms;

    LoopHealth {
        name: watched.kind.as_str(),
        enabled: watched.enabled,
        healthy,
        last_cycle_age_ms: last.map(|ms| now - ms),
        max_age_ms,
    }
}

/// Build the report from loop state and the database ping result
pub fn evaluate(
    worker_id: &str,
    loops: &[WatchedLoop],
    metrics: &Metrics,
    database: bool,
    now: i64,
) -> HealthReport {
    let loops: Vec<LoopHealth> = loops.iter().map(|l| loop_health(l, metrics, now)).collect();
    let healthy = database && loops.iter().all(|l| l.healthy);

    HealthReport {
        status: if healthy { HEALTHY } else { UNHEALTHY },
        worker_id: worker_id.to_string(),
        timestamp_ms: now,
        uptime_ms: now - metrics.started_at_ms(),
        database,
        loops,
        counters: metrics.snapshot(),
    }
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<Arc<GatewayState>>,
) -> (StatusCode, Json<HealthReport>) {
    let database = match state.ledger.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "[HEALTH] Database ping failed");
            false
        }
    };

    let report = evaluate(
        &state.worker_id,
        &state.loops,
        &state.metrics,
        database,
        now_ms(),
    );

    if report.is_healthy() {
        (StatusCode::OK, Json(report))
    } else {
        tracing::warn!(
            database = report.database,
            stale_loops = ?report.loops.iter().filter(|l| !l.healthy).map(|l| l.name).collect::<Vec<_>>(),
            "[HEALTH] Reporting unhealthy"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(report))
    }
}
