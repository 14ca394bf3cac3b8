//! Metrics handler

use std::sync::Arc;

use axum::{Json, extract::State};

use super::super::state::GatewayState;
use crate::metrics::MetricsSnapshot;

/// Counter snapshot as JSON
pub async fn get_metrics(State(state): State<Arc<GatewayState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
