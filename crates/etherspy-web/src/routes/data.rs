//! Telemetry and status routes.
//!
//! # Endpoints
//!
//! ### `GET /api/data`
//! The Latest Snapshot, newest first.
//!
//! ### `GET /api/stats`
//! Ingestion counters.
//!
//! ### `GET /api/status`
//! Supervisor state, engine launches and the staleness threshold.

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tracing::warn;

use etherspy_core::{Configuration, SensorRecord};
use etherspy_protocol::IngestStatistics;
use etherspy_server::SupervisorState;

use crate::{ApiError, AppState};

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub state: SupervisorState,
    pub engine_launches: u64,
    /// Seconds after which a source's latest record is stale.
    pub stale_threshold: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/data", get(get_data))
        .route("/stats", get(get_stats))
        .route("/status", get(get_status))
}

/// GET /api/data
async fn get_data(State(state): State<AppState>) -> Result<Json<Vec<SensorRecord>>, ApiError> {
    Ok(Json(state.records.latest_per_source().await?))
}

/// GET /api/stats
async fn get_stats(State(state): State<AppState>) -> Json<IngestStatistics> {
    Json(state.stats.snapshot())
}

/// GET /api/status
async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let settings = state.settings.load_settings().await.unwrap_or_else(|e| {
        warn!("Failed to load settings: {}", e);
        Configuration::defaults()
    });

    Json(StatusResponse {
        state: state.restart.state(),
        engine_launches: state.stats.launches(),
        stale_threshold: settings.stale_threshold().as_secs(),
    })
}
