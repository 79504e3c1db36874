use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app_state::AppState;
use crate::models::verification::QueueSnapshot;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub queue: QueueSnapshot,
    pub cache: CacheHealth,
}

#[derive(Serialize)]
pub struct CacheHealth {
    pub entries: usize,
    pub ttl_ms: u64,
}

/// GET /health — process liveness plus queue/pool and cache occupancy.
/// Always 200: the browser is launched lazily per job, so there is no
/// external dependency to degrade on.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "sacs-verify".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        queue: state.orchestrator.queue_snapshot(),
        cache: CacheHealth {
            entries: state.orchestrator.cache_entries(),
            ttl_ms: state.orchestrator.cache_ttl().as_millis() as u64,
        },
    })
}
