//! # Health Check Handler

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::debug;

use crate::resilience::CircuitRecord;
use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` when every breaker is healthy, otherwise `degraded`
    pub status: &'static str,
    pub timestamp: String,
    pub health_score: f64,
    pub unhealthy_circuits: Vec<String>,
    pub circuit_breakers: Vec<CircuitRecord>,
}

/// Circuit breaker health summary: GET /health
///
/// Always 200; a degraded dependency does not make this process unready.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let metrics = state.registry.system_metrics();
    let unhealthy_circuits: Vec<String> = metrics
        .unhealthy_circuits()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut circuit_breakers: Vec<CircuitRecord> =
        metrics.circuit_breakers.values().cloned().collect();
    circuit_breakers.sort_by(|a, b| a.name.cmp(&b.name));

    let status = if unhealthy_circuits.is_empty() {
        "healthy"
    } else {
        "degraded"
    };
    debug!(status = status, breakers = circuit_breakers.len(), "Health check");

    Json(HealthResponse {
        status,
        timestamp: metrics.collected_at.to_rfc3339(),
        health_score: metrics.health_score(),
        unhealthy_circuits,
        circuit_breakers,
    })
}
