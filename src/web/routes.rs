//! Route definitions for the sync web surface.

use std::any::Any;
use std::time::Duration;

use axum::body::Body;
use axum::http::Response;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::web::handlers;
use crate::web::handlers::webhooks::Acknowledgement;
use crate::web::middleware::request_id::add_request_id;
use crate::web::state::AppState;

/// Budget for caller-facing API requests
pub const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::health_check))
}

/// Provider push intake. Always acknowledged, even if the handler panics.
///
/// No timeout layer here: a 408 would make the provider redeliver, and the
/// hosting platform already bounds the handler's run time.
pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/webhooks/:provider",
            post(handlers::webhooks::receive_push),
        )
        .layer(CatchPanicLayer::custom(acknowledge_after_panic))
}

/// Caller-facing API, rate limited per caller
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/sync/:provider", post(handlers::sync::trigger_sync))
        .layer(TimeoutLayer::new(API_REQUEST_TIMEOUT))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(webhook_routes())
        .nest("/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(add_request_id))
        .with_state(state)
}

fn acknowledge_after_panic(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    error!(panic = %message, "Push handler panicked, acknowledging anyway");

    Json(Acknowledgement::acknowledged()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_panic_response_is_an_acknowledgement() {
        let response = acknowledge_after_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let ack: Acknowledgement = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(ack, Acknowledgement::acknowledged());
    }
}
