//! # Web API Module
//!
//! Axum routes in front of the ingestion pipeline:
//!
//! - `POST /webhooks/:provider` - provider push intake, always acknowledged
//! - `POST /v1/sync/:provider` - caller-triggered catch-up, rate limited
//! - `GET /health` - circuit breaker health

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use errors::{ApiError, ApiResult};
pub use middleware::AuthenticatedPrincipal;
pub use routes::router;
pub use state::AppState;

/// Bind `bind_address` and serve `router` until the process stops
pub async fn serve(router: axum::Router, bind_address: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(bind_address = bind_address, "Web API listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
}
