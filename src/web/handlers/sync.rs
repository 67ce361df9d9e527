//! # Caller-Triggered Sync
//!
//! Lets a user catch their subscription up on demand. Each call is charged to
//! the `sync` rate-limit category for the resolved caller.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::net::SocketAddr;
use tracing::info;

use crate::rate_limiting::{CallerIdentity, Tier};
use crate::sync::ProviderKind;
use crate::web::errors::{rate_limit_headers, ApiError, ApiResult};
use crate::web::middleware::AuthenticatedPrincipal;
use crate::web::state::AppState;

pub const SYNC_RATE_LIMIT_CATEGORY: &str = "sync";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_TIER_HEADER: &str = "x-user-tier";

/// Manual sync: POST /v1/sync/:provider
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(provider_segment): Path<String>,
    principal: Option<Extension<AuthenticatedPrincipal>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let provider: ProviderKind = provider_segment
        .parse()
        .map_err(|_| ApiError::not_found(format!("Unknown provider '{provider_segment}'")))?;

    let body_user = body_user_id(&body);
    let identity = CallerIdentity::resolve(
        principal
            .as_ref()
            .map(|Extension(principal)| principal.user_id.as_str()),
        body_user.as_deref(),
        header_str(&headers, USER_ID_HEADER),
        connect_info.map(|ConnectInfo(address)| address.ip()),
    );
    let tier = Tier::from_header(header_str(&headers, USER_TIER_HEADER));

    let decision = state
        .rate_limiter
        .check_limit(SYNC_RATE_LIMIT_CATEGORY, &identity, tier)
        .await;
    if !decision.allowed {
        info!(
            identity = %identity,
            tier = %tier,
            reset_time = %decision.reset_time,
            "Sync request rate limited"
        );
        return Err(ApiError::RateLimited { decision });
    }

    let Some(user_id) = identity.user_id() else {
        return Err(ApiError::bad_request(
            "A user id is required to trigger a sync",
        ));
    };

    let report = state.pipeline.sweep(user_id, provider).await;
    Ok((rate_limit_headers(&decision), Json(report)).into_response())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// `userId` from a JSON body, if the body is JSON and carries one
fn body_user_id(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()?
        .get("userId")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_user_id() {
        assert_eq!(body_user_id(br#"{"userId":"u-7"}"#), Some("u-7".to_string()));
        assert_eq!(body_user_id(br#"{"userId":7}"#), None);
        assert_eq!(body_user_id(b"not json"), None);
        assert_eq!(body_user_id(b""), None);
    }
}
