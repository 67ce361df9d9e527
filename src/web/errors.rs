//! # Web API Errors

use crate::rate_limiting::RateLimitDecision;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, Clone)]
pub enum ApiError {
    NotFound { message: String },
    BadRequest { message: String },
    /// Caller exhausted their budget for a rate-limit category
    RateLimited { decision: RateLimitDecision },
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::RateLimited { decision } => return rate_limited_response(&decision),
            ApiError::NotFound { message } => (StatusCode::NOT_FOUND, "NOT_FOUND", message),
            ApiError::BadRequest { message } => (StatusCode::BAD_REQUEST, "BAD_REQUEST", message),
        };

        let body = json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

fn rate_limited_response(decision: &RateLimitDecision) -> Response {
    let retry_after = decision.retry_after().as_secs();
    let body = json!({
        "error": {
            "code": "RATE_LIMITED",
            "message": format!("Rate limit exceeded for category '{}'", decision.category),
            "retry_after_seconds": retry_after,
            "limit": decision.limit,
            "remaining": decision.remaining,
            "reset_time": decision.reset_time.to_rfc3339(),
            "tier": decision.tier,
        }
    });

    let mut headers = rate_limit_headers(decision);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

/// `X-RateLimit-*` headers describing a decision
pub fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(decision.reset_time.timestamp()),
    );
    headers
}

pub type ApiResult<T> = Result<T, ApiError>;
