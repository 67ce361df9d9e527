//! # Push Notification Intake
//!
//! Providers redeliver any push that is not acknowledged with a 2xx, so
//! every outcome here, including unknown providers and malformed payloads,
//! is acknowledged. Failed runs leave the cursor where it was; the next
//! notification or the reconciliation sweep picks the changes up.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};

use crate::logging::resolve_request_id;
use crate::sync::{Notification, ProviderKind};
use crate::web::middleware::request_id::REQUEST_ID_HEADER;
use crate::web::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub status: String,
}

impl Acknowledgement {
    pub fn acknowledged() -> Self {
        Self {
            status: "acknowledged".to_string(),
        }
    }
}

/// Provider push intake: POST /webhooks/:provider
pub async fn receive_push(
    State(state): State<AppState>,
    Path(provider_segment): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok());

    let provider = match provider_segment.parse::<ProviderKind>() {
        Ok(provider) => provider,
        Err(e) => {
            warn!(provider = %provider_segment, error = %e, "Push for unknown provider");
            return acknowledge(&resolve_request_id(header_id, None));
        }
    };

    let notification = match Notification::decode(provider, &body) {
        Ok(notification) => notification,
        Err(e) => {
            warn!(provider = %provider, error = %e, "Malformed push payload");
            return acknowledge(&resolve_request_id(header_id, None));
        }
    };

    let request_id = resolve_request_id(header_id, notification.message_id.as_deref());
    let span = tracing::info_span!(
        "webhook",
        request_id = %request_id,
        provider = %provider,
        user_id = %notification.user_id,
    );

    async {
        let report = state.pipeline.handle_notification(notification).await;
        info!(
            outcome = ?report.outcome,
            items = report.items.len(),
            committed_cursor = report.committed_cursor.as_deref(),
            "Push handled"
        );
    }
    .instrument(span)
    .await;

    acknowledge(&request_id)
}

fn acknowledge(request_id: &str) -> Response {
    let mut response = (StatusCode::OK, Json(Acknowledgement::acknowledged())).into_response();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
