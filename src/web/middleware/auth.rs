//! # Caller Principal
//!
//! Authentication itself lives in the embedding application. Its middleware
//! inserts an [`AuthenticatedPrincipal`] extension; handlers here only read it
//! as the highest-precedence caller identity.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub user_id: String,
}

impl AuthenticatedPrincipal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Attach a fixed principal to every request
///
/// For hosts that authenticate upstream (an API gateway, a sidecar) and for
/// tests. Install with `axum::middleware::from_fn` in a closure capturing the
/// principal.
pub async fn with_principal(
    principal: AuthenticatedPrincipal,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(principal);
    next.run(request).await
}
