//! # Web Middleware

pub mod auth;
pub mod request_id;

pub use auth::AuthenticatedPrincipal;
pub use request_id::RequestId;
