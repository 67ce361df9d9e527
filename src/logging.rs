//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem.
//! Designed for containerized deployments where logs go to stdout.
//!
//! - Environment-based log level (`SYNC_ENV`, then `APP_ENV`)
//! - `LOG_LEVEL` / `RUST_LOG` overrides
//! - TTY-aware ANSI color output
//! - JSON lines when `SYNC_LOG_FORMAT=json`
//!
//! ## Request correlation
//!
//! Every webhook invocation runs inside a `webhook` span carrying a
//! `request_id`, so breaker transitions, retries, rate-limit warnings and
//! cursor commits from one notification share a single id:
//!
//! ```text
//! x-request-id header  ->  push message id  ->  fresh UUID v4
//! ```

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console tracing once per process.
///
/// Safe to call repeatedly, and tolerates a global subscriber installed by
/// someone else (test harnesses, embedding applications).
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json = use_json_format(std::env::var("SYNC_LOG_FORMAT").ok().as_deref());

        // Determine if we're in a TTY for ANSI color support
        let use_ansi = !json && IsTerminal::is_terminal(&std::io::stdout());

        let text_layer = (!json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
        });
        let json_layer = json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
        });

        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new(&log_level))
            .with(text_layer)
            .with(json_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                log_level = %log_level,
                json = json,
                ansi_colors = use_ansi,
                "Console logging initialized"
            );
        }
    });
}

/// Pick the request id for a webhook invocation
pub fn resolve_request_id(header: Option<&str>, message_id: Option<&str>) -> String {
    header
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| message_id.filter(|value| !value.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Log structured data for sync operations outside a request span
pub fn log_sync_operation(
    operation: &str,
    user_id: &str,
    provider: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        user_id = %user_id,
        provider = %provider,
        status = %status,
        details = details,
        "SYNC_OPERATION"
    );
}

fn get_environment() -> String {
    std::env::var("SYNC_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment variables or environment defaults
fn get_log_level(environment: &str) -> String {
    log_level_for(
        environment,
        std::env::var("LOG_LEVEL").ok(),
        std::env::var("RUST_LOG").ok(),
    )
}

fn log_level_for(environment: &str, log_level: Option<String>, rust_log: Option<String>) -> String {
    if let Some(level) = log_level.or(rust_log) {
        return level.to_lowercase();
    }

    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format(format: Option<&str>) -> bool {
    format.is_some_and(|value| value.eq_ignore_ascii_case("json"))
}
