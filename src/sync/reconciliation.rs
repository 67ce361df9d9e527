//! # Reconciliation Sweep
//!
//! Background catch-up for active subscriptions whose notifications were lost.
//!
//! Each cycle walks every active cursor. Lapsed subscriptions are deactivated;
//! the rest are synced from their stored cursor with
//! [`EventIngestionPipeline::sweep`], which commits the provider's own next
//! cursor. Runs share the pipeline's dedupe cache, so a sweep never overlaps a
//! second sweep for the same subscription.

use crate::logging::log_sync_operation;
use crate::sync::{EventIngestionPipeline, IngestionOutcome, IngestionReport};
use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconciliationSweep {
    pipeline: EventIngestionPipeline,
}

impl ReconciliationSweep {
    pub fn new(pipeline: EventIngestionPipeline) -> Self {
        Self { pipeline }
    }

    /// Configured `pipeline.reconciliation_interval_seconds`
    pub fn configured_interval(&self) -> Duration {
        self.pipeline.settings().reconciliation_interval()
    }

    /// Run one pass over every active subscription
    pub async fn run_once(&self) -> Vec<IngestionReport> {
        let cursors = self.pipeline.cursor_store();
        let active = match cursors.list_active().await {
            Ok(active) => active,
            Err(e) => {
                error!(error = %e, "Reconciliation could not list active subscriptions");
                return Vec::new();
            }
        };

        let now = Utc::now();
        let mut reports = Vec::with_capacity(active.len());

        for cursor in active {
            let provider = cursor.provider.as_str();

            if cursor.is_expired(now) {
                match cursors.deactivate(&cursor.user_id, cursor.provider).await {
                    Ok(()) => log_sync_operation(
                        "reconcile",
                        &cursor.user_id,
                        provider,
                        "expired",
                        Some("subscription deactivated"),
                    ),
                    Err(e) => warn!(
                        user_id = %cursor.user_id,
                        provider = provider,
                        error = %e,
                        "Failed to deactivate expired subscription"
                    ),
                }
                continue;
            }

            let report = self.pipeline.sweep(&cursor.user_id, cursor.provider).await;
            let (status, details) = match &report.outcome {
                IngestionOutcome::Completed => ("ok", None),
                IngestionOutcome::Dropped(reason) => ("dropped", Some(format!("{reason:?}"))),
                IngestionOutcome::AuthExpired(message) => ("auth_expired", Some(message.clone())),
                other => ("failed", Some(format!("{other:?}"))),
            };
            log_sync_operation(
                "reconcile",
                &cursor.user_id,
                provider,
                status,
                details.as_deref(),
            );
            reports.push(report);
        }

        reports
    }

    /// Sweep on every interval tick until the task is aborted
    pub async fn run(&self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_seconds = period.as_secs(),
            "Starting reconciliation sweep"
        );

        loop {
            ticker.tick().await;

            let started = tokio::time::Instant::now();
            let reports = self.run_once().await;
            if reports.is_empty() {
                debug!("No active subscriptions to reconcile");
                continue;
            }

            let completed = reports.iter().filter(|r| r.is_completed()).count();
            info!(
                subscriptions = reports.len(),
                completed = completed,
                processed = reports.iter().map(|r| r.processed_count()).sum::<usize>(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Reconciliation sweep completed"
            );
        }
    }

    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(period).await })
    }
}
