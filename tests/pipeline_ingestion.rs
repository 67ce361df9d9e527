//! End-to-end ingestion through the pipeline with faked collaborators.

mod common;

use common::{gmail_page, test_config, FakeLedger, Harness};
use provider_sync::config::{ComponentBreakerConfig, RateLimitCategory};
use provider_sync::error::ProviderError;
use provider_sync::sync::{
    CursorStore, DropReason, IngestionOutcome, ItemOutcome, Notification, ProviderKind,
    ReconciliationSweep, SenderFilter, SkipReason,
};
use serde_json::json;
use std::time::Duration;

const INBOX: &[&str] = &["INBOX"];
const SENT: &[&str] = &["SENT"];

fn notification(user_id: &str, cursor: &str) -> Notification {
    Notification {
        user_id: user_id.to_string(),
        provider: ProviderKind::Gmail,
        cursor_token: cursor.to_string(),
        message_id: Some(format!("msg-{cursor}")),
        publish_time: None,
    }
}

fn outcome_of<'a>(
    report: &'a provider_sync::sync::IngestionReport,
    item_id: &str,
) -> &'a ItemOutcome {
    &report
        .items
        .iter()
        .find(|item| item.item_id == item_id)
        .unwrap_or_else(|| panic!("no report for {item_id}"))
        .outcome
}

#[tokio::test]
async fn test_notification_processes_new_items_and_advances_cursor() {
    let harness = Harness::new(test_config());
    harness.subscribe("u1@example.com", "90").await;
    harness.provider.set_fallback(Ok(gmail_page(
        "100",
        &[
            ("m1", "Alice <alice@partner.com>", INBOX),
            ("m2", "bob@customer.io", INBOX),
            ("m3", "u1@example.com", SENT),
        ],
    )));

    let report = harness
        .pipeline
        .handle_notification(notification("u1@example.com", "100"))
        .await;

    assert_eq!(report.outcome, IngestionOutcome::Completed);
    assert_eq!(report.committed_cursor.as_deref(), Some("100"));
    assert_eq!(outcome_of(&report, "m1"), &ItemOutcome::Processed);
    assert_eq!(outcome_of(&report, "m2"), &ItemOutcome::Processed);
    // Outbound items are labeled only
    assert_eq!(outcome_of(&report, "m3"), &ItemOutcome::Classified);

    assert_eq!(harness.processor.processed(), vec!["m1", "m2"]);
    assert_eq!(harness.processor.classified(), vec!["m1", "m2", "m3"]);
    assert_eq!(harness.provider.calls()[0], ("90".to_string(), None));
    assert_eq!(harness.stored_cursor("u1@example.com").await.as_deref(), Some("100"));

    let cursor = harness
        .cursors
        .load("u1@example.com", ProviderKind::Gmail)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cursor.notification_count, 1);
    assert!(cursor.last_notification_at.is_some());
}

#[tokio::test]
async fn test_exhausted_quota_still_classifies_and_commits() {
    let harness = Harness::with_parts(
        test_config(),
        FakeLedger::new().with_today_count(50),
        SenderFilter::default(),
    );
    harness.subscribe("u1", "90").await;
    harness.provider.set_fallback(Ok(gmail_page(
        "100",
        &[
            ("m1", "a@x.com", INBOX),
            ("m2", "b@x.com", INBOX),
            ("m3", "u1", SENT),
        ],
    )));

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;

    assert!(report.is_completed());
    assert_eq!(report.items.len(), 3);
    assert_eq!(
        outcome_of(&report, "m1"),
        &ItemOutcome::Skipped(SkipReason::QuotaExhausted)
    );
    assert_eq!(
        outcome_of(&report, "m2"),
        &ItemOutcome::Skipped(SkipReason::QuotaExhausted)
    );
    // Outbound items never draw on the quota
    assert_eq!(outcome_of(&report, "m3"), &ItemOutcome::Classified);
    assert!(report
        .items
        .iter()
        .all(|item| item.label.as_deref() == Some("needs-reply")));

    assert!(harness.processor.processed().is_empty());
    assert_eq!(harness.processor.classified(), vec!["m1", "m2", "m3"]);
    assert_eq!(harness.stored_cursor("u1").await.as_deref(), Some("100"));
}

#[tokio::test]
async fn test_quota_is_never_exceeded_by_concurrent_workers() {
    let harness = Harness::with_parts(
        test_config(),
        FakeLedger::new().with_today_count(49),
        SenderFilter::default(),
    );
    harness.processor.set_delay(Duration::from_millis(10));
    harness.subscribe("u1", "90").await;
    harness.provider.set_fallback(Ok(gmail_page(
        "100",
        &[
            ("m1", "a@x.com", INBOX),
            ("m2", "b@x.com", INBOX),
            ("m3", "c@x.com", INBOX),
        ],
    )));

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;

    assert_eq!(report.processed_count(), 1);
    assert_eq!(report.skipped_count(SkipReason::QuotaExhausted), 2);
    assert_eq!(harness.processor.processed().len(), 1);
}

#[tokio::test]
async fn test_ledger_outage_skips_heavy_processing() {
    let ledger = FakeLedger::new();
    ledger.set_unavailable(true);
    let harness = Harness::with_parts(test_config(), ledger, SenderFilter::default());
    harness.subscribe("u1", "90").await;
    harness
        .provider
        .set_fallback(Ok(gmail_page("100", &[("m1", "a@x.com", INBOX)])));

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;

    assert_eq!(
        outcome_of(&report, "m1"),
        &ItemOutcome::Skipped(SkipReason::QuotaExhausted)
    );
    assert!(report.is_completed());
}

#[tokio::test]
async fn test_redelivered_notification_is_idempotent() {
    let harness = Harness::new(test_config());
    harness.subscribe("u1", "90").await;
    harness.provider.set_fallback(Ok(gmail_page(
        "100",
        &[("m1", "a@x.com", INBOX), ("m2", "b@x.com", INBOX)],
    )));

    let first = harness.pipeline.handle_notification(notification("u1", "100")).await;
    let second = harness.pipeline.handle_notification(notification("u1", "100")).await;

    assert_eq!(first.processed_count(), 2);
    assert_eq!(second.processed_count(), 0);
    assert_eq!(second.skipped_count(SkipReason::AlreadyProcessed), 2);
    assert_eq!(harness.processor.processed(), vec!["m1", "m2"]);
    assert_eq!(harness.stored_cursor("u1").await.as_deref(), Some("100"));
}

#[tokio::test]
async fn test_concurrent_identical_notifications_share_one_run() {
    let harness = Harness::new(test_config());
    harness.subscribe("u1", "90").await;
    harness.provider.set_delay(Duration::from_millis(50));
    harness
        .provider
        .set_fallback(Ok(gmail_page("100", &[("m1", "a@x.com", INBOX)])));

    let (first, second) = tokio::join!(
        harness.pipeline.handle_notification(notification("u1", "100")),
        harness.pipeline.handle_notification(notification("u1", "100")),
    );

    assert_eq!(harness.provider.call_count(), 1);
    assert_eq!(first.processed_count(), 1);
    assert_eq!(second.processed_count(), 1);
    assert_eq!(harness.processor.processed(), vec!["m1"]);
}

#[tokio::test]
async fn test_transient_fetch_failure_leaves_cursor_unchanged() {
    let harness = Harness::new(test_config());
    harness.subscribe("u1", "90").await;
    harness
        .provider
        .set_fallback(Err(ProviderError::TransientNetwork("connection reset".into())));

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;

    assert!(matches!(report.outcome, IngestionOutcome::FetchFailed(_)));
    // One attempt plus two retries
    assert_eq!(harness.provider.call_count(), 3);
    assert_eq!(report.committed_cursor, None);
    assert_eq!(harness.stored_cursor("u1").await.as_deref(), Some("90"));
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let harness = Harness::new(test_config());
    harness.subscribe("u1", "90").await;
    harness
        .provider
        .push_response(Err(ProviderError::TransientNetwork("503".into())));
    harness
        .provider
        .push_response(Ok(gmail_page("100", &[("m1", "a@x.com", INBOX)])));

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;

    assert!(report.is_completed());
    assert_eq!(harness.provider.call_count(), 2);
    assert_eq!(harness.stored_cursor("u1").await.as_deref(), Some("100"));
}

#[tokio::test]
async fn test_auth_expired_is_reported_distinctly() {
    let harness = Harness::new(test_config());
    harness.subscribe("u1", "90").await;
    harness
        .provider
        .set_fallback(Err(ProviderError::AuthExpired("invalid_grant".into())));

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;

    assert_eq!(
        report.outcome,
        IngestionOutcome::AuthExpired("invalid_grant".into())
    );
    // Not retryable
    assert_eq!(harness.provider.call_count(), 1);

    let cursor = harness
        .cursors
        .load("u1", ProviderKind::Gmail)
        .await
        .unwrap()
        .unwrap();
    assert!(cursor.subscription_active);
    assert_eq!(cursor.cursor_token, "90");
}

#[tokio::test]
async fn test_provider_subscription_expiry_deactivates() {
    let harness = Harness::new(test_config());
    harness.subscribe("u1", "90").await;
    harness
        .provider
        .set_fallback(Err(ProviderError::SubscriptionExpired("watch expired".into())));

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;
    assert!(matches!(report.outcome, IngestionOutcome::SubscriptionExpired(_)));

    let next = harness.pipeline.handle_notification(notification("u1", "110")).await;
    assert_eq!(next.outcome, IngestionOutcome::Dropped(DropReason::Inactive));
}

#[tokio::test]
async fn test_unknown_and_expired_subscriptions_are_dropped() {
    let harness = Harness::new(test_config());

    let report = harness.pipeline.handle_notification(notification("ghost", "5")).await;
    assert_eq!(
        report.outcome,
        IngestionOutcome::Dropped(DropReason::NoSubscription)
    );

    harness
        .cursors
        .establish(
            "lapsed",
            ProviderKind::Gmail,
            "40",
            chrono::Utc::now() - chrono::Duration::hours(1),
        )
        .await
        .unwrap();
    let report = harness.pipeline.handle_notification(notification("lapsed", "50")).await;
    assert_eq!(report.outcome, IngestionOutcome::Dropped(DropReason::Expired));

    let cursor = harness
        .cursors
        .load("lapsed", ProviderKind::Gmail)
        .await
        .unwrap()
        .unwrap();
    assert!(!cursor.subscription_active);
    assert_eq!(harness.provider.call_count(), 0);
}

#[tokio::test]
async fn test_excluded_senders_are_skipped() {
    let harness = Harness::with_parts(
        test_config(),
        FakeLedger::new(),
        SenderFilter::new(Vec::<String>::new(), ["promo.example"]),
    );
    harness.subscribe("u1", "90").await;
    harness.provider.set_fallback(Ok(gmail_page(
        "100",
        &[
            ("m1", "Mail Delivery <MAILER-DAEMON@googlemail.com>", INBOX),
            ("m2", "deals@news.promo.example", INBOX),
            ("m3", "friend@example.org", INBOX),
        ],
    )));

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;

    assert_eq!(report.skipped_count(SkipReason::ExcludedSender), 2);
    assert_eq!(outcome_of(&report, "m3"), &ItemOutcome::Processed);
    assert_eq!(harness.processor.classified(), vec!["m3"]);
}

#[tokio::test]
async fn test_batch_overflow_is_reported() {
    let mut config = test_config();
    config.pipeline.max_items_per_batch = 2;
    let harness = Harness::new(config);
    harness.subscribe("u1", "90").await;
    harness.provider.set_fallback(Ok(gmail_page(
        "100",
        &[
            ("m1", "a@x.com", INBOX),
            ("m2", "b@x.com", INBOX),
            ("m3", "c@x.com", INBOX),
        ],
    )));

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;

    assert_eq!(report.items.len(), 3);
    assert_eq!(
        outcome_of(&report, "m3"),
        &ItemOutcome::Skipped(SkipReason::BatchOverflow)
    );
    assert_eq!(report.processed_count(), 2);
}

#[tokio::test]
async fn test_item_failures_do_not_block_siblings() {
    let harness = Harness::new(test_config());
    harness.processor.fail_on("m1");
    harness.processor.panic_on("m2");
    harness.subscribe("u1", "90").await;
    harness.provider.set_fallback(Ok(gmail_page(
        "100",
        &[
            ("m1", "a@x.com", INBOX),
            ("m2", "b@x.com", INBOX),
            ("m3", "c@x.com", INBOX),
        ],
    )));

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;

    assert!(report.is_completed());
    assert!(matches!(outcome_of(&report, "m1"), ItemOutcome::Failed(_)));
    assert_eq!(
        outcome_of(&report, "m2"),
        &ItemOutcome::Failed("item processing panicked".into())
    );
    assert_eq!(outcome_of(&report, "m3"), &ItemOutcome::Processed);
    assert_eq!(harness.stored_cursor("u1").await.as_deref(), Some("100"));
}

#[tokio::test]
async fn test_panicking_fetch_aborts_run_without_poisoning_redelivery() {
    let harness = Harness::new(test_config());
    harness.subscribe("u1", "90").await;
    harness.provider.set_panicking(true);

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;

    match &report.outcome {
        IngestionOutcome::Aborted(message) => assert!(message.contains("blew up")),
        other => panic!("expected an aborted run, got {other:?}"),
    }
    assert!(report.committed_cursor.is_none());
    assert_eq!(harness.stored_cursor("u1").await.as_deref(), Some("90"));

    // The same notification runs again once the provider recovers
    harness.provider.set_panicking(false);
    harness
        .provider
        .set_fallback(Ok(gmail_page("100", &[("m1", "a@x.com", INBOX)])));

    let retried = harness.pipeline.handle_notification(notification("u1", "100")).await;
    assert_eq!(retried.outcome, IngestionOutcome::Completed);
    assert_eq!(retried.processed_count(), 1);
    assert_eq!(harness.stored_cursor("u1").await.as_deref(), Some("100"));
}

#[tokio::test]
async fn test_ai_rate_limit_caps_heavy_processing() {
    let mut config = test_config();
    config
        .rate_limits
        .categories
        .insert("ai".into(), RateLimitCategory::new(1, 3600));
    let harness = Harness::new(config);
    harness.subscribe("u1", "90").await;
    harness.provider.set_fallback(Ok(gmail_page(
        "100",
        &[("m1", "a@x.com", INBOX), ("m2", "b@x.com", INBOX)],
    )));

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;

    assert_eq!(report.processed_count(), 1);
    assert_eq!(report.skipped_count(SkipReason::RateLimited), 1);
}

#[tokio::test]
async fn test_open_circuit_short_circuits_fetches() {
    let mut config = test_config();
    config.circuit_breakers.components.insert(
        "gmail".into(),
        ComponentBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            reset_timeout_seconds: 300,
        },
    );
    let harness = Harness::new(config);
    harness.subscribe("u1", "90").await;
    harness
        .provider
        .set_fallback(Err(ProviderError::TransientNetwork("timeout".into())));

    let first = harness.pipeline.handle_notification(notification("u1", "100")).await;
    assert!(matches!(first.outcome, IngestionOutcome::FetchFailed(_)));
    // The breaker opened after the first failure and rejected the retry
    assert_eq!(harness.provider.call_count(), 1);

    let second = harness.pipeline.handle_notification(notification("u1", "110")).await;
    match second.outcome {
        IngestionOutcome::FetchFailed(message) => assert!(message.contains("gmail")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(harness.provider.call_count(), 1);
    assert_eq!(harness.stored_cursor("u1").await.as_deref(), Some("90"));
}

#[tokio::test]
async fn test_sweep_follows_pages_and_commits_provider_cursor() {
    let harness = Harness::new(test_config());
    harness.subscribe("u1", "90").await;

    let mut first_page = gmail_page("110", &[("m1", "a@x.com", INBOX)]);
    first_page["nextPageToken"] = json!("p2");
    harness.provider.push_response(Ok(first_page));
    harness
        .provider
        .push_response(Ok(gmail_page("120", &[("m2", "b@x.com", INBOX)])));

    let report = harness.pipeline.sweep("u1", ProviderKind::Gmail).await;

    assert!(report.is_completed());
    assert_eq!(report.processed_count(), 2);
    assert_eq!(report.committed_cursor.as_deref(), Some("120"));
    assert_eq!(
        harness.provider.calls(),
        vec![
            ("90".to_string(), None),
            ("90".to_string(), Some("p2".to_string())),
        ]
    );

    let cursor = harness
        .cursors
        .load("u1", ProviderKind::Gmail)
        .await
        .unwrap()
        .unwrap();
    // Sweeps are not notifications
    assert_eq!(cursor.notification_count, 0);
}

#[tokio::test]
async fn test_reconciliation_sweeps_active_and_deactivates_lapsed() {
    let harness = Harness::new(test_config());
    harness.subscribe("active", "90").await;
    harness
        .cursors
        .establish(
            "lapsed",
            ProviderKind::Gmail,
            "10",
            chrono::Utc::now() - chrono::Duration::minutes(5),
        )
        .await
        .unwrap();
    harness
        .provider
        .set_fallback(Ok(gmail_page("95", &[("m1", "a@x.com", INBOX)])));

    let sweep = ReconciliationSweep::new(harness.pipeline.clone());
    let reports = sweep.run_once().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].user_id, "active");
    assert_eq!(harness.stored_cursor("active").await.as_deref(), Some("95"));

    let active = harness.cursors.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].user_id, "active");
}

#[tokio::test]
async fn test_teardown_stops_ingestion() {
    let harness = Harness::new(test_config());
    harness.subscribe("u1", "90").await;
    harness
        .pipeline
        .teardown_subscription("u1", ProviderKind::Gmail)
        .await
        .unwrap();

    let report = harness.pipeline.handle_notification(notification("u1", "100")).await;
    assert_eq!(report.outcome, IngestionOutcome::Dropped(DropReason::Inactive));
}

#[tokio::test(start_paused = true)]
async fn test_dedup_cleanup_task_stops_with_pipeline() {
    let harness = Harness::new(test_config());
    let cleanup = harness.pipeline.spawn_dedup_cleanup();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!cleanup.is_finished());

    // The task holds only a weak handle to the cache
    drop(harness);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(cleanup.is_finished());
}
