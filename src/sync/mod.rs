//! # Incremental Sync
//!
//! Push-notification driven ingestion of provider changes. A per-(user,
//! provider) cursor records how far the user's change feed has been consumed;
//! each notification fetches the delta since that cursor, processes the new
//! items, and advances the cursor. The reconciliation sweep catches up
//! subscriptions whose notifications were lost.

pub mod cursor;
pub mod notification;
pub mod pipeline;
pub mod processing;
pub mod provider;
pub mod reconciliation;

pub use cursor::{CursorStore, InMemoryCursorStore, PgCursorStore, SyncCursor};
pub use notification::{Notification, PushEnvelope, PushMessage};
pub use pipeline::{
    DropReason, EventIngestionPipeline, IngestionOutcome, IngestionReport, ItemOutcome,
    ItemReport, PipelineCollaborators, SkipReason, AI_RATE_LIMIT_CATEGORY, PROCESSOR_BREAKER,
};
pub use processing::{
    Classification, ItemProcessor, NoUserSettings, ProcessedItemLedger, SenderFilter,
    UserSettings,
};
pub use provider::{
    DeltaItem, DeltaPage, DeltaProvider, Direction, GmailChange, OutlookChange,
    OutlookEmailAddress, OutlookRecipient, ProviderKind,
};
pub use reconciliation::ReconciliationSweep;
