// Durable state for the settlement pipeline: the intents table and the
// dead-letter queue behind a single capability trait.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SettlementResult;
pub use memory::MemoryIntentStore;
pub use models::{DlqEntry, DlqReason, Intent, IntentStatus};
pub use postgres::PgIntentStore;

/// Store capability: every durable consequence of the pipeline goes
/// through this seam. All failures surface as
/// `SettlementError::Store { message, operation }`.
#[async_trait]
pub trait IntentStore: Send + Sync {
    /// PENDING intents ordered by creation time, oldest first.
    async fn get_pending(&self) -> SettlementResult<Vec<Intent>>;

    async fn get_by_status(&self, status: IntentStatus) -> SettlementResult<Vec<Intent>>;

    async fn get(&self, id: Uuid) -> SettlementResult<Option<Intent>>;

    async fn get_by_hash(&self, hash: &str) -> SettlementResult<Option<Intent>>;

    /// Atomic status transition; the transaction hash is only ever passed
    /// together with `Settled` so the two land in one update.
    async fn set_status(
        &self,
        id: Uuid,
        status: IntentStatus,
        hash: Option<&str>,
    ) -> SettlementResult<()>;

    async fn increment_retry(&self, id: Uuid) -> SettlementResult<()>;

    /// Records the most recent attempt's error for the audit trail.
    async fn record_error(&self, id: Uuid, error: &str) -> SettlementResult<()>;

    /// Atomically inserts a dead-letter row and marks the intent FAILED.
    async fn dead_letter(
        &self,
        intent_id: Uuid,
        reason: DlqReason,
        details: Option<&str>,
    ) -> SettlementResult<()>;
}
