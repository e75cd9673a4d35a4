use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::models::{DlqEntry, DlqReason, Intent, IntentStatus};
use super::IntentStore;
use crate::error::{SettlementError, SettlementResult};

const INTENT_COLUMNS: &str = "id, status, hash, to_address, value, calldata, gas_limit, \
     retry_count, last_error, created_at, updated_at";

/// Postgres-backed intent store; the source of truth for all state.
pub struct PgIntentStore {
    pool: PgPool,
}

impl PgIntentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Boot-time reconciliation: intents left at PROCESSING by a crashed
    /// run are returned to PENDING so the producer picks them up again.
    pub async fn release_stuck_processing(&self) -> SettlementResult<u64> {
        let result = sqlx::query(
            "UPDATE intents SET status = 'PENDING', updated_at = now() \
             WHERE status = 'PROCESSING'",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SettlementError::store("release_stuck_processing", e))?;

        let released = result.rows_affected();
        if released > 0 {
            info!("released {} intents stuck at PROCESSING", released);
        }
        Ok(released)
    }

    /// Dead-letter rows for an intent, oldest first. Operator-facing:
    /// the pipeline itself only ever appends.
    pub async fn dead_letter_entries(&self, intent_id: Uuid) -> SettlementResult<Vec<DlqEntry>> {
        sqlx::query_as::<_, DlqEntry>(
            "SELECT id, intent_id, reason, error_details, enqueued_at FROM dead_letters \
             WHERE intent_id = $1 ORDER BY enqueued_at ASC",
        )
        .bind(intent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SettlementError::store("dead_letter_entries", e))
    }
}

#[async_trait]
impl IntentStore for PgIntentStore {
    async fn get_pending(&self) -> SettlementResult<Vec<Intent>> {
        sqlx::query_as::<_, Intent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM intents WHERE status = 'PENDING' \
             ORDER BY created_at ASC",
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SettlementError::store("get_pending", e))
    }

    async fn get_by_status(&self, status: IntentStatus) -> SettlementResult<Vec<Intent>> {
        sqlx::query_as::<_, Intent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM intents WHERE status = $1 ORDER BY created_at ASC",
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SettlementError::store("get_by_status", e))
    }

    async fn get(&self, id: Uuid) -> SettlementResult<Option<Intent>> {
        sqlx::query_as::<_, Intent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM intents WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SettlementError::store("get", e))
    }

    async fn get_by_hash(&self, hash: &str) -> SettlementResult<Option<Intent>> {
        sqlx::query_as::<_, Intent>(&format!(
            "SELECT {INTENT_COLUMNS} FROM intents WHERE hash = $1",
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SettlementError::store("get_by_hash", e))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: IntentStatus,
        hash: Option<&str>,
    ) -> SettlementResult<()> {
        let result = sqlx::query(
            "UPDATE intents SET status = $2, hash = COALESCE($3, hash), updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(|e| SettlementError::store("set_status", e))?;

        if result.rows_affected() == 0 {
            return Err(SettlementError::store(
                "set_status",
                format!("intent {id} not found"),
            ));
        }
        Ok(())
    }

    async fn increment_retry(&self, id: Uuid) -> SettlementResult<()> {
        sqlx::query(
            "UPDATE intents SET retry_count = retry_count + 1, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SettlementError::store("increment_retry", e))?;
        Ok(())
    }

    async fn record_error(&self, id: Uuid, error: &str) -> SettlementResult<()> {
        sqlx::query("UPDATE intents SET last_error = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|e| SettlementError::store("record_error", e))?;
        Ok(())
    }

    async fn dead_letter(
        &self,
        intent_id: Uuid,
        reason: DlqReason,
        details: Option<&str>,
    ) -> SettlementResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SettlementError::store("dead_letter", e))?;

        sqlx::query(
            "INSERT INTO dead_letters (intent_id, reason, error_details) VALUES ($1, $2, $3)",
        )
        .bind(intent_id)
        .bind(reason.as_str())
        .bind(details)
        .execute(&mut *tx)
        .await
        .map_err(|e| SettlementError::store("dead_letter", e))?;

        sqlx::query("UPDATE intents SET status = 'FAILED', updated_at = now() WHERE id = $1")
            .bind(intent_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| SettlementError::store("dead_letter", e))?;

        tx.commit()
            .await
            .map_err(|e| SettlementError::store("dead_letter", e))?;

        info!(intent = %intent_id, reason = %reason, "intent dead-lettered");
        Ok(())
    }
}
