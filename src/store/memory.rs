use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{DlqEntry, DlqReason, Intent, IntentStatus};
use super::IntentStore;
use crate::error::{SettlementError, SettlementResult};

/// In-memory intent store mirroring the Postgres semantics.
///
/// Backs the scenario tests and local smoke runs; state lives only as long
/// as the process.
pub struct MemoryIntentStore {
    intents: RwLock<HashMap<Uuid, Intent>>,
    dead_letters: RwLock<Vec<DlqEntry>>,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self {
            intents: RwLock::new(HashMap::new()),
            dead_letters: RwLock::new(Vec::new()),
        }
    }

    pub async fn insert(&self, intent: Intent) {
        let mut intents = self.intents.write().await;
        intents.insert(intent.id, intent);
    }

    pub async fn dead_letter_entries(&self) -> Vec<DlqEntry> {
        self.dead_letters.read().await.clone()
    }

    pub async fn release_stuck_processing(&self) -> SettlementResult<u64> {
        let mut intents = self.intents.write().await;
        let mut released = 0;
        for intent in intents.values_mut() {
            if intent.status == IntentStatus::Processing {
                intent.status = IntentStatus::Pending;
                intent.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn with_intent<F>(&self, id: Uuid, operation: &str, apply: F) -> SettlementResult<()>
    where
        F: FnOnce(&mut Intent),
    {
        let mut intents = self.intents.write().await;
        let intent = intents
            .get_mut(&id)
            .ok_or_else(|| SettlementError::store(operation, format!("intent {id} not found")))?;
        apply(intent);
        intent.updated_at = Utc::now();
        Ok(())
    }
}

impl Default for MemoryIntentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn get_pending(&self) -> SettlementResult<Vec<Intent>> {
        self.get_by_status(IntentStatus::Pending).await
    }

    async fn get_by_status(&self, status: IntentStatus) -> SettlementResult<Vec<Intent>> {
        let intents = self.intents.read().await;
        let mut matching: Vec<Intent> = intents
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|i| i.created_at);
        Ok(matching)
    }

    async fn get(&self, id: Uuid) -> SettlementResult<Option<Intent>> {
        let intents = self.intents.read().await;
        Ok(intents.get(&id).cloned())
    }

    async fn get_by_hash(&self, hash: &str) -> SettlementResult<Option<Intent>> {
        let intents = self.intents.read().await;
        Ok(intents
            .values()
            .find(|i| i.hash.as_deref() == Some(hash))
            .cloned())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: IntentStatus,
        hash: Option<&str>,
    ) -> SettlementResult<()> {
        self.with_intent(id, "set_status", |intent| {
            intent.status = status;
            if let Some(hash) = hash {
                intent.hash = Some(hash.to_string());
            }
        })
        .await
    }

    async fn increment_retry(&self, id: Uuid) -> SettlementResult<()> {
        self.with_intent(id, "increment_retry", |intent| {
            intent.retry_count += 1;
        })
        .await
    }

    async fn record_error(&self, id: Uuid, error: &str) -> SettlementResult<()> {
        self.with_intent(id, "record_error", |intent| {
            intent.last_error = Some(error.to_string());
        })
        .await
    }

    async fn dead_letter(
        &self,
        intent_id: Uuid,
        reason: DlqReason,
        details: Option<&str>,
    ) -> SettlementResult<()> {
        // Both locks are held across the status flip and the DLQ push so
        // no reader ever observes a FAILED intent without its entry.
        let mut intents = self.intents.write().await;
        let mut dead_letters = self.dead_letters.write().await;

        let intent = intents.get_mut(&intent_id).ok_or_else(|| {
            SettlementError::store("dead_letter", format!("intent {intent_id} not found"))
        })?;
        intent.status = IntentStatus::Failed;
        intent.updated_at = Utc::now();

        dead_letters.push(DlqEntry {
            id: Uuid::new_v4(),
            intent_id,
            reason: reason.as_str().to_string(),
            error_details: details.map(|d| d.to_string()),
            enqueued_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_intents_come_back_oldest_first() {
        let store = MemoryIntentStore::new();
        let mut first = Intent::new("0x01", "1", "0x", "21000");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = Intent::new("0x02", "2", "0x", "21000");
        store.insert(second.clone()).await;
        store.insert(first.clone()).await;

        let pending = store.get_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, second.id);
    }

    #[tokio::test]
    async fn settled_status_and_hash_land_together() {
        let store = MemoryIntentStore::new();
        let intent = Intent::new("0x01", "1", "0x", "21000");
        let id = intent.id;
        store.insert(intent).await;

        store
            .set_status(id, IntentStatus::Settled, Some("0xabc"))
            .await
            .unwrap();

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Settled);
        assert_eq!(stored.hash.as_deref(), Some("0xabc"));
        assert_eq!(store.get_by_hash("0xabc").await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn dead_letter_marks_failed_and_appends_entry() {
        let store = MemoryIntentStore::new();
        let intent = Intent::new("0x01", "1", "0x", "21000");
        let id = intent.id;
        store.insert(intent).await;

        store
            .dead_letter(id, DlqReason::PermanentError, Some("execution reverted"))
            .await
            .unwrap();

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Failed);
        let entries = store.dead_letter_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].intent_id, id);
        assert_eq!(entries[0].reason, "Permanent Error");
    }

    #[tokio::test]
    async fn stuck_processing_rows_are_released_on_sweep() {
        let store = MemoryIntentStore::new();
        let mut intent = Intent::new("0x01", "1", "0x", "21000");
        intent.status = IntentStatus::Processing;
        let id = intent.id;
        store.insert(intent).await;

        let released = store.release_stuck_processing().await.unwrap();
        assert_eq!(released, 1);
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            IntentStatus::Pending
        );
    }

    #[tokio::test]
    async fn operations_on_unknown_intents_surface_store_errors() {
        let store = MemoryIntentStore::new();
        let err = store
            .set_status(Uuid::new_v4(), IntentStatus::Settled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Store { .. }));
    }
}
