use std::collections::HashSet;

use tokio::sync::Mutex;
use uuid::Uuid;

/// Set of intent IDs currently claimed by the pipeline.
///
/// The producer claims IDs before queueing so that a row reappearing in
/// consecutive polls while still being processed is hidden; workers clear
/// the slot once an attempt finishes, success or not.
pub struct InFlightRegistry {
    ids: Mutex<HashSet<Uuid>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self {
            ids: Mutex::new(HashSet::new()),
        }
    }

    /// Atomically adds any IDs not already present and returns the subset
    /// that was newly added.
    pub async fn claim(&self, candidates: &[Uuid]) -> Vec<Uuid> {
        let mut ids = self.ids.lock().await;
        candidates
            .iter()
            .filter(|id| ids.insert(**id))
            .copied()
            .collect()
    }

    pub async fn release(&self, id: &Uuid) -> bool {
        let mut ids = self.ids.lock().await;
        ids.remove(id)
    }

    pub async fn contains(&self, id: &Uuid) -> bool {
        let ids = self.ids.lock().await;
        ids.contains(id)
    }

    pub async fn len(&self) -> usize {
        let ids = self.ids.lock().await;
        ids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InFlightRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_returns_only_new_ids() {
        let registry = InFlightRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let first = registry.claim(&[a, b]).await;
        assert_eq!(first.len(), 2);

        let second = registry.claim(&[a, b]).await;
        assert!(second.is_empty());

        let c = Uuid::new_v4();
        let third = registry.claim(&[a, c]).await;
        assert_eq!(third, vec![c]);
    }

    #[tokio::test]
    async fn release_frees_the_slot_for_reclaim() {
        let registry = InFlightRegistry::new();
        let id = Uuid::new_v4();

        assert_eq!(registry.claim(&[id]).await, vec![id]);
        assert!(registry.release(&id).await);
        assert!(!registry.release(&id).await);
        assert_eq!(registry.claim(&[id]).await, vec![id]);
    }

    #[tokio::test]
    async fn concurrent_claims_never_duplicate() {
        use std::sync::Arc;

        let registry = Arc::new(InFlightRegistry::new());
        let ids: Vec<Uuid> = (0..32).map(|_| Uuid::new_v4()).collect();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let ids = ids.clone();
            tasks.push(tokio::spawn(
                async move { registry.claim(&ids).await.len() },
            ));
        }

        let mut total = 0;
        for task in tasks {
            total += task.await.unwrap();
        }
        assert_eq!(total, ids.len());
        assert_eq!(registry.len().await, ids.len());
    }
}
