use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of a payment intent.
///
/// PENDING rows are picked up by the producer, PROCESSING marks a claimed
/// attempt, SETTLED and FAILED are terminal. FAILED always has a matching
/// dead-letter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "intent_status", rename_all = "UPPERCASE")]
pub enum IntentStatus {
    Pending,
    Processing,
    Settled,
    Failed,
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            IntentStatus::Pending => "PENDING",
            IntentStatus::Processing => "PROCESSING",
            IntentStatus::Settled => "SETTLED",
            IntentStatus::Failed => "FAILED",
        };
        write!(f, "{label}")
    }
}

/// A durable payment intent: the unit of work for the settlement pipeline.
///
/// `value` and `gas_limit` carry arbitrary-precision integers as decimal
/// strings; `calldata` is 0x-prefixed hex. They are parsed into chain
/// types at validation time, never in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Intent {
    pub id: Uuid,
    pub status: IntentStatus,
    pub hash: Option<String>,
    pub to_address: String,
    pub value: String,
    pub calldata: String,
    pub gas_limit: String,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Intent {
    /// A fresh PENDING intent, used by seeders and tests.
    pub fn new(to_address: &str, value: &str, calldata: &str, gas_limit: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: IntentStatus::Pending,
            hash: None,
            to_address: to_address.to_string(),
            value: value.to_string(),
            calldata: calldata.to_string(),
            gas_limit: gas_limit.to_string(),
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Why an intent was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DlqReason {
    PermanentError,
    MaxRetriesExceeded,
}

impl DlqReason {
    /// Canonical operator-facing labels; stored verbatim in the DLQ row.
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqReason::PermanentError => "Permanent Error",
            DlqReason::MaxRetriesExceeded => "Max retries exceeded",
        }
    }
}

impl std::fmt::Display for DlqReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only dead-letter row explaining a FAILED intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DlqEntry {
    pub id: Uuid,
    pub intent_id: Uuid,
    pub reason: String,
    pub error_details: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_intents_start_pending_with_zero_retries() {
        let intent = Intent::new("0x11", "1000", "0x", "21000");
        assert_eq!(intent.status, IntentStatus::Pending);
        assert_eq!(intent.retry_count, 0);
        assert!(intent.hash.is_none());
        assert!(intent.last_error.is_none());
    }

    #[test]
    fn dlq_reason_labels_are_canonical() {
        assert_eq!(DlqReason::PermanentError.to_string(), "Permanent Error");
        assert_eq!(
            DlqReason::MaxRetriesExceeded.to_string(),
            "Max retries exceeded"
        );
    }
}
