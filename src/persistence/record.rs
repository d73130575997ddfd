use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an idempotency record. `Expired` is a read-time interpretation;
/// it is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    InProgress,
    Completed,
    Expired,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::InProgress => "INPROGRESS",
            RecordStatus::Completed => "COMPLETED",
            RecordStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INPROGRESS" => Some(RecordStatus::InProgress),
            "COMPLETED" => Some(RecordStatus::Completed),
            "EXPIRED" => Some(RecordStatus::Expired),
            _ => None,
        }
    }
}

/// The unit of idempotency state, keyed by the computed idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub idempotency_key: String,
    /// Stored status: `InProgress` or `Completed`, never `Expired`.
    pub status: RecordStatus,
    /// When a completed record stops being honored.
    pub expiry_timestamp: DateTime<Utc>,
    /// A shorter bound on how long a claim may remain in progress before
    /// another caller is allowed to reclaim it.
    pub in_progress_expiry_timestamp: Option<DateTime<Utc>>,
    /// Serialized result of the protected operation, present once completed.
    pub response_data: Option<String>,
    /// Digest of the original key material, for payload validation.
    pub payload_hash: Option<String>,
}

impl DataRecord {
    pub fn in_progress(
        idempotency_key: String,
        expiry_timestamp: DateTime<Utc>,
        in_progress_expiry_timestamp: Option<DateTime<Utc>>,
        payload_hash: Option<String>,
    ) -> Self {
        Self {
            idempotency_key,
            status: RecordStatus::InProgress,
            expiry_timestamp,
            in_progress_expiry_timestamp,
            response_data: None,
            payload_hash,
        }
    }

    pub fn completed(
        idempotency_key: String,
        expiry_timestamp: DateTime<Utc>,
        response_data: String,
        payload_hash: Option<String>,
    ) -> Self {
        Self {
            idempotency_key,
            status: RecordStatus::Completed,
            expiry_timestamp,
            in_progress_expiry_timestamp: None,
            response_data: Some(response_data),
            payload_hash,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_timestamp
    }

    /// True for an in-progress record whose claim window has elapsed; such a
    /// claim is reclaimable by another caller.
    pub fn is_stale_claim(&self, now: DateTime<Utc>) -> bool {
        self.status == RecordStatus::InProgress
            && self
                .in_progress_expiry_timestamp
                .is_some_and(|deadline| deadline < now)
    }

    /// A record is live while it is neither expired nor a stale claim; only
    /// live records block a conditional create.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_stale_claim(now)
    }

    /// Read-time status: reports `Expired` once the expiry timestamp elapses.
    pub fn effective_status(&self, now: DateTime<Utc>) -> RecordStatus {
        if self.is_expired(now) {
            RecordStatus::Expired
        } else {
            self.status
        }
    }
}
