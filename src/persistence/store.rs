use crate::cache::LocalCache;
use crate::config::{IdempotencyConfig, MissingKeyPolicy};
use crate::error::{IdempotencyError, StoreError};
use crate::key::{KeyHasher, KeySelector};
use crate::persistence::{DataRecord, PersistenceStore, RecordStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Store-agnostic record lifecycle layer in front of a concrete
/// [`PersistenceStore`]: key derivation, local-cache consultation, expiry
/// accounting and the save-in-progress / save-success / release flows.
pub struct RecordStore {
    backend: Arc<dyn PersistenceStore>,
    cache: Option<LocalCache>,
    hasher: KeyHasher,
    config: IdempotencyConfig,
}

impl RecordStore {
    pub fn new(
        backend: Arc<dyn PersistenceStore>,
        scope: impl Into<String>,
        config: IdempotencyConfig,
    ) -> Self {
        let cache = config
            .use_local_cache
            .then(|| LocalCache::new(config.local_cache_capacity));
        Self {
            backend,
            cache,
            hasher: KeyHasher::new(scope),
            config,
        }
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&LocalCache> {
        self.cache.as_ref()
    }

    /// Derives the idempotency key from the payload per the configured
    /// selector and missing-key policy.
    pub fn derive_key(&self, payload: &Value) -> Result<String, IdempotencyError> {
        match self.config.key_selector.select(payload) {
            Some(material) if !KeySelector::is_missing(&material) => {
                Ok(self.hasher.hash_material(&material))
            }
            _ => match self.config.missing_key_policy {
                MissingKeyPolicy::Fail => Err(IdempotencyError::MissingIdempotencyKey),
                MissingKeyPolicy::HashWholePayload => {
                    tracing::warn!(
                        selector = ?self.config.key_selector,
                        "no data found for idempotency key, falling back to hashing the whole payload"
                    );
                    Ok(self.hasher.hash_material(payload))
                }
            },
        }
    }

    /// Hashes an explicit caller-chosen key into the scoped key namespace.
    pub fn client_key(&self, client_key: &str) -> String {
        self.hasher.hash_client_key(client_key)
    }

    /// Digest of the validation portion of the payload, `None` when payload
    /// validation is disabled.
    pub fn payload_hash(&self, payload: &Value) -> Option<String> {
        self.config.validation_selector.as_ref().map(|selector| {
            let material = selector.select(payload).unwrap_or(Value::Null);
            KeyHasher::payload_digest(&material)
        })
    }

    /// Claims the key by conditionally creating an in-progress record. The
    /// claim window is bounded by the caller's remaining execution budget
    /// when supplied, else the configured in-progress TTL, and never exceeds
    /// the record expiry itself.
    pub async fn save_in_progress(
        &self,
        idempotency_key: &str,
        payload_hash: Option<String>,
        now: DateTime<Utc>,
        remaining_budget: Option<Duration>,
    ) -> Result<(), StoreError> {
        if let Some(cache) = &self.cache {
            if cache.get(idempotency_key, now).is_some() {
                // A cached record is always a live completed one; no store
                // round-trip needed to refuse the claim.
                return Err(StoreError::AlreadyExists {
                    key: idempotency_key.to_string(),
                });
            }
        }

        let expiry = now + to_chrono(self.config.expiration);
        let claim_window = remaining_budget.or(self.config.in_progress_ttl);
        let in_progress_expiry = claim_window
            .map(|window| now + to_chrono(window))
            .map(|deadline| deadline.min(expiry));

        let record = DataRecord::in_progress(
            idempotency_key.to_string(),
            expiry,
            in_progress_expiry,
            payload_hash,
        );
        tracing::debug!(idempotency_key, "saving in-progress record");
        self.backend.put_record(&record, now).await
    }

    /// Commits a successful execution: the record transitions to completed
    /// with a fresh expiry and the serialized response, and enters the local
    /// cache.
    pub async fn save_success(
        &self,
        idempotency_key: &str,
        payload_hash: Option<String>,
        response_data: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let record = DataRecord::completed(
            idempotency_key.to_string(),
            now + to_chrono(self.config.expiration),
            response_data,
            payload_hash,
        );
        tracing::debug!(idempotency_key, "saving completed record");
        self.backend.update_record(&record).await?;
        self.save_to_cache(&record);
        Ok(())
    }

    /// Fetches the record for the key, local cache first. Expired records
    /// surface as `NotFound`.
    pub async fn fetch(
        &self,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<DataRecord, StoreError> {
        if let Some(cache) = &self.cache {
            if let Some(record) = cache.get(idempotency_key, now) {
                tracing::debug!(idempotency_key, "idempotency record served from local cache");
                return Ok(record);
            }
        }

        let record = self.backend.get_record(idempotency_key).await?;
        if record.is_expired(now) {
            return Err(StoreError::NotFound {
                key: idempotency_key.to_string(),
            });
        }
        self.save_to_cache(&record);
        Ok(record)
    }

    /// Releases a failed claim so a future retry can re-attempt from scratch.
    pub async fn release(&self, idempotency_key: &str) -> Result<(), StoreError> {
        tracing::debug!(idempotency_key, "releasing idempotency claim");
        self.backend.delete_record(idempotency_key).await?;
        if let Some(cache) = &self.cache {
            cache.remove(idempotency_key);
        }
        Ok(())
    }

    // In-progress records never enter the cache: their state can change
    // outside this process and the cache has no way to observe it.
    fn save_to_cache(&self, record: &DataRecord) {
        if record.status != RecordStatus::Completed {
            return;
        }
        if let Some(cache) = &self.cache {
            cache.put(record.clone());
        }
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}
