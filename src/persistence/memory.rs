use crate::error::StoreError;
use crate::persistence::{DataRecord, PersistenceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// In-memory persistence store. Reference implementation of the contract's
/// conditional-create semantics and the default test double; a real
/// deployment uses a durable backend shared across instances.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<String, DataRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Raw record access, ignoring expiry. Intended for inspection in tests.
    pub fn peek(&self, idempotency_key: &str) -> Option<DataRecord> {
        self.lock().get(idempotency_key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DataRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn put_record(&self, record: &DataRecord, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut records = self.lock();
        if let Some(existing) = records.get(&record.idempotency_key) {
            if existing.is_live(now) {
                tracing::debug!(
                    idempotency_key = %record.idempotency_key,
                    "conditional put rejected, live record exists"
                );
                return Err(StoreError::AlreadyExists {
                    key: record.idempotency_key.clone(),
                });
            }
        }
        records.insert(record.idempotency_key.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, idempotency_key: &str) -> Result<DataRecord, StoreError> {
        let records = self.lock();
        let record = records
            .get(idempotency_key)
            .ok_or_else(|| StoreError::NotFound {
                key: idempotency_key.to_string(),
            })?;
        if record.is_expired(Utc::now()) {
            return Err(StoreError::NotFound {
                key: idempotency_key.to_string(),
            });
        }
        Ok(record.clone())
    }

    async fn update_record(&self, record: &DataRecord) -> Result<(), StoreError> {
        self.lock()
            .insert(record.idempotency_key.clone(), record.clone());
        Ok(())
    }

    async fn delete_record(&self, idempotency_key: &str) -> Result<(), StoreError> {
        self.lock().remove(idempotency_key);
        Ok(())
    }
}
