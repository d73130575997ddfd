use crate::error::StoreError;
use crate::persistence::{DataRecord, PersistenceStore, RecordStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;

const STATUS_FIELD: &str = "status";
const EXPIRY_FIELD: &str = "expiry";
const IN_PROGRESS_EXPIRY_FIELD: &str = "in-progress-expiry";
const DATA_FIELD: &str = "data";
const VALIDATION_FIELD: &str = "validation";

// The conditional create must be atomic, so the liveness check and the
// write run as one Lua script: proceed when the key is absent, the record
// has expired, or an in-progress claim has outlived its window.
const PUT_RECORD_SCRIPT: &str = r#"
if redis.call('exists', KEYS[1]) == 0
    or tonumber(redis.call('hget', KEYS[1], 'expiry')) < tonumber(ARGV[1])
    or (redis.call('hget', KEYS[1], 'status') == 'INPROGRESS'
        and redis.call('hexists', KEYS[1], 'in-progress-expiry') == 1
        and tonumber(redis.call('hget', KEYS[1], 'in-progress-expiry')) < tonumber(ARGV[2]))
then
    redis.call('del', KEYS[1])
    for i = 3, #ARGV, 2 do
        redis.call('hset', KEYS[1], ARGV[i], ARGV[i + 1])
    end
    return 1
else
    return 0
end
"#;

/// Redis-backed persistence store. Records live in a hash per key; record
/// expiry doubles as the Redis key TTL so expired records vanish on their
/// own.
pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(client: redis::Client) -> Self {
        Self::with_key_prefix(client, "idempotency")
    }

    pub fn with_key_prefix(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn storage_key(&self, idempotency_key: &str) -> String {
        format!("{}:{}", self.key_prefix, idempotency_key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))
    }

    fn record_fields(record: &DataRecord) -> Vec<(String, String)> {
        let mut fields = vec![
            (STATUS_FIELD.to_string(), record.status.as_str().to_string()),
            (
                EXPIRY_FIELD.to_string(),
                record.expiry_timestamp.timestamp().to_string(),
            ),
        ];
        if let Some(deadline) = record.in_progress_expiry_timestamp {
            fields.push((
                IN_PROGRESS_EXPIRY_FIELD.to_string(),
                deadline.timestamp_millis().to_string(),
            ));
        }
        if let Some(data) = &record.response_data {
            fields.push((DATA_FIELD.to_string(), data.clone()));
        }
        if let Some(hash) = &record.payload_hash {
            fields.push((VALIDATION_FIELD.to_string(), hash.clone()));
        }
        fields
    }

    fn record_from_fields(
        idempotency_key: &str,
        fields: &HashMap<String, String>,
    ) -> Result<DataRecord, StoreError> {
        let corrupt = |reason: String| StoreError::Backend(anyhow::anyhow!(reason));

        let status = fields
            .get(STATUS_FIELD)
            .and_then(|s| RecordStatus::parse(s))
            .ok_or_else(|| corrupt(format!("corrupt record for {idempotency_key}: bad status")))?;
        let expiry_seconds = fields
            .get(EXPIRY_FIELD)
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| corrupt(format!("corrupt record for {idempotency_key}: bad expiry")))?;
        let expiry_timestamp = DateTime::from_timestamp(expiry_seconds, 0)
            .ok_or_else(|| corrupt(format!("corrupt record for {idempotency_key}: bad expiry")))?;

        let in_progress_expiry_timestamp = match fields.get(IN_PROGRESS_EXPIRY_FIELD) {
            Some(raw) => Some(
                raw.parse::<i64>()
                    .ok()
                    .and_then(DateTime::from_timestamp_millis)
                    .ok_or_else(|| {
                        corrupt(format!(
                            "corrupt record for {idempotency_key}: bad in-progress expiry"
                        ))
                    })?,
            ),
            None => None,
        };

        Ok(DataRecord {
            idempotency_key: idempotency_key.to_string(),
            status,
            expiry_timestamp,
            in_progress_expiry_timestamp,
            response_data: fields.get(DATA_FIELD).cloned(),
            payload_hash: fields.get(VALIDATION_FIELD).cloned(),
        })
    }
}

#[async_trait]
impl PersistenceStore for RedisStore {
    async fn put_record(&self, record: &DataRecord, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let key = self.storage_key(&record.idempotency_key);

        let script = redis::Script::new(PUT_RECORD_SCRIPT);
        let mut invocation = script.key(&key);
        invocation
            .arg(now.timestamp())
            .arg(now.timestamp_millis());
        for (field, value) in Self::record_fields(record) {
            invocation.arg(field).arg(value);
        }

        let created: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;

        if created == 0 {
            tracing::debug!(
                idempotency_key = %record.idempotency_key,
                "conditional put rejected, live record exists"
            );
            return Err(StoreError::AlreadyExists {
                key: record.idempotency_key.clone(),
            });
        }

        let _: () = conn
            .expire_at(&key, record.expiry_timestamp.timestamp())
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;
        Ok(())
    }

    async fn get_record(&self, idempotency_key: &str) -> Result<DataRecord, StoreError> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(self.storage_key(idempotency_key))
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;

        if fields.is_empty() {
            return Err(StoreError::NotFound {
                key: idempotency_key.to_string(),
            });
        }

        let record = Self::record_from_fields(idempotency_key, &fields)?;
        if record.is_expired(Utc::now()) {
            return Err(StoreError::NotFound {
                key: idempotency_key.to_string(),
            });
        }
        Ok(record)
    }

    async fn update_record(&self, record: &DataRecord) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let key = self.storage_key(&record.idempotency_key);

        // Rewrite the hash wholesale: fields the record no longer carries
        // (the in-progress deadline once completed) must not linger.
        let fields = Self::record_fields(record);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&key)
            .hset_multiple(&key, &fields)
            .expire_at(&key, record.expiry_timestamp.timestamp());
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;
        Ok(())
    }

    async fn delete_record(&self, idempotency_key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(self.storage_key(idempotency_key))
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;
        Ok(())
    }
}
