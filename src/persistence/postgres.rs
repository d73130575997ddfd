use crate::error::StoreError;
use crate::persistence::{DataRecord, PersistenceStore, RecordStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// PostgreSQL-backed persistence store. The conditional create relies on the
/// primary key constraint plus a guarded upsert, so claim races resolve
/// inside a single statement.
pub struct PostgresStore {
    pool: PgPool,
}

/// Expected table layout; run once per database.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS idempotency_records (
    idempotency_key TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    expiry_timestamp TIMESTAMPTZ NOT NULL,
    in_progress_expiry_timestamp TIMESTAMPTZ,
    response_data TEXT,
    payload_hash TEXT
)
"#;

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the backing table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;
        Ok(())
    }

    fn row_to_record(
        row: (
            String,
            String,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
            Option<String>,
            Option<String>,
        ),
    ) -> Result<DataRecord, StoreError> {
        let (idempotency_key, status, expiry, in_progress_expiry, response_data, payload_hash) =
            row;
        let status = RecordStatus::parse(&status).ok_or_else(|| {
            StoreError::Backend(anyhow::anyhow!(
                "corrupt record for {idempotency_key}: unknown status {status}"
            ))
        })?;
        Ok(DataRecord {
            idempotency_key,
            status,
            expiry_timestamp: expiry,
            in_progress_expiry_timestamp: in_progress_expiry,
            response_data,
            payload_hash,
        })
    }
}

#[async_trait]
impl PersistenceStore for PostgresStore {
    async fn put_record(&self, record: &DataRecord, now: DateTime<Utc>) -> Result<(), StoreError> {
        // The upsert only fires when the existing row is expired or a stale
        // in-progress claim; a live row leaves rows_affected at zero.
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_records
                (idempotency_key, status, expiry_timestamp, in_progress_expiry_timestamp, response_data, payload_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (idempotency_key) DO UPDATE
            SET status = EXCLUDED.status,
                expiry_timestamp = EXCLUDED.expiry_timestamp,
                in_progress_expiry_timestamp = EXCLUDED.in_progress_expiry_timestamp,
                response_data = EXCLUDED.response_data,
                payload_hash = EXCLUDED.payload_hash
            WHERE idempotency_records.expiry_timestamp < $7
               OR (idempotency_records.status = 'INPROGRESS'
                   AND idempotency_records.in_progress_expiry_timestamp IS NOT NULL
                   AND idempotency_records.in_progress_expiry_timestamp < $7)
            "#,
        )
        .bind(&record.idempotency_key)
        .bind(record.status.as_str())
        .bind(record.expiry_timestamp)
        .bind(record.in_progress_expiry_timestamp)
        .bind(&record.response_data)
        .bind(&record.payload_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                idempotency_key = %record.idempotency_key,
                "conditional put rejected, live record exists"
            );
            return Err(StoreError::AlreadyExists {
                key: record.idempotency_key.clone(),
            });
        }
        Ok(())
    }

    async fn get_record(&self, idempotency_key: &str) -> Result<DataRecord, StoreError> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                DateTime<Utc>,
                Option<DateTime<Utc>>,
                Option<String>,
                Option<String>,
            ),
        >(
            r#"
            SELECT idempotency_key, status, expiry_timestamp, in_progress_expiry_timestamp, response_data, payload_hash
            FROM idempotency_records
            WHERE idempotency_key = $1 AND expiry_timestamp > $2
            "#,
        )
        .bind(idempotency_key)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;

        match row {
            Some(row) => Self::row_to_record(row),
            None => Err(StoreError::NotFound {
                key: idempotency_key.to_string(),
            }),
        }
    }

    async fn update_record(&self, record: &DataRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_records
                (idempotency_key, status, expiry_timestamp, in_progress_expiry_timestamp, response_data, payload_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (idempotency_key) DO UPDATE
            SET status = EXCLUDED.status,
                expiry_timestamp = EXCLUDED.expiry_timestamp,
                in_progress_expiry_timestamp = EXCLUDED.in_progress_expiry_timestamp,
                response_data = EXCLUDED.response_data,
                payload_hash = EXCLUDED.payload_hash
            "#,
        )
        .bind(&record.idempotency_key)
        .bind(record.status.as_str())
        .bind(record.expiry_timestamp)
        .bind(record.in_progress_expiry_timestamp)
        .bind(&record.response_data)
        .bind(&record.payload_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;
        Ok(())
    }

    async fn delete_record(&self, idempotency_key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM idempotency_records WHERE idempotency_key = $1")
            .bind(idempotency_key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;
        Ok(())
    }
}
