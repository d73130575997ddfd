pub mod memory;
pub mod postgres;
pub mod record;
pub mod redis;
pub mod store;

pub use self::memory::InMemoryStore;
pub use self::postgres::PostgresStore;
pub use self::record::{DataRecord, RecordStatus};
pub use self::redis::RedisStore;
pub use self::store::RecordStore;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Contract every backing store must satisfy. The engine depends on exactly
/// these four operations and stays agnostic of the concrete backend.
///
/// `put_record` is the single mutual-exclusion primitive of the whole
/// protocol: it must be a true conditional write (not read-then-write) that
/// fails with [`StoreError::AlreadyExists`] when a live record holds the key.
/// A record is live while it is not expired and not an in-progress claim
/// whose in-progress expiry has elapsed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Conditionally creates the record, atomically reclaiming expired
    /// records and stale claims.
    async fn put_record(&self, record: &DataRecord, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Fetches the record, failing with [`StoreError::NotFound`] when it is
    /// absent or logically expired.
    async fn get_record(&self, idempotency_key: &str) -> Result<DataRecord, StoreError>;

    /// Unconditional overwrite, used for the in-progress to completed
    /// transition.
    async fn update_record(&self, record: &DataRecord) -> Result<(), StoreError>;

    /// Removes the record; a no-op when it is already absent.
    async fn delete_record(&self, idempotency_key: &str) -> Result<(), StoreError>;
}
