//! Idempotency engine for short-lived, stateless executors.
//!
//! Wraps a request/event handler so that, per idempotency key, its side
//! effects happen at most once and every repeated invocation observes the
//! same stored result. Coordination rests on a single primitive: a
//! conditional create against a pluggable persistence store.
//!
//! ```no_run
//! use idempotency_engine::{Idempotency, IdempotencyConfig, InMemoryStore};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[derive(Debug, thiserror::Error)]
//! # #[error("payment failed")]
//! # struct PaymentError;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IdempotencyConfig::new()
//!     .with_key_path("body.orderId")
//!     .with_local_cache(256);
//! let engine = Idempotency::new("process-order", Arc::new(InMemoryStore::new()), config)?;
//!
//! let payload = json!({"body": {"orderId": "order-42"}});
//! let total: f64 = engine
//!     .execute(&payload, || async { Ok::<_, PaymentError>(9.99) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod persistence;

pub use cache::{CacheStats, LocalCache};
pub use config::{IdempotencyConfig, IdempotencySettings, MissingKeyPolicy};
pub use engine::Idempotency;
pub use error::{IdempotencyError, InvocationError, StoreError};
pub use key::{KeyHasher, KeySelector};
pub use persistence::{
    DataRecord, InMemoryStore, PersistenceStore, PostgresStore, RecordStatus, RecordStore,
    RedisStore,
};
