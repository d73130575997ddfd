mod common;

use chrono::{Duration as ChronoDuration, Utc};
use idempotency_engine::{DataRecord, InMemoryStore, PersistenceStore, StoreError};
use uuid::Uuid;

fn unique_key() -> String {
    format!("store-tests#{}", Uuid::new_v4())
}

fn claim(key: &str, claim_window_secs: i64) -> DataRecord {
    let now = Utc::now();
    DataRecord::in_progress(
        key.to_string(),
        now + ChronoDuration::seconds(3600),
        Some(now + ChronoDuration::seconds(claim_window_secs)),
        None,
    )
}

#[tokio::test]
async fn conditional_create_rejects_a_live_record() {
    common::init_tracing();
    let store = InMemoryStore::new();
    let key = unique_key();
    let now = Utc::now();

    store.put_record(&claim(&key, 30), now).await.expect("first claim");
    let err = store.put_record(&claim(&key, 30), now).await.unwrap_err();

    assert!(matches!(err, StoreError::AlreadyExists { key: rejected } if rejected == key));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn conditional_create_reclaims_a_stale_claim() {
    let store = InMemoryStore::new();
    let key = unique_key();
    let now = Utc::now();

    // A claim whose window already elapsed does not block a new claimant.
    let stale = DataRecord::in_progress(
        key.clone(),
        now + ChronoDuration::seconds(3600),
        Some(now - ChronoDuration::seconds(5)),
        None,
    );
    store.put_record(&stale, now - ChronoDuration::seconds(60)).await.expect("seed");

    store.put_record(&claim(&key, 30), now).await.expect("reclaim");
    let stored = store.peek(&key).expect("record");
    assert!(stored.in_progress_expiry_timestamp.expect("window") > now);
}

#[tokio::test]
async fn conditional_create_overwrites_an_expired_record() {
    let store = InMemoryStore::new();
    let key = unique_key();
    let now = Utc::now();

    let expired = DataRecord::completed(
        key.clone(),
        now - ChronoDuration::seconds(5),
        "\"old\"".to_string(),
        None,
    );
    store.put_record(&expired, now - ChronoDuration::seconds(60)).await.expect("seed");

    store.put_record(&claim(&key, 30), now).await.expect("re-claim after expiry");
    assert_eq!(store.peek(&key).expect("record").response_data, None);
}

#[tokio::test]
async fn get_reports_absent_and_expired_records_as_not_found() {
    let store = InMemoryStore::new();
    let key = unique_key();

    let err = store.get_record(&key).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    let now = Utc::now();
    let expired = DataRecord::completed(
        key.clone(),
        now - ChronoDuration::seconds(5),
        "\"old\"".to_string(),
        None,
    );
    store.put_record(&expired, now - ChronoDuration::seconds(60)).await.expect("seed");

    let err = store.get_record(&key).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn update_transitions_a_claim_to_completed() {
    let store = InMemoryStore::new();
    let key = unique_key();
    let now = Utc::now();

    store.put_record(&claim(&key, 30), now).await.expect("claim");

    let completed = DataRecord::completed(
        key.clone(),
        now + ChronoDuration::seconds(3600),
        "{\"total\":9.99}".to_string(),
        None,
    );
    store.update_record(&completed).await.expect("commit");

    let stored = store.get_record(&key).await.expect("record");
    assert_eq!(stored.response_data.as_deref(), Some("{\"total\":9.99}"));
    assert!(stored.in_progress_expiry_timestamp.is_none());
}

#[tokio::test]
async fn delete_is_idempotent() {
    let store = InMemoryStore::new();
    let key = unique_key();
    let now = Utc::now();

    store.put_record(&claim(&key, 30), now).await.expect("claim");
    store.delete_record(&key).await.expect("first delete");
    store.delete_record(&key).await.expect("second delete");

    assert!(store.is_empty());
    let err = store.get_record(&key).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}
