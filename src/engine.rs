use crate::config::IdempotencyConfig;
use crate::error::{IdempotencyError, InvocationError, StoreError};
use crate::persistence::{PersistenceStore, RecordStatus, RecordStore};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of the claim phase: either this caller owns the key and must run
/// the operation, or a completed record already holds the response.
enum Claim {
    Acquired,
    Replayed(String),
}

/// The idempotency orchestrator. Wraps a single call to a protected
/// operation with the claim/execute/commit protocol, so the operation's side
/// effects happen at most once per idempotency key and repeated invocations
/// observe the same result.
///
/// The engine runs synchronously within whatever concurrency the caller
/// provides; the conditional create on the persistence store is its only
/// mutual-exclusion primitive, and on conflict it fails fast rather than
/// polling for the winner to finish.
pub struct Idempotency {
    records: RecordStore,
    claim_retries: u32,
}

impl Idempotency {
    /// `scope` names the protected operation; the same payload under two
    /// scopes yields two independent idempotency keys.
    pub fn new(
        scope: impl Into<String>,
        backend: Arc<dyn PersistenceStore>,
        config: IdempotencyConfig,
    ) -> Result<Self, IdempotencyError> {
        config.validate()?;
        let claim_retries = config.claim_retries;
        Ok(Self {
            records: RecordStore::new(backend, scope, config),
            claim_retries,
        })
    }

    pub fn record_store(&self) -> &RecordStore {
        &self.records
    }

    /// Runs `operation` idempotently, deriving the key from the payload via
    /// the configured selector.
    pub async fn execute<R, E, F, Fut>(
        &self,
        payload: &Value,
        operation: F,
    ) -> Result<R, InvocationError<E>>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.run(None, payload, None, operation).await
    }

    /// Like [`execute`](Self::execute), additionally bounding the claim
    /// window by the invocation's remaining execution budget so a claim
    /// cannot outlive the process that might still complete it.
    pub async fn execute_with_budget<R, E, F, Fut>(
        &self,
        payload: &Value,
        remaining_budget: Option<Duration>,
        operation: F,
    ) -> Result<R, InvocationError<E>>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.run(None, payload, remaining_budget, operation).await
    }

    /// Runs `operation` under an explicit caller-chosen key instead of
    /// deriving one from the payload.
    pub async fn execute_keyed<R, E, F, Fut>(
        &self,
        client_key: &str,
        payload: &Value,
        operation: F,
    ) -> Result<R, InvocationError<E>>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.run(Some(client_key), payload, None, operation).await
    }

    async fn run<R, E, F, Fut>(
        &self,
        explicit_key: Option<&str>,
        payload: &Value,
        remaining_budget: Option<Duration>,
        operation: F,
    ) -> Result<R, InvocationError<E>>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let key = match explicit_key {
            Some(client_key) => self.records.client_key(client_key),
            None => self.records.derive_key(payload)?,
        };
        let payload_hash = self.records.payload_hash(payload);

        match self
            .acquire(&key, payload_hash.clone(), remaining_budget)
            .await?
        {
            Claim::Replayed(response_data) => {
                tracing::debug!(
                    idempotency_key = %key,
                    "stored response found, skipping the operation"
                );
                let response = serde_json::from_str(&response_data)
                    .map_err(IdempotencyError::from)?;
                Ok(response)
            }
            Claim::Acquired => match operation().await {
                Ok(response) => {
                    let response_data =
                        serde_json::to_string(&response).map_err(IdempotencyError::from)?;
                    self.records
                        .save_success(&key, payload_hash, response_data, Utc::now())
                        .await
                        .map_err(IdempotencyError::from)?;
                    Ok(response)
                }
                Err(operation_error) => {
                    // The claim must not survive a failed execution, but a
                    // release failure must never mask the operation's own
                    // error; the stale claim would expire on its own anyway.
                    if let Err(release_error) = self.records.release(&key).await {
                        tracing::error!(
                            idempotency_key = %key,
                            error = %release_error,
                            "failed to release claim after operation failure"
                        );
                    }
                    Err(InvocationError::Operation(operation_error))
                }
            },
        }
    }

    /// Claim-first protocol: attempt the conditional create as the fast path
    /// for the common no-existing-record case, and only fetch the record on
    /// conflict. Inconsistent reads, which can happen when the record
    /// changes between the create attempt and the fetch, are retried a
    /// bounded number of times.
    async fn acquire(
        &self,
        key: &str,
        payload_hash: Option<String>,
        remaining_budget: Option<Duration>,
    ) -> Result<Claim, IdempotencyError> {
        let mut attempt = 0u32;
        loop {
            let now = Utc::now();
            match self
                .records
                .save_in_progress(key, payload_hash.clone(), now, remaining_budget)
                .await
            {
                Ok(()) => return Ok(Claim::Acquired),
                Err(StoreError::AlreadyExists { .. }) => {
                    match self.evaluate_existing(key, payload_hash.as_deref(), now).await {
                        Ok(claim) => return Ok(claim),
                        Err(err @ IdempotencyError::InconsistentState { .. }) => {
                            if attempt >= self.claim_retries {
                                return Err(err);
                            }
                            attempt += 1;
                            tracing::debug!(
                                idempotency_key = %key,
                                attempt,
                                "inconsistent record state, re-running the claim cycle"
                            );
                        }
                        Err(err) => return Err(err),
                    }
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    async fn evaluate_existing(
        &self,
        key: &str,
        expected_payload_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Claim, IdempotencyError> {
        let record = match self.records.fetch(key, now).await {
            Ok(record) => record,
            Err(StoreError::NotFound { .. }) => {
                return Err(IdempotencyError::InconsistentState {
                    reason: "record disappeared between claim and lookup",
                })
            }
            Err(other) => return Err(other.into()),
        };

        if let Some(expected) = expected_payload_hash {
            if record.payload_hash.as_deref() != Some(expected) {
                return Err(IdempotencyError::ValidationMismatch {
                    key: key.to_string(),
                });
            }
        }

        match record.effective_status(now) {
            RecordStatus::Expired => Err(IdempotencyError::InconsistentState {
                reason: "record expired between claim and lookup",
            }),
            RecordStatus::InProgress => {
                if record.is_stale_claim(now) {
                    Err(IdempotencyError::InconsistentState {
                        reason: "in-progress claim already timed out",
                    })
                } else {
                    Err(IdempotencyError::AlreadyInProgress {
                        key: key.to_string(),
                    })
                }
            }
            RecordStatus::Completed => match record.response_data {
                Some(response_data) => Ok(Claim::Replayed(response_data)),
                None => Err(IdempotencyError::PersistenceLayer(anyhow::anyhow!(
                    "completed record has no response data"
                ))),
            },
        }
    }
}
