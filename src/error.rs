use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdempotencyError>;

/// Errors raised by the idempotency engine itself.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// Key selection produced no material and the configured policy forbids
    /// falling back to the full payload.
    #[error("no data found to create an idempotency key")]
    MissingIdempotencyKey,

    /// Another live claim holds the key. The caller decides whether and when
    /// to retry; the engine never polls.
    #[error("execution already in progress for idempotency key: {key}")]
    AlreadyInProgress { key: String },

    /// The same key was reused with a different payload. Always fatal.
    #[error("payload does not match stored record for idempotency key: {key}")]
    ValidationMismatch { key: String },

    /// Claim and lookup disagreed about the record, which can happen in the
    /// small window where another caller completes, expires or deletes it.
    /// The engine retries this a bounded number of times before surfacing it.
    #[error("claim and lookup returned inconsistent results: {reason}")]
    InconsistentState { reason: &'static str },

    #[error("idempotency store operation failed")]
    PersistenceLayer(#[source] anyhow::Error),

    #[error("failed to serialize or deserialize idempotency data")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid idempotency configuration: {0}")]
    Config(String),
}

/// Contract-level errors for [`PersistenceStore`](crate::persistence::PersistenceStore)
/// implementations. `AlreadyExists` and `NotFound` are protocol signals that
/// never escape the engine; only backend failures surface to callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a live record already exists for idempotency key: {key}")]
    AlreadyExists { key: String },

    #[error("no record found for idempotency key: {key}")]
    NotFound { key: String },

    #[error("store backend failure")]
    Backend(#[source] anyhow::Error),
}

impl From<StoreError> for IdempotencyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Backend(inner) => IdempotencyError::PersistenceLayer(inner),
            other => IdempotencyError::PersistenceLayer(anyhow::Error::new(other)),
        }
    }
}

/// Outcome of a protected invocation, keeping the operation's own error type
/// intact so idempotency bookkeeping never masks it.
#[derive(Debug, Error)]
pub enum InvocationError<E> {
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    #[error(transparent)]
    Operation(E),
}

impl<E> InvocationError<E> {
    /// Returns the protected operation's error, if that is what failed.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            InvocationError::Operation(err) => Some(err),
            InvocationError::Idempotency(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_backend_error_maps_to_persistence_layer() {
        let err: IdempotencyError = StoreError::Backend(anyhow::anyhow!("boom")).into();
        assert!(matches!(err, IdempotencyError::PersistenceLayer(_)));
    }

    #[test]
    fn invocation_error_unwraps_operation_error() {
        let err: InvocationError<std::io::Error> = InvocationError::Operation(
            std::io::Error::new(std::io::ErrorKind::Other, "handler failed"),
        );
        assert!(err.into_operation_error().is_some());
    }
}
