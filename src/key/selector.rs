use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Selects the sub-portion of an inbound payload used as idempotency key
/// material. Path evaluation beyond JSON pointers is supplied by the caller
/// through [`KeySelector::Custom`] rather than reimplemented here.
#[derive(Clone)]
pub enum KeySelector {
    /// Hash the entire payload.
    WholePayload,
    /// Resolve a JSON pointer (e.g. `/body/orderId`) against the payload.
    Pointer(String),
    /// Caller-supplied evaluator, e.g. a JMESPath-style query engine.
    Custom(Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>),
}

impl KeySelector {
    /// Builds a pointer selector, accepting either `/a/b` or dotted `a.b`
    /// notation for convenience. The dotted form treats every `.` as a path
    /// separator, so a field whose name contains a literal dot must be
    /// addressed with the raw JSON pointer form (e.g. `/a.b`).
    pub fn pointer(path: impl Into<String>) -> Self {
        let path = path.into();
        if path.starts_with('/') {
            KeySelector::Pointer(path)
        } else {
            KeySelector::Pointer(format!("/{}", path.replace('.', "/")))
        }
    }

    pub fn custom<F>(evaluator: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        KeySelector::Custom(Arc::new(evaluator))
    }

    /// Resolves the selector against the payload. `None` means the configured
    /// path matched nothing.
    pub fn select(&self, payload: &Value) -> Option<Value> {
        match self {
            KeySelector::WholePayload => Some(payload.clone()),
            KeySelector::Pointer(path) => payload.pointer(path).cloned(),
            KeySelector::Custom(evaluator) => evaluator(payload),
        }
    }

    /// A resolved value still counts as missing when it carries no usable
    /// material: JSON null, or a container whose elements are all null.
    pub fn is_missing(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Array(items) => items.iter().all(Value::is_null),
            Value::Object(fields) => fields.values().all(Value::is_null),
            _ => false,
        }
    }
}

impl fmt::Debug for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySelector::WholePayload => write!(f, "KeySelector::WholePayload"),
            KeySelector::Pointer(path) => write!(f, "KeySelector::Pointer({path:?})"),
            KeySelector::Custom(_) => write!(f, "KeySelector::Custom(..)"),
        }
    }
}
