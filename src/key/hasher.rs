use serde_json::Value;
use sha2::{Digest, Sha256};

/// Produces the final idempotency key: a scope-qualified SHA-256 digest of
/// the selected key material. SHA-256 is stable across processes, which is
/// required since the key is the sole coordination identity.
#[derive(Debug, Clone)]
pub struct KeyHasher {
    scope: String,
}

impl KeyHasher {
    /// `scope` is the logical operation name; the same payload under two
    /// different scopes yields two different keys.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Hashes selected key material into a scoped idempotency key.
    pub fn hash_material(&self, material: &Value) -> String {
        format!("{}#{}", self.scope, Self::digest(material))
    }

    /// Hashes an explicit caller-chosen key through the same pipeline, so
    /// explicit and derived keys share one namespace per scope.
    pub fn hash_client_key(&self, client_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(client_key.as_bytes());
        format!("{}#{}", self.scope, hex::encode(hasher.finalize()))
    }

    /// Unscoped digest of payload material, stored for payload validation.
    pub fn payload_digest(material: &Value) -> String {
        Self::digest(material)
    }

    // Scalars hash their plain representation (strings without quotes) so a
    // selected `"order-42"` digests the same as an explicit `order-42`;
    // containers hash their compact JSON text.
    fn digest(value: &Value) -> String {
        let canonical = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}
