use crate::error::IdempotencyError;
use crate::key::KeySelector;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_EXPIRATION: Duration = Duration::from_secs(60 * 60);
const DEFAULT_CACHE_CAPACITY: usize = 256;
const DEFAULT_CLAIM_RETRIES: u32 = 2;

/// What to do when key selection resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingKeyPolicy {
    /// Abort the invocation with `MissingIdempotencyKey`.
    Fail,
    /// Fall back to hashing the entire payload (logged as a warning).
    HashWholePayload,
}

/// Static, validated settings for the idempotency engine. Constructed
/// explicitly and passed in; there is no ambient global configuration.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Where the idempotency key material comes from.
    pub key_selector: KeySelector,
    /// When set, a digest of the selected portion is stored alongside the
    /// record and every later hit must match it.
    pub validation_selector: Option<KeySelector>,
    pub missing_key_policy: MissingKeyPolicy,
    /// How long a completed record keeps being honored.
    pub expiration: Duration,
    /// Upper bound on how long a claim may sit in progress when the caller
    /// supplies no remaining-time budget. Unset means the claim holds until
    /// the record itself expires.
    pub in_progress_ttl: Option<Duration>,
    pub use_local_cache: bool,
    pub local_cache_capacity: usize,
    /// How many times a losing claimant re-runs the lookup/claim cycle on an
    /// inconsistent read before giving up.
    pub claim_retries: u32,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            key_selector: KeySelector::WholePayload,
            validation_selector: None,
            missing_key_policy: MissingKeyPolicy::HashWholePayload,
            expiration: DEFAULT_EXPIRATION,
            in_progress_ttl: None,
            use_local_cache: false,
            local_cache_capacity: DEFAULT_CACHE_CAPACITY,
            claim_retries: DEFAULT_CLAIM_RETRIES,
        }
    }
}

impl IdempotencyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_selector(mut self, selector: KeySelector) -> Self {
        self.key_selector = selector;
        self
    }

    /// Shorthand for selecting key material at a JSON pointer path.
    pub fn with_key_path(mut self, path: impl Into<String>) -> Self {
        self.key_selector = KeySelector::pointer(path);
        self
    }

    pub fn with_payload_validation(mut self, selector: KeySelector) -> Self {
        self.validation_selector = Some(selector);
        self
    }

    pub fn with_missing_key_policy(mut self, policy: MissingKeyPolicy) -> Self {
        self.missing_key_policy = policy;
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_in_progress_ttl(mut self, ttl: Duration) -> Self {
        self.in_progress_ttl = Some(ttl);
        self
    }

    pub fn with_local_cache(mut self, capacity: usize) -> Self {
        self.use_local_cache = true;
        self.local_cache_capacity = capacity;
        self
    }

    pub fn with_claim_retries(mut self, retries: u32) -> Self {
        self.claim_retries = retries;
        self
    }

    pub fn validate(&self) -> Result<(), IdempotencyError> {
        if self.expiration.is_zero() {
            return Err(IdempotencyError::Config(
                "expiration must be greater than zero".to_string(),
            ));
        }
        if let Some(ttl) = self.in_progress_ttl {
            if ttl > self.expiration {
                return Err(IdempotencyError::Config(
                    "in_progress_ttl must not exceed expiration".to_string(),
                ));
            }
        }
        if self.use_local_cache && self.local_cache_capacity == 0 {
            return Err(IdempotencyError::Config(
                "local_cache_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// File/environment-backed settings, for callers that load configuration
/// rather than building it in code. Environment variables use the
/// `IDEMPOTENCY__` prefix, e.g. `IDEMPOTENCY__EXPIRATION_SECONDS=120`.
#[derive(Debug, Deserialize)]
pub struct IdempotencySettings {
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub validation_path: Option<String>,
    #[serde(default = "default_expiration_seconds")]
    pub expiration_seconds: u64,
    #[serde(default)]
    pub in_progress_ttl_millis: Option<u64>,
    #[serde(default)]
    pub use_local_cache: bool,
    #[serde(default = "default_cache_capacity")]
    pub local_cache_capacity: usize,
    #[serde(default = "default_claim_retries")]
    pub claim_retries: u32,
    #[serde(default)]
    pub fail_on_missing_key: bool,
}

fn default_expiration_seconds() -> u64 {
    DEFAULT_EXPIRATION.as_secs()
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_claim_retries() -> u32 {
    DEFAULT_CLAIM_RETRIES
}

impl IdempotencySettings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/idempotency").required(false))
            .add_source(config::Environment::with_prefix("IDEMPOTENCY").separator("__"));

        builder.build()?.try_deserialize()
    }

    pub fn into_config(self) -> IdempotencyConfig {
        IdempotencyConfig {
            key_selector: self
                .key_path
                .map(KeySelector::pointer)
                .unwrap_or(KeySelector::WholePayload),
            validation_selector: self.validation_path.map(KeySelector::pointer),
            missing_key_policy: if self.fail_on_missing_key {
                MissingKeyPolicy::Fail
            } else {
                MissingKeyPolicy::HashWholePayload
            },
            expiration: Duration::from_secs(self.expiration_seconds),
            in_progress_ttl: self.in_progress_ttl_millis.map(Duration::from_millis),
            use_local_cache: self.use_local_cache,
            local_cache_capacity: self.local_cache_capacity,
            claim_retries: self.claim_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = IdempotencyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.expiration, Duration::from_secs(3600));
        assert_eq!(config.local_cache_capacity, 256);
        assert_eq!(config.claim_retries, 2);
        assert!(!config.use_local_cache);
    }

    #[test]
    fn zero_expiration_is_rejected() {
        let config = IdempotencyConfig::new().with_expiration(Duration::ZERO);
        assert!(matches!(config.validate(), Err(IdempotencyError::Config(_))));
    }

    #[test]
    fn in_progress_ttl_beyond_expiration_is_rejected() {
        let config = IdempotencyConfig::new()
            .with_expiration(Duration::from_secs(60))
            .with_in_progress_ttl(Duration::from_secs(120));
        assert!(matches!(config.validate(), Err(IdempotencyError::Config(_))));
    }

    #[test]
    fn zero_cache_capacity_is_rejected() {
        let config = IdempotencyConfig::new().with_local_cache(0);
        assert!(matches!(config.validate(), Err(IdempotencyError::Config(_))));
    }

    #[test]
    fn settings_map_onto_config() {
        let settings = IdempotencySettings {
            key_path: Some("body.orderId".to_string()),
            validation_path: Some("body".to_string()),
            expiration_seconds: 120,
            in_progress_ttl_millis: Some(30_000),
            use_local_cache: true,
            local_cache_capacity: 64,
            claim_retries: 1,
            fail_on_missing_key: true,
        };

        let config = settings.into_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.expiration, Duration::from_secs(120));
        assert_eq!(config.in_progress_ttl, Some(Duration::from_secs(30)));
        assert_eq!(config.missing_key_policy, MissingKeyPolicy::Fail);
        assert!(config.use_local_cache);
        assert_eq!(config.local_cache_capacity, 64);
        assert_eq!(config.claim_retries, 1);
    }
}
