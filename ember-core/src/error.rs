//! Error types for EMBER operations

use std::time::Duration;
use thiserror::Error;

/// Store-protocol-level errors reported by a backend.
///
/// These are the raw failures a `StoreBackend` implementation can surface.
/// The repository layer wraps them with the operation name and key before
/// they reach callers (see [`EmberError`]).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached, or did not answer in time.
    /// Transient by definition: the repository retries these.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// A value of an incompatible shape was found where another was required
    /// (e.g. incrementing a non-integer field, hash ops on a plain string).
    #[error("wrong type for key '{key}' field '{field}': expected {expected}")]
    WrongType {
        key: String,
        field: String,
        expected: &'static str,
    },

    /// The expiry-notification subscription was severed.
    #[error("expiry subscription lost: {reason}")]
    SubscriptionLost { reason: String },

    /// Backend-specific failure that fits no other variant.
    #[error("store error: {reason}")]
    Backend { reason: String },
}

/// Errors raised while encoding or decoding stored representations.
///
/// Decoding never silently coerces: a representation that does not match the
/// supplied type hint is an error naming the field and the expected type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("field '{field}': expected {expected}, found representation '{repr}'")]
    HintMismatch {
        field: String,
        expected: &'static str,
        repr: String,
    },

    #[error("unsupported value shape for encoding: {reason}")]
    UnsupportedShape { reason: String },

    #[error("record {type_name} could not be rebuilt: {reason}")]
    Record {
        type_name: &'static str,
        reason: String,
    },
}

/// Configuration errors.
///
/// These are fatal at startup or at the call site and are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Lookup of a pool alias that was never registered. Deliberately loud:
    /// silently falling back to the default pool would mask data-partition
    /// misrouting.
    #[error("unregistered pool alias '{alias}'")]
    UnknownPoolAlias { alias: String },

    /// A second handler was registered for an action name.
    #[error("duplicate handler registered for action '{action}'")]
    DuplicateHandler { action: String },

    /// A key component contains the reserved separator character.
    #[error("key component {component} '{value}' contains the reserved separator ':'")]
    ReservedSeparator {
        component: &'static str,
        value: String,
    },

    /// A component or setting has an otherwise invalid value.
    #[error("invalid {what}: {reason}")]
    InvalidValue {
        what: &'static str,
        reason: String,
    },
}

/// Error returned by an expiry handler.
///
/// Handler failures are caught and logged by the listener; they never
/// propagate out of the dispatch loop.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {reason}")]
    Failed { reason: String },

    #[error(transparent)]
    Cache(#[from] EmberError),
}

impl HandlerError {
    /// Convenience constructor for ad-hoc failure messages.
    pub fn msg(reason: impl Into<String>) -> Self {
        HandlerError::Failed {
            reason: reason.into(),
        }
    }
}

/// Master error type for all EMBER operations.
#[derive(Debug, Clone, Error)]
pub enum EmberError {
    /// Connectivity or timeout failure that survived the bounded retry.
    /// Surfaced to the caller so it can decide fallback behavior.
    #[error("store unavailable during {op} on '{key}' after {attempts} attempts: {reason}")]
    StoreUnavailable {
        op: &'static str,
        key: String,
        attempts: u32,
        reason: String,
    },

    /// Any other store-protocol error, wrapped with the operation and key
    /// for diagnosis.
    #[error("store error during {op} on '{key}': {source}")]
    Store {
        op: &'static str,
        key: String,
        source: StoreError,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for EMBER operations.
pub type EmberResult<T> = Result<T, EmberError>;

/// Retry timing used when wrapping transient store failures.
///
/// Delays follow `initial_backoff * multiplier^(attempt - 1)`, capped at
/// `max_backoff`. `op_timeout` bounds each individual store round-trip so a
/// hung connection surfaces as unavailability instead of hanging the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub op_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            op_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (1-based). Attempt 0 is the
    /// initial call and has no delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_backoff.min(self.max_backoff);
        }
        let factor = self.backoff_multiplier.powi(attempt as i32 - 1);
        let delay = self.initial_backoff.mul_f64(factor);
        delay.min(self.max_backoff)
    }

    /// Short delays for tests and local development.
    pub fn development() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            op_timeout: Duration::from_millis(500),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
