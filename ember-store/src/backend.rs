//! Store backend trait.
//!
//! This module defines the seam between the repository layer and a concrete
//! TTL-capable key-value store. The bundled implementation is the in-memory
//! backend in [`crate::memory`]; an adapter for an external store implements
//! the same trait and is registered with the pool registry under an alias.
//!
//! # Semantics the repository layer relies on
//!
//! - `set` is a full replacement and clears any existing TTL when none is
//!   supplied; `hset` merges fields and leaves the TTL untouched when none
//!   is supplied.
//! - Single-field operations (`hget`, `hset` of one field, `hincrby`,
//!   `hlist_push`) are atomic per call.
//! - Expired keys behave as absent for every operation.
//! - `subscribe_expired` delivers expired key names best-effort: a slow
//!   subscriber loses notifications instead of blocking the store, and
//!   nothing is replayed after a subscription is lost.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use ember_core::StoreError;

/// Result alias for backend operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The raw shape of a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRecord {
    /// A flat string value (string-set semantics).
    Text(String),
    /// A field map (hash semantics).
    Hash(BTreeMap<String, String>),
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires.
    NoExpiry,
    /// The key expires after this duration.
    Remaining(Duration),
}

/// Why an expiry subscription stopped yielding notifications.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscriber fell behind and `missed` notifications were dropped.
    #[error("subscription lagged, {missed} notifications dropped")]
    Lagged { missed: u64 },

    /// The subscription was severed; the subscriber must resubscribe.
    #[error("subscription closed")]
    Closed,
}

/// A live subscription to a pool's expired-key notifications.
pub struct ExpirySubscription {
    rx: broadcast::Receiver<String>,
}

impl ExpirySubscription {
    pub(crate) fn new(rx: broadcast::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Wait for the next expired key.
    pub async fn recv(&mut self) -> Result<String, SubscriptionError> {
        match self.rx.recv().await {
            Ok(key) => Ok(key),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                Err(SubscriptionError::Lagged { missed })
            }
            Err(broadcast::error::RecvError::Closed) => Err(SubscriptionError::Closed),
        }
    }
}

/// Backend trait for pluggable key-value stores.
///
/// Implementations must be thread-safe; one backend instance is shared by
/// every repository bound to the same pool alias.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    // ========================================================================
    // Basic key-value operations
    // ========================================================================

    /// Set the string value of a key, replacing any existing record.
    /// A missing `ttl` makes the key persistent.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Get the string value of a key. Wrong-type error for hash records.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Type-aware read returning whatever record shape is stored.
    async fn fetch(&self, key: &str) -> StoreResult<Option<RawRecord>>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// Whether the key exists (and has not expired).
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    // ========================================================================
    // Hash operations
    // ========================================================================

    /// Merge fields into a hash record, creating it if absent. A missing
    /// `ttl` leaves any existing TTL untouched.
    async fn hset(
        &self,
        key: &str,
        fields: BTreeMap<String, String>,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// Get one hash field.
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Get all hash fields; empty map if the key is absent.
    async fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>>;

    /// Delete hash fields, returning how many existed.
    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64>;

    /// Atomically increment an integer hash field, creating it at `delta`
    /// if absent. Wrong-type error when the field holds a non-integer.
    async fn hincrby(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> StoreResult<i64>;

    /// Atomically append a JSON element to a list-shaped hash field,
    /// creating the list if absent. Returns the new length.
    async fn hlist_push(
        &self,
        key: &str,
        field: &str,
        element: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<u64>;

    // ========================================================================
    // TTL management
    // ========================================================================

    /// Arm or re-arm a key's TTL. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Report the key's remaining lifetime.
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    // ========================================================================
    // Scan and maintenance
    // ========================================================================

    /// All keys matching a glob pattern (`*` and `?` wildcards).
    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Drop every record in this partition.
    async fn flush(&self) -> StoreResult<()>;

    // ========================================================================
    // Expiry notifications
    // ========================================================================

    /// Subscribe to this partition's expired-key notification stream.
    async fn subscribe_expired(&self) -> StoreResult<ExpirySubscription>;
}

impl std::fmt::Debug for dyn StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn StoreBackend")
    }
}
