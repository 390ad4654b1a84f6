//! EMBER Core - Data Types
//!
//! Pure data types shared by every EMBER crate: the value model, type hints,
//! key construction, configuration, and the error taxonomy. No I/O lives
//! here; storage behavior is in `ember-store` and the expiry-notification
//! side in `ember-events`.

pub mod config;
pub mod error;
pub mod key;
pub mod value;

pub use config::{
    EndpointConfig, PoolSettings, POOL_STATE, POOL_TABLES, POOL_TRIGGERS, POOL_USERS,
};
pub use error::{
    ConfigError, EmberError, EmberResult, HandlerError, RetryPolicy, SerializationError,
    StoreError,
};
pub use key::{check_component, KeyFactory, TriggerKey, DEFAULT_NAMESPACE, KEY_SEPARATOR};
pub use value::{CacheRecord, FieldHints, Record, Timestamp, TypeHint, Value};
