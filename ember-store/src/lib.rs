//! EMBER Store - Storage Layer
//!
//! Turns a TTL-capable key-value store into tenant-scoped structured caching
//! and deferred-action triggers:
//!
//! - [`StoreBackend`]: the async trait a concrete store implements. The
//!   bundled [`memory`] backend is a real TTL store with expired-key
//!   notifications; an adapter for an external store (e.g. Redis) implements
//!   the same trait in its own crate and registers with the pool registry.
//! - [`PoolRegistry`]: logical pool alias → backend, lazily connected,
//!   fail-fast on unknown aliases.
//! - [`codec`]: type-preserving encode/decode between structured values and
//!   store-native string representations.
//! - [`Repository`]: the generic tenant-cache contract; [`StateCache`],
//!   [`UserCache`], and [`TableCache`] are its concrete domains.
//! - [`TriggerStore`]: TTL-armed markers whose expiration drives the
//!   listener in `ember-events`.

pub mod backend;
pub mod codec;
pub mod memory;
pub mod pool;
pub mod repository;
mod retry;
pub mod trigger;

pub use backend::{ExpirySubscription, KeyTtl, RawRecord, StoreBackend, StoreResult, SubscriptionError};
pub use memory::{MemoryHub, MemoryPartition};
pub use pool::PoolRegistry;
pub use repository::{
    CacheDomain, Repository, StateCache, StateDomain, TableCache, TableDomain, UserCache,
    UserDomain,
};
pub use trigger::TriggerStore;
