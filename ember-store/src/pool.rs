//! Pool registry: logical alias → store backend.
//!
//! Pools isolate one subsystem's keys from another's. The registry owns the
//! alias mapping supplied at startup, creates backends lazily on first use,
//! and caches them for its lifetime. Looking up an alias that was never
//! registered is a configuration error, never a silent fallback to the
//! default pool — a fallback would mask data-partition misrouting.

use std::sync::Arc;

use dashmap::DashMap;

use ember_core::{ConfigError, EmberResult, EndpointConfig, PoolSettings};

use crate::backend::StoreBackend;
use crate::memory::MemoryHub;

pub struct PoolRegistry {
    pools: DashMap<String, EndpointConfig>,
    backends: DashMap<String, Arc<dyn StoreBackend>>,
    hubs: DashMap<String, Arc<MemoryHub>>,
    default_alias: String,
}

impl PoolRegistry {
    /// Build a registry from validated settings.
    pub fn from_settings(settings: PoolSettings) -> EmberResult<Arc<Self>> {
        settings.validate()?;
        let registry = Self {
            pools: DashMap::new(),
            backends: DashMap::new(),
            hubs: DashMap::new(),
            default_alias: settings.default_alias().to_string(),
        };
        for (alias, config) in settings.iter() {
            registry.pools.insert(alias.clone(), config.clone());
        }
        Ok(Arc::new(registry))
    }

    /// The four standard pools on one in-memory endpoint. Handy for tests
    /// and local development.
    pub fn in_memory() -> Arc<Self> {
        let settings = PoolSettings::single_endpoint("memory");
        let registry = Self {
            pools: DashMap::new(),
            backends: DashMap::new(),
            hubs: DashMap::new(),
            default_alias: settings.default_alias().to_string(),
        };
        for (alias, config) in settings.iter() {
            registry.pools.insert(alias.clone(), config.clone());
        }
        Arc::new(registry)
    }

    /// Register an additional alias after construction.
    pub fn register(&self, alias: impl Into<String>, config: EndpointConfig) {
        let alias = alias.into();
        tracing::info!(alias = %alias, endpoint = %config.endpoint, partition = config.partition, "pool registered");
        self.pools.insert(alias, config);
    }

    /// Bind an alias directly to a pre-built backend. This is the seam an
    /// external store adapter plugs into.
    pub fn register_backend(&self, alias: impl Into<String>, backend: Arc<dyn StoreBackend>) {
        let alias = alias.into();
        tracing::info!(alias = %alias, "external backend registered");
        self.backends.insert(alias, backend);
    }

    /// Whether an alias is known to this registry.
    pub fn contains(&self, alias: &str) -> bool {
        self.backends.contains_key(alias) || self.pools.contains_key(alias)
    }

    /// Resolve an alias to its backend, creating it on first use.
    pub fn get(&self, alias: &str) -> EmberResult<Arc<dyn StoreBackend>> {
        if let Some(backend) = self.backends.get(alias) {
            return Ok(Arc::clone(backend.value()));
        }
        let config = match self.pools.get(alias) {
            Some(config) => config.value().clone(),
            None => {
                return Err(ConfigError::UnknownPoolAlias {
                    alias: alias.to_string(),
                }
                .into());
            }
        };
        let hub = Arc::clone(
            self.hubs
                .entry(config.endpoint.clone())
                .or_insert_with(|| MemoryHub::new(config.endpoint.clone()))
                .value(),
        );
        let backend: Arc<dyn StoreBackend> = hub.partition(config.partition);
        self.backends
            .insert(alias.to_string(), Arc::clone(&backend));
        tracing::debug!(alias = %alias, endpoint = %config.endpoint, partition = config.partition, "pool connected");
        Ok(backend)
    }

    /// The backend behind the default alias.
    pub fn get_default(&self) -> EmberResult<Arc<dyn StoreBackend>> {
        self.get(&self.default_alias)
    }

    pub fn default_alias(&self) -> &str {
        &self.default_alias
    }

    /// All registered aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .pools
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.backends.iter().map(|entry| entry.key().clone()))
            .collect();
        aliases.sort();
        aliases.dedup();
        aliases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{POOL_STATE, POOL_TRIGGERS, POOL_USERS};

    #[tokio::test]
    async fn test_unknown_alias_is_config_error() {
        let pools = PoolRegistry::in_memory();
        let err = pools.get("sessions").expect_err("must fail");
        assert!(matches!(
            err,
            ember_core::EmberError::Config(ConfigError::UnknownPoolAlias { .. })
        ));
    }

    #[tokio::test]
    async fn test_backends_are_cached_per_alias() {
        let pools = PoolRegistry::in_memory();
        let a = pools.get(POOL_USERS).expect("resolves");
        let b = pools.get(POOL_USERS).expect("resolves");
        assert!(Arc::ptr_eq(&a, &b), "repeat lookups reuse the connection");
    }

    #[tokio::test]
    async fn test_aliases_on_one_endpoint_are_isolated() {
        let pools = PoolRegistry::in_memory();
        let users = pools.get(POOL_USERS).expect("resolves");
        let state = pools.get(POOL_STATE).expect("resolves");

        users.set("k", "from-users", None).await.expect("set succeeds");
        assert_eq!(state.get("k").await.expect("get succeeds"), None);
    }

    #[tokio::test]
    async fn test_same_endpoint_same_partition_share_data() {
        let pools = PoolRegistry::in_memory();
        pools.register(
            "triggers-alt",
            EndpointConfig::new("memory", 3),
        );
        let a = pools.get(POOL_TRIGGERS).expect("resolves");
        let b = pools.get("triggers-alt").expect("resolves");

        a.set("k", "shared", None).await.expect("set succeeds");
        assert_eq!(
            b.get("k").await.expect("get succeeds"),
            Some("shared".to_string())
        );
    }

    #[tokio::test]
    async fn test_distinct_endpoints_share_nothing() {
        let pools = PoolRegistry::from_settings(
            PoolSettings::empty()
                .with_pool(POOL_USERS, EndpointConfig::new("cache-a", 0))
                .with_pool(POOL_STATE, EndpointConfig::new("cache-b", 0)),
        )
        .expect("valid settings");

        let a = pools.get(POOL_USERS).expect("resolves");
        let b = pools.get(POOL_STATE).expect("resolves");
        a.set("k", "v", None).await.expect("set succeeds");
        assert_eq!(b.get("k").await.expect("get succeeds"), None);
    }

    #[tokio::test]
    async fn test_register_backend_takes_precedence() {
        let pools = PoolRegistry::in_memory();
        let external = MemoryHub::new("external").partition(9);
        external.set("k", "external", None).await.expect("set succeeds");
        pools.register_backend(POOL_USERS, external);

        let resolved = pools.get(POOL_USERS).expect("resolves");
        assert_eq!(
            resolved.get("k").await.expect("get succeeds"),
            Some("external".to_string())
        );
    }

    #[test]
    fn test_default_alias() {
        let pools = PoolRegistry::in_memory();
        assert_eq!(pools.default_alias(), POOL_STATE);
        assert!(pools.contains(POOL_STATE));
        assert!(!pools.contains("absent"));
    }
}
