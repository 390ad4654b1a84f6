//! Configuration types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::key::check_component;

/// Standard pool alias for user records.
pub const POOL_USERS: &str = "users";
/// Standard pool alias for handler-state records.
pub const POOL_STATE: &str = "state";
/// Standard pool alias for tabular records.
pub const POOL_TABLES: &str = "tables";
/// Standard pool alias for expiry-trigger markers.
pub const POOL_TRIGGERS: &str = "triggers";

/// Where a pool's keys live: a named endpoint plus a logical partition index
/// within it.
///
/// Two aliases pointing at the same endpoint but different partitions share a
/// process/connection but see fully isolated keyspaces; aliases pointing at
/// different endpoints share nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub endpoint: String,
    pub partition: u32,
}

impl EndpointConfig {
    pub fn new(endpoint: impl Into<String>, partition: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            partition,
        }
    }
}

/// Alias-to-endpoint mapping supplied once at process startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    pools: BTreeMap<String, EndpointConfig>,
    default_alias: String,
}

impl PoolSettings {
    /// The four standard pools carved out of a single endpoint as distinct
    /// logical partitions.
    pub fn single_endpoint(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let mut pools = BTreeMap::new();
        for (index, alias) in [POOL_USERS, POOL_STATE, POOL_TABLES, POOL_TRIGGERS]
            .iter()
            .enumerate()
        {
            pools.insert(
                (*alias).to_string(),
                EndpointConfig::new(endpoint.clone(), index as u32),
            );
        }
        Self {
            pools,
            default_alias: POOL_STATE.to_string(),
        }
    }

    /// Start from an empty mapping; add pools with [`PoolSettings::with_pool`].
    pub fn empty() -> Self {
        Self {
            pools: BTreeMap::new(),
            default_alias: POOL_STATE.to_string(),
        }
    }

    pub fn with_pool(mut self, alias: impl Into<String>, config: EndpointConfig) -> Self {
        self.pools.insert(alias.into(), config);
        self
    }

    pub fn with_default_alias(mut self, alias: impl Into<String>) -> Self {
        self.default_alias = alias.into();
        self
    }

    pub fn default_alias(&self) -> &str {
        &self.default_alias
    }

    pub fn get(&self, alias: &str) -> Option<&EndpointConfig> {
        self.pools.get(alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EndpointConfig)> {
        self.pools.iter()
    }

    /// Validate alias names and the default-alias reference.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for alias in self.pools.keys() {
            check_component("alias", alias)?;
        }
        if !self.pools.contains_key(&self.default_alias) {
            return Err(ConfigError::UnknownPoolAlias {
                alias: self.default_alias.clone(),
            });
        }
        Ok(())
    }
}
