//! Expiry-trigger store.
//!
//! A trigger is a key written purely to carry a TTL: its expiration is the
//! meaningful event. The action name and identifier are encoded in the key
//! itself — the notification the store emits on expiry carries only the key
//! name, so the value is irrelevant. The stored value is a creation
//! timestamp kept only for inspection while the trigger is pending.
//!
//! Scheduling overwrites any existing marker for the same (action,
//! identifier) in a single call, so resetting a timer needs no separate
//! cancellation and leaves no window with no trigger armed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};

use ember_core::{check_component, EmberResult, RetryPolicy, TriggerKey, POOL_TRIGGERS};

use crate::backend::{KeyTtl, StoreBackend};
use crate::pool::PoolRegistry;
use crate::retry::with_retry;

/// Tenant-scoped store for deferred-action markers.
#[derive(Clone)]
pub struct TriggerStore {
    tenant: String,
    retry: RetryPolicy,
    backend: Arc<dyn StoreBackend>,
}

impl TriggerStore {
    /// Create a trigger store for a tenant on the standard trigger pool.
    pub fn new(pools: Arc<PoolRegistry>, tenant: impl Into<String>) -> EmberResult<Self> {
        Self::with_pool(pools, tenant, POOL_TRIGGERS)
    }

    /// Create a trigger store on a specific pool alias. The listener must
    /// watch the same pool for the triggers to fire.
    pub fn with_pool(
        pools: Arc<PoolRegistry>,
        tenant: impl Into<String>,
        alias: &str,
    ) -> EmberResult<Self> {
        let tenant = tenant.into();
        check_component("tenant", &tenant)?;
        let backend = pools.get(alias)?;
        Ok(Self {
            tenant,
            retry: RetryPolicy::default(),
            backend,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    fn key(&self, action: &str, identifier: &str) -> EmberResult<TriggerKey> {
        Ok(TriggerKey::new(&self.tenant, action, identifier)?)
    }

    /// Arm a trigger: after `ttl` the registered handler for `action` fires
    /// with `identifier`. An existing marker for the same (action,
    /// identifier) is overwritten, resetting the timer.
    pub async fn schedule(
        &self,
        action: &str,
        identifier: &str,
        ttl: Duration,
    ) -> EmberResult<bool> {
        let key = self.key(action, identifier)?.render();
        let value = format!(
            "trigger:{}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        with_retry(&self.retry, "schedule", &key, || {
            self.backend.set(&key, &value, Some(ttl))
        })
        .await?;
        tracing::debug!(
            action,
            identifier,
            ttl_ms = ttl.as_millis() as u64,
            "expiry trigger armed"
        );
        Ok(true)
    }

    /// Cancel a pending trigger. Returns whether a marker existed.
    pub async fn cancel(&self, action: &str, identifier: &str) -> EmberResult<bool> {
        let key = self.key(action, identifier)?.render();
        let keys = vec![key.clone()];
        let removed = with_retry(&self.retry, "cancel", &key, || self.backend.delete(&keys))
            .await?;
        if removed > 0 {
            tracing::debug!(action, identifier, "expiry trigger cancelled");
        }
        Ok(removed > 0)
    }

    /// Cancel every action scheduled for an identifier. Used for bulk
    /// cleanup such as session teardown. Returns how many were removed.
    pub async fn cancel_all(&self, identifier: &str) -> EmberResult<u64> {
        let pattern = TriggerKey::pattern_for_identifier(&self.tenant, identifier)?;
        let keys = with_retry(&self.retry, "scan", &pattern, || {
            self.backend.scan(&pattern)
        })
        .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = with_retry(&self.retry, "cancel_all", &pattern, || {
            self.backend.delete(&keys)
        })
        .await?;
        tracing::debug!(identifier, removed, "expiry triggers bulk-cancelled");
        Ok(removed)
    }

    /// Whether a trigger is still pending (has not fired or been cancelled).
    pub async fn is_scheduled(&self, action: &str, identifier: &str) -> EmberResult<bool> {
        let key = self.key(action, identifier)?.render();
        with_retry(&self.retry, "is_scheduled", &key, || {
            self.backend.exists(&key)
        })
        .await
    }

    /// Remaining time until the trigger fires.
    pub async fn remaining_ttl(&self, action: &str, identifier: &str) -> EmberResult<KeyTtl> {
        let key = self.key(action, identifier)?.render();
        with_retry(&self.retry, "remaining_ttl", &key, || self.backend.ttl(&key)).await
    }
}
