//! Expiry handler registry.
//!
//! Maps an action name to the asynchronous callback invoked when a trigger
//! for that action expires. The registry is an explicit object constructed
//! once at startup and passed by reference into the listener — not a
//! process-wide singleton. Registration takes `&mut self` and the listener
//! takes `Arc<HandlerRegistry>`, so registering after the listener has
//! started is rejected by the type system: once shared, the registry is
//! read-only.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use ember_core::{check_component, ConfigError, HandlerError, TriggerKey};

/// Callback invoked when an expiry trigger fires.
///
/// The trigger carries the tenant, action, and identifier parsed from the
/// expired key. Implementations typically read accumulated state back
/// through a repository and then clear it.
#[async_trait]
pub trait ExpiryHandler: Send + Sync {
    async fn on_expire(&self, trigger: &TriggerKey) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into an [`ExpiryHandler`].
struct FnHandler<F> {
    callback: F,
}

#[async_trait]
impl<F, Fut> ExpiryHandler for FnHandler<F>
where
    F: Fn(TriggerKey) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn on_expire(&self, trigger: &TriggerKey) -> Result<(), HandlerError> {
        (self.callback)(trigger.clone()).await
    }
}

/// Action name → handler table. At most one handler per action; a duplicate
/// registration is a startup-time configuration error, not recovered from.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ExpiryHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an action name.
    pub fn register(
        &mut self,
        action: &str,
        handler: Arc<dyn ExpiryHandler>,
    ) -> Result<(), ConfigError> {
        check_component("action", action)?;
        if self.handlers.contains_key(action) {
            return Err(ConfigError::DuplicateHandler {
                action: action.to_string(),
            });
        }
        self.handlers.insert(action.to_string(), handler);
        tracing::info!(action, "expiry handler registered");
        Ok(())
    }

    /// Register an async closure for an action name.
    pub fn register_fn<F, Fut>(&mut self, action: &str, callback: F) -> Result<(), ConfigError>
    where
        F: Fn(TriggerKey) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(action, Arc::new(FnHandler { callback }))
    }

    /// Look up the handler for an action.
    pub fn resolve(&self, action: &str) -> Option<Arc<dyn ExpiryHandler>> {
        self.handlers.get(action).cloned()
    }

    /// All registered action names, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.keys().cloned().collect();
        actions.sort();
        actions
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
