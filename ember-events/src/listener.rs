//! Expiry notification listener.
//!
//! One long-lived background task per configured listening pool. The task
//! subscribes to the pool's expired-key stream, parses each notification,
//! and dispatches the registered handler fire-and-forget. Handler failures
//! are caught, logged with action/identifier context, and never terminate
//! the loop.
//!
//! # Lifecycle
//!
//! `Stopped → Subscribing → Listening ⇄ Reconnecting → Stopped`
//!
//! A severed subscription moves the listener to `Reconnecting`; it retries
//! with capped exponential backoff and resumes on success. Expirations that
//! occur while disconnected are not replayed — delivery is best-effort,
//! at-most-once. Keys that do not match the trigger shape are ignored, since
//! other subsystems may keep unrelated keys in the same pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use ember_core::{TriggerKey, POOL_TRIGGERS};
use ember_store::{PoolRegistry, SubscriptionError};

use crate::registry::{ExpiryHandler, HandlerRegistry};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the expiry listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Pool whose expirations this listener watches.
    pub pool_alias: String,

    /// Delay before the first resubscription attempt.
    pub reconnect_initial: Duration,

    /// Cap on the exponential reconnect backoff, so a prolonged outage
    /// never silently stops the retry loop.
    pub reconnect_max: Duration,

    /// Give up after this many consecutive failures (None = retry forever).
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            pool_alias: POOL_TRIGGERS.to_string(),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            max_reconnect_attempts: None,
        }
    }
}

impl ListenerConfig {
    /// Short delays for tests and local development.
    pub fn development() -> Self {
        Self {
            pool_alias: POOL_TRIGGERS.to_string(),
            reconnect_initial: Duration::from_millis(10),
            reconnect_max: Duration::from_millis(100),
            max_reconnect_attempts: None,
        }
    }
}

// ============================================================================
// STATE AND METRICS
// ============================================================================

/// Observable listener state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Subscribing,
    Listening,
    Reconnecting,
}

/// Counters tracking listener activity.
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    /// Expiry notifications received.
    pub notifications: AtomicU64,

    /// Trigger notifications dispatched to a handler.
    pub dispatched: AtomicU64,

    /// Handlers that returned an error or panicked.
    pub handler_failures: AtomicU64,

    /// Notifications ignored: non-trigger keys or unregistered actions.
    pub ignored: AtomicU64,

    /// Notifications dropped because the subscription lagged.
    pub lagged: AtomicU64,

    /// Successful resubscriptions after a lost subscription.
    pub reconnects: AtomicU64,
}

impl ListenerMetrics {
    pub fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot {
            notifications: self.notifications.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            lagged: self.lagged.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ListenerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSnapshot {
    pub notifications: u64,
    pub dispatched: u64,
    pub handler_failures: u64,
    pub ignored: u64,
    pub lagged: u64,
    pub reconnects: u64,
}

// ============================================================================
// HANDLE
// ============================================================================

/// Handle to a running listener task.
pub struct ListenerHandle {
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ListenerState>,
    metrics: Arc<ListenerMetrics>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Current listener state.
    pub fn state(&self) -> ListenerState {
        *self.state_rx.borrow()
    }

    /// Wait until the listener reaches the given state.
    pub async fn wait_for(&mut self, target: ListenerState) {
        while *self.state_rx.borrow_and_update() != target {
            if self.state_rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn metrics(&self) -> ListenerSnapshot {
        self.metrics.snapshot()
    }

    /// Signal shutdown and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ============================================================================
// LISTENER
// ============================================================================

/// Spawner for the expiry listener background task.
pub struct ExpiryListener;

impl ExpiryListener {
    /// Start the listener. Handlers must already be registered: the
    /// registry is shared read-only from here on.
    pub fn spawn(
        pools: Arc<PoolRegistry>,
        registry: Arc<HandlerRegistry>,
        config: ListenerConfig,
    ) -> ListenerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ListenerState::Stopped);
        let metrics = Arc::new(ListenerMetrics::default());
        let task = tokio::spawn(run(
            pools,
            registry,
            config,
            shutdown_rx,
            state_tx,
            Arc::clone(&metrics),
        ));
        ListenerHandle {
            shutdown_tx,
            state_rx,
            metrics,
            task,
        }
    }
}

async fn run(
    pools: Arc<PoolRegistry>,
    registry: Arc<HandlerRegistry>,
    config: ListenerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ListenerState>,
    metrics: Arc<ListenerMetrics>,
) {
    tracing::info!(
        alias = %config.pool_alias,
        actions = %config_actions(&registry),
        "expiry listener starting"
    );
    let mut backoff = Backoff::new(
        config.reconnect_initial,
        config.reconnect_max,
        config.max_reconnect_attempts,
    );

    'main: loop {
        let _ = state_tx.send(if backoff.failures() == 0 {
            ListenerState::Subscribing
        } else {
            ListenerState::Reconnecting
        });

        let backend = match pools.get(&config.pool_alias) {
            Ok(backend) => backend,
            Err(error) => {
                // An unknown alias never heals; bail out instead of retrying.
                tracing::error!(alias = %config.pool_alias, error = %error, "expiry listener cannot resolve pool, exiting");
                break 'main;
            }
        };

        let mut subscription = match backend.subscribe_expired().await {
            Ok(subscription) => {
                if backoff.failures() > 0 {
                    metrics.reconnects.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        attempts = backoff.failures(),
                        "expiry listener resubscribed"
                    );
                }
                backoff.reset();
                let _ = state_tx.send(ListenerState::Listening);
                tracing::debug!(alias = %config.pool_alias, "expiry listener active");
                subscription
            }
            Err(error) => {
                backoff.record_failure();
                tracing::warn!(error = %error, attempt = backoff.failures(), "expiry subscription failed");
                if !backoff.should_retry() {
                    tracing::error!("max reconnection attempts reached, exiting listener");
                    break 'main;
                }
                tokio::select! {
                    _ = backoff.wait() => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break 'main;
                        }
                    }
                }
                continue 'main;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("expiry listener shutting down");
                        break 'main;
                    }
                }
                received = subscription.recv() => match received {
                    Ok(key) => {
                        metrics.notifications.fetch_add(1, Ordering::Relaxed);
                        handle_notification(&registry, &metrics, &key);
                    }
                    Err(SubscriptionError::Lagged { missed }) => {
                        // Dropped notifications are gone; nothing is replayed.
                        metrics.lagged.fetch_add(missed, Ordering::Relaxed);
                        tracing::warn!(missed, "expiry notifications dropped on lagging subscription");
                    }
                    Err(SubscriptionError::Closed) => {
                        backoff.record_failure();
                        let _ = state_tx.send(ListenerState::Reconnecting);
                        tracing::warn!("expiry subscription closed, reconnecting");
                        if !backoff.should_retry() {
                            tracing::error!("max reconnection attempts reached, exiting listener");
                            break 'main;
                        }
                        tokio::select! {
                            _ = backoff.wait() => {}
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    break 'main;
                                }
                            }
                        }
                        continue 'main;
                    }
                }
            }
        }
    }

    let _ = state_tx.send(ListenerState::Stopped);
    let snapshot = metrics.snapshot();
    tracing::info!(
        notifications = snapshot.notifications,
        dispatched = snapshot.dispatched,
        handler_failures = snapshot.handler_failures,
        reconnects = snapshot.reconnects,
        "expiry listener stopped"
    );
}

fn config_actions(registry: &HandlerRegistry) -> String {
    registry.actions().join(",")
}

/// Parse a notification and dispatch its handler.
fn handle_notification(
    registry: &Arc<HandlerRegistry>,
    metrics: &Arc<ListenerMetrics>,
    key: &str,
) {
    let Some(trigger) = TriggerKey::parse(key) else {
        metrics.ignored.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(key, "ignoring non-trigger expiry");
        return;
    };
    let Some(handler) = registry.resolve(trigger.action()) else {
        metrics.ignored.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            action = %trigger.action(),
            identifier = %trigger.identifier(),
            "no handler registered for expired trigger"
        );
        return;
    };
    metrics.dispatched.fetch_add(1, Ordering::Relaxed);
    dispatch(handler, trigger, Arc::clone(metrics));
}

/// Fire-and-forget handler invocation with completion tracking.
///
/// The handler runs on its own task so a slow callback never blocks the
/// notification loop; a second task records the outcome, including panics,
/// which are confined to the handler's task.
fn dispatch(handler: Arc<dyn ExpiryHandler>, trigger: TriggerKey, metrics: Arc<ListenerMetrics>) {
    tracing::debug!(
        action = %trigger.action(),
        identifier = %trigger.identifier(),
        "dispatching expiry handler"
    );
    let work = {
        let trigger = trigger.clone();
        tokio::spawn(async move { handler.on_expire(&trigger).await })
    };
    tokio::spawn(async move {
        match work.await {
            Ok(Ok(())) => {
                tracing::trace!(
                    action = %trigger.action(),
                    identifier = %trigger.identifier(),
                    "expiry handler completed"
                );
            }
            Ok(Err(error)) => {
                metrics.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    action = %trigger.action(),
                    identifier = %trigger.identifier(),
                    error = %error,
                    "expiry handler failed"
                );
            }
            Err(join_error) if join_error.is_panic() => {
                metrics.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    action = %trigger.action(),
                    identifier = %trigger.identifier(),
                    "expiry handler panicked"
                );
            }
            Err(_) => {
                tracing::debug!(
                    action = %trigger.action(),
                    identifier = %trigger.identifier(),
                    "expiry handler cancelled"
                );
            }
        }
    });
}

// ============================================================================
// BACKOFF
// ============================================================================

/// Capped exponential reconnect backoff.
struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: Option<u32>,
    failures: u32,
}

impl Backoff {
    fn new(initial: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            initial,
            max,
            max_attempts,
            failures: 0,
        }
    }

    fn failures(&self) -> u32 {
        self.failures
    }

    fn record_failure(&mut self) {
        self.failures += 1;
    }

    fn reset(&mut self) {
        self.failures = 0;
    }

    fn should_retry(&self) -> bool {
        match self.max_attempts {
            None => true,
            Some(max) => self.failures < max,
        }
    }

    fn delay(&self) -> Duration {
        if self.failures <= 1 {
            return self.initial.min(self.max);
        }
        let exponent = (self.failures - 1).min(16);
        let delay = self.initial.saturating_mul(1u32 << exponent);
        delay.min(self.max)
    }

    async fn wait(&self) {
        let delay = self.delay();
        tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression_is_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(80), None);
        backoff.record_failure();
        assert_eq!(backoff.delay(), Duration::from_millis(10));
        backoff.record_failure();
        assert_eq!(backoff.delay(), Duration::from_millis(20));
        backoff.record_failure();
        assert_eq!(backoff.delay(), Duration::from_millis(40));
        backoff.record_failure();
        assert_eq!(backoff.delay(), Duration::from_millis(80));
        backoff.record_failure();
        assert_eq!(backoff.delay(), Duration::from_millis(80), "capped");
    }

    #[test]
    fn test_backoff_attempt_bound() {
        let mut backoff = Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
            Some(2),
        );
        assert!(backoff.should_retry());
        backoff.record_failure();
        assert!(backoff.should_retry());
        backoff.record_failure();
        assert!(!backoff.should_retry());
        backoff.reset();
        assert!(backoff.should_retry());
    }

    #[test]
    fn test_default_config_watches_trigger_pool() {
        let config = ListenerConfig::default();
        assert_eq!(config.pool_alias, POOL_TRIGGERS);
        assert!(config.max_reconnect_attempts.is_none());
        assert!(config.reconnect_initial < config.reconnect_max);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = ListenerMetrics::default();
        metrics.notifications.fetch_add(3, Ordering::Relaxed);
        metrics.dispatched.fetch_add(2, Ordering::Relaxed);
        metrics.handler_failures.fetch_add(1, Ordering::Relaxed);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.notifications, 3);
        assert_eq!(snapshot.dispatched, 2);
        assert_eq!(snapshot.handler_failures, 1);
        assert_eq!(snapshot.ignored, 0);
    }
}
