//! EMBER Events - Expiry Notification Side
//!
//! Converts passive key expirations into invocations of registered
//! application callbacks:
//!
//! - [`HandlerRegistry`]: action name → async callback, populated once at
//!   startup, read-only once shared with the listener.
//! - [`ExpiryListener`]: the long-lived background task subscribing to a
//!   pool's expired-key notifications and dispatching handlers.
//!
//! Delivery is best-effort, at-most-once: notifications that expire while
//! the listener is disconnected are not replayed. This is the documented
//! trade-off for timeout-driven UX features; anything needing guaranteed
//! delivery belongs in a durable queue, not here.

pub mod listener;
pub mod registry;

pub use listener::{
    ExpiryListener, ListenerConfig, ListenerHandle, ListenerMetrics, ListenerSnapshot,
    ListenerState,
};
pub use registry::{ExpiryHandler, HandlerRegistry};
