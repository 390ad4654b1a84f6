//! Bounded retry around store round-trips.
//!
//! Only unavailability and per-call timeouts are retried; every other store
//! error propagates immediately, wrapped with the operation name and key.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use ember_core::{EmberError, EmberResult, RetryPolicy, StoreError};

use crate::backend::StoreResult;

/// Run `call` under the policy's per-call timeout, retrying transient
/// failures with jittered exponential backoff.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op: &'static str,
    key: &str,
    mut call: F,
) -> EmberResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut last_reason = String::new();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match tokio::time::timeout(policy.op_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(StoreError::Unavailable { reason })) => {
                tracing::warn!(op, key, attempt = attempts, reason = %reason, "transient store failure");
                last_reason = reason;
            }
            Ok(Err(source)) => {
                return Err(EmberError::Store {
                    op,
                    key: key.to_string(),
                    source,
                });
            }
            Err(_) => {
                last_reason = format!("call timed out after {:?}", policy.op_timeout);
                tracing::warn!(op, key, attempt = attempts, "store call timed out");
            }
        }
        if attempts > policy.max_retries {
            return Err(EmberError::StoreUnavailable {
                op,
                key: key.to_string(),
                attempts,
                reason: last_reason,
            });
        }
        tokio::time::sleep(jittered(policy.delay_for(attempts))).await;
    }
}

/// ±20% jitter so synchronized callers do not retry in lockstep.
fn jittered(delay: Duration) -> Duration {
    let factor: f64 = rand::rng().random_range(0.8..1.2);
    delay.mul_f64(factor)
}
