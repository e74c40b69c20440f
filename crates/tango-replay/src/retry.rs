//! Bounded, fixed-delay retry used by every element lookup.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::duration_ms;
use crate::errors::ReplayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after every unsuccessful attempt, including the last one.
    #[serde(with = "duration_ms")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(300),
        }
    }
}

/// Result of a retried lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retried<T> {
    Found { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

impl<T> Retried<T> {
    pub fn into_found(self) -> Option<T> {
        match self {
            Retried::Found { value, .. } => Some(value),
            Retried::Exhausted { .. } => None,
        }
    }
}

/// Run `attempt` until it yields a value or the policy runs out.
///
/// `attempt` receives the 1-based attempt number. `Ok(None)` and non-fatal
/// errors count as a miss and are reported through `on_miss`; fatal errors
/// abort immediately.
pub async fn resolve_with_retry<T, F, Fut, M>(
    policy: &RetryPolicy,
    mut attempt: F,
    mut on_miss: M,
) -> Result<Retried<T>, ReplayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, ReplayError>>,
    M: FnMut(u32, Option<&ReplayError>),
{
    let max_attempts = policy.max_attempts.max(1);
    for n in 1..=max_attempts {
        match attempt(n).await {
            Ok(Some(value)) => return Ok(Retried::Found { value, attempts: n }),
            Ok(None) => on_miss(n, None),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(attempt = n, error = %e, "retry attempt failed");
                on_miss(n, Some(&e));
            }
        }
        tokio::time::sleep(policy.delay).await;
    }
    Ok(Retried::Exhausted {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_success() {
        let calls = AtomicU32::new(0);
        let result = resolve_with_retry(
            &RetryPolicy::default(),
            |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, ReplayError>(if n == 3 { Some("hit") } else { None }) }
            },
            |_, _| {},
        )
        .await
        .unwrap();
        assert_eq!(result, Retried::Found { value: "hit", attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts_with_delays() {
        let start = tokio::time::Instant::now();
        let mut misses = Vec::new();
        let result: Retried<()> = resolve_with_retry(
            &RetryPolicy::default(),
            |_| async { Err(ReplayError::ElementAction("covered".into())) },
            |n, err| misses.push((n, err.is_some())),
        )
        .await
        .unwrap();
        assert_eq!(result, Retried::Exhausted { attempts: 5 });
        assert_eq!(misses.len(), 5);
        assert!(misses.iter().all(|(_, had_error)| *had_error));
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<Retried<()>, _> = resolve_with_retry(
            &RetryPolicy::default(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ReplayError::SessionFault("target closed".into())) }
            },
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(ReplayError::SessionFault(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
