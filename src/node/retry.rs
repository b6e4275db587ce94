//! Bounded retry with fixed or exponential backoff
//!
//! One combinator used by every lifecycle operation that talks to the
//! native bridge, so that backoff and give-up behaviour is identical
//! everywhere and can be tested on its own.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::time::Duration;

/// Default number of attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between attempts
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

type ShouldRetry<'a, E> = Box<dyn Fn(&E) -> bool + Send + Sync + 'a>;
type OnRetry<'a, E> = Box<dyn FnMut(u32, &E) -> BoxFuture<'a, ()> + Send + 'a>;

/// Retry parameters for a single call site
pub struct RetrySpec<'a, E> {
    /// Total number of attempts, at least one
    pub max_retries: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Double the delay after every failed attempt
    pub exponential: bool,
    should_retry: Option<ShouldRetry<'a, E>>,
    on_retry: Option<OnRetry<'a, E>>,
}

impl<E> Default for RetrySpec<'_, E> {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            exponential: false,
            should_retry: None,
            on_retry: None,
        }
    }
}

impl<'a, E> RetrySpec<'a, E> {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    pub fn exponential(mut self, exponential: bool) -> Self {
        self.exponential = exponential;
        self
    }

    /// Only retry failures for which `predicate` returns true
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'a,
    {
        self.should_retry = Some(Box::new(predicate));
        self
    }

    /// Run `hook` after a retryable failure, before the backoff delay.
    ///
    /// The hook receives the 1-based number of the attempt that failed.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: FnMut(u32, &E) -> BoxFuture<'a, ()> + Send + 'a,
    {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Delay to wait after `attempt` (1-based) failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.exponential {
            let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
            self.base_delay.saturating_mul(factor)
        } else {
            self.base_delay
        }
    }
}

/// Run `operation` until it succeeds or the policy gives up.
///
/// The error of the last attempt is returned exactly as produced.
pub async fn retry<T, E, F, Fut>(mut operation: F, mut policy: RetrySpec<'_, E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_retries = policy.max_retries.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_retries {
            log::error!("Giving up after {} attempt(s): {}", attempt, err);
            return Err(err);
        }

        if let Some(ref should_retry) = policy.should_retry {
            if !should_retry(&err) {
                log::debug!("Attempt {} failed with a non-retryable error: {}", attempt, err);
                return Err(err);
            }
        }

        let delay = policy.delay_for(attempt);
        log::warn!(
            "Attempt {}/{} failed: {}. Retrying in {}ms",
            attempt,
            max_retries,
            err,
            delay.as_millis()
        );

        if let Some(ref mut on_retry) = policy.on_retry {
            on_retry(attempt, &err).await;
        }

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
