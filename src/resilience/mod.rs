//! Resilient provider dispatch: retry and circuit breaking composed as
//! two explicit stages around every provider call.
//!
//! Each retry attempt passes through the breaker, so an open breaker
//! short-circuits the remaining attempts without contacting the provider.
//! For streamed calls only establishment is covered; once the first chunk
//! is out, failures surface in-band and are never retried.

pub mod breaker;

pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitState};

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::models::ChatRequest;
use crate::provider::{GenerateFuture, Provider, StreamFuture};

/// Exponential backoff with jitter: base doubles per attempt, capped,
/// with the upper half of the delay randomized.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before retry number `attempt` (1-based count of failures
    /// so far).
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
            .min(self.max_delay);
        let half = exp / 2;
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=half);
        half + jitter
    }
}

/// A provider wrapped with retry and a circuit breaker. Implements
/// `Provider` itself so the registry can hand out resilient handles
/// transparently.
pub struct ResilientClient {
    inner: Arc<dyn Provider>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl ResilientClient {
    pub fn new(inner: Arc<dyn Provider>, breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self {
            inner,
            breaker,
            retry,
        }
    }
}

impl Provider for ResilientClient {
    fn generate(&self, req: &ChatRequest) -> GenerateFuture {
        let inner = self.inner.clone();
        let breaker = self.breaker.clone();
        let retry = self.retry.clone();
        let req = req.clone();

        Box::pin(async move {
            let mut attempt = 0;
            loop {
                attempt += 1;
                breaker.try_acquire()?;

                match inner.generate(&req).await {
                    Ok(response) => {
                        breaker.record_success();
                        return Ok(response);
                    }
                    Err(e) => {
                        breaker.record_failure();
                        if attempt >= retry.max_attempts() {
                            return Err(e);
                        }
                        let delay = retry.backoff(attempt);
                        warn!(
                            provider = inner.name(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Provider call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }

    fn generate_stream(&self, req: &ChatRequest) -> StreamFuture {
        let inner = self.inner.clone();
        let breaker = self.breaker.clone();
        let retry = self.retry.clone();
        let req = req.clone();

        Box::pin(async move {
            let mut attempt = 0;
            loop {
                attempt += 1;
                breaker.try_acquire()?;

                // Resilience stops at establishment; the stream itself is
                // handed back untouched.
                match inner.generate_stream(&req).await {
                    Ok(stream) => {
                        breaker.record_success();
                        return Ok(stream);
                    }
                    Err(e) => {
                        breaker.record_failure();
                        if attempt >= retry.max_attempts() {
                            return Err(e);
                        }
                        let delay = retry.backoff(attempt);
                        warn!(
                            provider = inner.name(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Stream establishment failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
