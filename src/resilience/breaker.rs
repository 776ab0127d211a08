//! Per-provider circuit breaker.
//!
//! Closed passes calls through and counts consecutive failures. After
//! `failure_threshold` failures the circuit opens and rejects immediately
//! until the cool-down elapses; the first call after cool-down runs as a
//! half-open trial. One trial success closes the circuit, a trial failure
//! reopens it.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    const fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Closed,
            1 => Self::Open,
            _ => Self::HalfOpen,
        }
    }

    const fn to_u32(self) -> u32 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

pub struct CircuitBreaker {
    provider_name: String,
    state: AtomicU32,
    failure_count: AtomicU32,
    /// Elapsed-millis timestamp of the moment the circuit last opened.
    opened_at_ms: AtomicU64,
    failure_threshold: u32,
    cooldown_ms: u64,
    start: Instant,
}

impl CircuitBreaker {
    pub fn new(provider_name: &str, config: &BreakerConfig) -> Self {
        Self {
            provider_name: provider_name.to_owned(),
            state: AtomicU32::new(CircuitState::Closed.to_u32()),
            failure_count: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            failure_threshold: config.failure_threshold,
            cooldown_ms: config.cooldown_secs * 1000,
            start: Instant::now(),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u32(self.state.load(Ordering::SeqCst))
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Gate a call attempt. `Err(BreakerOpen)` rejects without touching
    /// the provider; `Ok` admits either a normal call or the half-open
    /// trial.
    pub fn try_acquire(&self) -> Result<()> {
        match self.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Err(self.open_error()),
            CircuitState::Open => {
                let opened_at = self.opened_at_ms.load(Ordering::SeqCst);
                if self.elapsed_ms().saturating_sub(opened_at) >= self.cooldown_ms
                    && self
                        .state
                        .compare_exchange(
                            CircuitState::Open.to_u32(),
                            CircuitState::HalfOpen.to_u32(),
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                {
                    info!(
                        provider = %self.provider_name,
                        "Circuit breaker half-open, admitting trial call"
                    );
                    return Ok(());
                }
                Err(self.open_error())
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                self.state
                    .store(CircuitState::Closed.to_u32(), Ordering::SeqCst);
                self.failure_count.store(0, Ordering::SeqCst);
                info!(
                    provider = %self.provider_name,
                    "Circuit breaker closed, provider recovered"
                );
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.failure_threshold {
                    self.state
                        .store(CircuitState::Open.to_u32(), Ordering::SeqCst);
                    self.opened_at_ms.store(self.elapsed_ms(), Ordering::SeqCst);
                    warn!(
                        provider = %self.provider_name,
                        failures = count,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.state
                    .store(CircuitState::Open.to_u32(), Ordering::SeqCst);
                self.opened_at_ms.store(self.elapsed_ms(), Ordering::SeqCst);
                warn!(
                    provider = %self.provider_name,
                    "Circuit breaker reopened, trial call failed"
                );
            }
            CircuitState::Open => {
                self.opened_at_ms.store(self.elapsed_ms(), Ordering::SeqCst);
            }
        }
    }

    fn open_error(&self) -> GatewayError {
        GatewayError::BreakerOpen {
            provider: self.provider_name.clone(),
            retry_after_secs: self.retry_after_secs(),
        }
    }

    fn retry_after_secs(&self) -> u64 {
        let opened_at = self.opened_at_ms.load(Ordering::SeqCst);
        let since_open = self.elapsed_ms().saturating_sub(opened_at);
        self.cooldown_ms.saturating_sub(since_open).div_ceil(1000)
    }
}

/// Lazily populated breaker-per-provider registry, owned by the gateway
/// and shared across requests.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn for_provider(&self, provider_name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider_name, &self.config)))
            .clone()
    }
}
