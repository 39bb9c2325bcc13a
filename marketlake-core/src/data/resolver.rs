//! Ingestion resolver: walks provider adapters in priority order with fallback.
//!
//! State machine per symbol:
//!
//! ```text
//! PENDING -> TRYING(0) -> SUCCESS
//!                      -> TRYING(1) -> ... -> EXHAUSTED
//! ```
//!
//! The first adapter whose payload normalizes cleanly wins and no further
//! adapter is called. Every failure is recorded in order, one entry per
//! adapter, so an exhaustion carries the complete trail. Fallback is strictly
//! sequential and the resolver adds no randomness: the same adapter order and
//! the same responses always give the same result.

use super::normalize::{normalize, CanonicalFrame};
use super::provider::{FailureKind, ProviderAdapter, ProviderFailure, Reliability};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Bounded retry applied per adapter before falling back.
///
/// The default is a single attempt. When enabled, only transient failures
/// (transport, rate limit, 5xx) are retried, with deterministic exponential
/// backoff and no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// One adapter's failure in the fallback trail.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    pub provider: String,
    pub failure: ProviderFailure,
    /// Calls made to this adapter (0 when skipped by its circuit breaker).
    pub calls: u32,
}

impl AttemptFailure {
    pub fn kind(&self) -> FailureKind {
        self.failure.kind()
    }
}

/// Why a symbol exhausted every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionCause {
    /// Every provider answered that it has no data for the symbol.
    NoData,
    /// No provider could be reached.
    Unreachable,
    /// A mix of reasons (malformed payloads, missing credentials, ...).
    Mixed,
    /// The resolver has no adapters configured.
    NoProviders,
}

/// Terminal failure: every adapter failed for the symbol.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("all providers failed for '{symbol}': {}", summarize(.failures))]
pub struct Exhausted {
    pub symbol: String,
    /// Failures in provider-priority order, exactly one per adapter.
    pub failures: Vec<AttemptFailure>,
}

fn summarize(failures: &[AttemptFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".into();
    }
    failures
        .iter()
        .map(|f| format!("{}: {}", f.provider, f.failure))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Exhausted {
    pub fn cause(&self) -> ExhaustionCause {
        if self.failures.is_empty() {
            return ExhaustionCause::NoProviders;
        }
        let all = |kind: FailureKind| self.failures.iter().all(|f| f.kind() == kind);
        if all(FailureKind::NoData) {
            ExhaustionCause::NoData
        } else if all(FailureKind::Unreachable) {
            ExhaustionCause::Unreachable
        } else {
            ExhaustionCause::Mixed
        }
    }
}

/// Successful resolution.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub frame: CanonicalFrame,
    /// Name of the adapter that satisfied the request.
    pub source: String,
    pub reliability: Reliability,
    /// Failures of higher-priority adapters that led to this one.
    pub fallback_trail: Vec<AttemptFailure>,
}

/// Resolver states, logged at trace level on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Pending,
    Trying(usize),
    Exhausted,
}

/// Orchestrates provider adapters in a fixed priority order.
pub struct Resolver {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    retry: RetryPolicy,
}

impl Resolver {
    /// Use the adapters in the given order (configuration order).
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self {
            adapters,
            retry: RetryPolicy::none(),
        }
    }

    /// Order adapters by their priority weight, lowest first; ties keep the given order.
    pub fn by_priority(mut adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        adapters.sort_by_key(|a| a.priority());
        Self::new(adapters)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Adapter names in the order they will be tried.
    pub fn provider_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    fn next_state(&self, index: usize) -> ResolverState {
        if index < self.adapters.len() {
            ResolverState::Trying(index)
        } else {
            ResolverState::Exhausted
        }
    }

    /// Resolve a symbol to a normalized frame, or the full failure trail.
    pub fn resolve(&self, symbol: &str) -> Result<Resolved, Exhausted> {
        let mut state = ResolverState::Pending;
        let mut failures: Vec<AttemptFailure> = Vec::new();

        loop {
            trace!(symbol, state = ?state, "resolver transition");
            state = match state {
                ResolverState::Pending => self.next_state(0),
                ResolverState::Trying(index) => {
                    let adapter = &self.adapters[index];
                    match self.attempt(adapter.as_ref(), symbol) {
                        Ok(frame) => {
                            info!(
                                event_type = "resolved",
                                symbol,
                                provider = adapter.name(),
                                reliability = %adapter.reliability(),
                                rows = frame.height(),
                                fallbacks = failures.len(),
                                "provider satisfied request"
                            );
                            return Ok(Resolved {
                                frame,
                                source: adapter.name().to_string(),
                                reliability: adapter.reliability(),
                                fallback_trail: failures,
                            });
                        }
                        Err(failure) => {
                            warn!(
                                event_type = "fetch_failed",
                                symbol,
                                provider = %failure.provider,
                                error = %failure.failure,
                                "provider failed, falling back"
                            );
                            failures.push(failure);
                            self.next_state(index + 1)
                        }
                    }
                }
                ResolverState::Exhausted => {
                    let exhausted = Exhausted {
                        symbol: symbol.to_string(),
                        failures,
                    };
                    warn!(
                        event_type = "exhausted",
                        symbol,
                        cause = ?exhausted.cause(),
                        providers = exhausted.failures.len(),
                        "all providers failed"
                    );
                    return Err(exhausted);
                }
            };
        }
    }

    /// Call one adapter (with bounded retry) and normalize its payload.
    fn attempt(&self, adapter: &dyn ProviderAdapter, symbol: &str) -> Result<CanonicalFrame, AttemptFailure> {
        let fail = |failure: ProviderFailure, calls: u32| AttemptFailure {
            provider: adapter.name().to_string(),
            failure,
            calls,
        };

        let mut calls = 0;
        let mut last_failure = None;
        loop {
            if !adapter.is_available() {
                // A breaker tripped by our own retries keeps the failure that tripped it.
                let failure = last_failure.unwrap_or(ProviderFailure::CircuitOpen);
                return Err(fail(failure, calls));
            }

            calls += 1;
            info!(event_type = "fetch_attempt", symbol, provider = adapter.name(), call = calls);

            match adapter.fetch(symbol) {
                Ok(raw) => {
                    return normalize(symbol, raw, adapter.column_aliases())
                        .map_err(|failure| fail(failure, calls));
                }
                Err(failure) if failure.is_retryable() && calls <= self.retry.max_retries => {
                    let delay = self.retry.delay(calls);
                    debug!(
                        symbol,
                        provider = adapter.name(),
                        error = %failure,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient failure"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    last_failure = Some(failure);
                }
                Err(failure) => return Err(fail(failure, calls)),
            }
        }
    }
}
