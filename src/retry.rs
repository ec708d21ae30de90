//! Retry policy for transient platform failures.
//!
//! A [`RetryPolicy`] maps an error kind to a [`RetryRule`] (attempt budget plus backoff).
//! Each rule keeps its own attempt counter for the duration of one [`RetryPolicy::run`]
//! call; nothing carries over between calls.

use crate::error::{MarqueeError, RequestErrorKind};

use rand::random;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Ceiling for exponential delays that set no `max` of their own.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Constant(Duration),
    /// `factor * base^n` for the n-th retry (n starting at 0), optionally with full jitter.
    /// Saturates at `max`, or [`DEFAULT_MAX_BACKOFF`] when unset.
    Exponential {
        base: f64,
        factor: Duration,
        max: Option<Duration>,
        jitter: bool,
    },
}

impl Backoff {
    pub fn delay(&self, retry_number: u32) -> Duration {
        match *self {
            Backoff::Constant(delay) => delay,
            Backoff::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let ceiling = max.unwrap_or(DEFAULT_MAX_BACKOFF);
                let exponent = i32::try_from(retry_number).unwrap_or(i32::MAX);
                let secs = factor.as_secs_f64() * base.powi(exponent);
                let mut delay = Duration::try_from_secs_f64(secs)
                    .unwrap_or(ceiling)
                    .min(ceiling);
                if jitter {
                    delay = delay.mul_f64(random::<f64>());
                }
                delay
            }
        }
    }
}

/// Attempt budget (first call included) and backoff for one error kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryRule {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryRule {
    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Constant(delay),
        }
    }

    /// Jittered exponential backoff. `base` must be finite and at least 1.
    pub fn exponential(
        max_attempts: u32,
        base: f64,
        factor: Duration,
    ) -> Result<Self, MarqueeError> {
        if !base.is_finite() || base < 1.0 {
            return Err(MarqueeError::Value(format!(
                "exponential backoff base must be >= 1, got {base}"
            )));
        }
        Ok(Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base,
                factor,
                max: None,
                jitter: true,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleSlot {
    RateLimited,
    Transient,
}

/// Which errors are retried, how often, and how long to wait in between.
///
/// # Default
///
/// - HTTP 429: 5 attempts, constant 60 s between them
/// - HTTP 500/502/503/504 and client-side timeouts: 5 attempts, exponential
///   backoff (base 2, factor 2 s) with full jitter
/// - everything else: not retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub rate_limited: Option<RetryRule>,
    pub transient: Option<RetryRule>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limited: Some(RetryRule::constant(5, Duration::from_secs(60))),
            transient: Some(RetryRule {
                max_attempts: 5,
                backoff: Backoff::Exponential {
                    base: 2.0,
                    factor: Duration::from_secs(2),
                    max: None,
                    jitter: true,
                },
            }),
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            rate_limited: None,
            transient: None,
        }
    }

    pub fn with_rate_limited(mut self, rule: RetryRule) -> Self {
        self.rate_limited = Some(rule);
        self
    }

    pub fn with_transient(mut self, rule: RetryRule) -> Self {
        self.transient = Some(rule);
        self
    }

    fn slot_for(&self, err: &MarqueeError) -> Option<(RuleSlot, RetryRule)> {
        if !err.is_retryable() {
            return None;
        }
        if err.request_kind() == Some(RequestErrorKind::RateLimited) {
            self.rate_limited.map(|rule| (RuleSlot::RateLimited, rule))
        } else {
            self.transient.map(|rule| (RuleSlot::Transient, rule))
        }
    }

    /// The rule that governs `err`, if it is retryable at all.
    pub fn rule_for(&self, err: &MarqueeError) -> Option<RetryRule> {
        self.slot_for(err).map(|(_, rule)| rule)
    }

    /// Delay before the next attempt, given how many attempts this rule has already
    /// consumed. `None` means give up.
    pub fn next_delay(&self, err: &MarqueeError, attempts_so_far: u32) -> Option<Duration> {
        let rule = self.rule_for(err)?;
        if attempts_so_far >= rule.max_attempts {
            return None;
        }
        Some(rule.backoff.delay(attempts_so_far.saturating_sub(1)))
    }

    /// Run `call` until it succeeds, fails terminally, or a rule's budget runs out.
    ///
    /// Non-retryable errors are returned unchanged. Exhaustion wraps the last error in
    /// [`MarqueeError::RetriesExhausted`] naming `operation`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, MarqueeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MarqueeError>>,
    {
        let mut rate_limited_attempts: u32 = 0;
        let mut transient_attempts: u32 = 0;
        let mut total_attempts: u32 = 0;

        loop {
            total_attempts += 1;
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let Some((slot, _)) = self.slot_for(&err) else {
                return Err(err);
            };
            let used = match slot {
                RuleSlot::RateLimited => {
                    rate_limited_attempts += 1;
                    rate_limited_attempts
                }
                RuleSlot::Transient => {
                    transient_attempts += 1;
                    transient_attempts
                }
            };

            match self.next_delay(&err, used) {
                Some(delay) => {
                    warn!(
                        operation,
                        attempt = used,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
                None => {
                    return Err(MarqueeError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: total_attempts,
                        source: Box::new(err),
                    });
                }
            }
        }
    }
}
