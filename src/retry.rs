use anyhow::{anyhow, Result};
use log::{error, warn};
use rand::Rng;
use tokio::time::{sleep, Duration};

use crate::completion::CompletionClient;

/// Capped exponential backoff for rate-limited completion calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter is drawn from `[0, attempt) * jitter_unit`.
    pub jitter_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No waiting at all; for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_unit: Duration::ZERO,
        }
    }

    /// Deterministic part of the wait after the `attempt`-th rate limit hit.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jitter(&self, attempt: u32) -> Duration {
        if self.jitter_unit.is_zero() || attempt == 0 {
            return Duration::ZERO;
        }
        let scale = rand::thread_rng().gen_range(0.0..f64::from(attempt));
        self.jitter_unit.mul_f64(scale)
    }
}

/// True when the error chain mentions a rate limit, in any casing.
pub fn is_rate_limit(err: &anyhow::Error) -> bool {
    format!("{err:#}").to_lowercase().contains("rate limit")
}

/// Wraps a client so rate-limited calls are retried; any other error is
/// returned on first sight.
#[derive(Debug, Clone)]
pub struct Retrying<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> Retrying<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: CompletionClient> CompletionClient for Retrying<C> {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.inner.complete(prompt).await {
                Ok(text) => return Ok(text),
                Err(err) if is_rate_limit(&err) => {
                    attempt += 1;
                    if attempt >= max {
                        error!("rate limit persisted after {attempt} attempts: {err:#}");
                        return Err(err.context(format!("gave up after {attempt} attempts")));
                    }
                    let wait = self.policy.backoff(attempt) + self.policy.jitter(attempt);
                    warn!(
                        "rate limit hit, backing off for {:.1}s (attempt {attempt}/{max})",
                        wait.as_secs_f64()
                    );
                    sleep(wait).await;
                }
                Err(err) => {
                    error!("unexpected completion error: {err:#}");
                    return Err(err);
                }
            }
        }
    }
}

/// Fails fast on misconfigured retry settings from the CLI.
pub fn policy_from_cli(max_attempts: u32) -> Result<RetryPolicy> {
    if max_attempts == 0 {
        return Err(anyhow!("--max-attempts must be at least 1"));
    }
    Ok(RetryPolicy { max_attempts, ..RetryPolicy::default() })
}
