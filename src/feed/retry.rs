//! Bounded retries for quote fetches. Only transient failures are retried:
//! an HTTP status outside the transient set comes back as a `StatusError`
//! and ends the loop on the first attempt.

use anyhow::Result;
use rand::Rng;
use std::fmt;
use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::config::FeedConfig;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of each delay drawn as ± noise.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 200,
            max_delay_ms: 3000,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    pub fn from_feed(cfg: &FeedConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay_ms: cfg.retry_base_delay_ms,
            ..Self::default()
        }
    }

    /// Waits before each retry: doubling from the base, capped at the max.
    fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(move |n| {
            let step = self.base_delay_ms.saturating_mul(1u64 << n.min(32)).min(self.max_delay_ms);
            let spread = (step as f64 * self.jitter_factor) as u64;
            let ms = if spread == 0 {
                step
            } else {
                rand::thread_rng().gen_range(step.saturating_sub(spread)..=step.saturating_add(spread))
            };
            Duration::from_millis(ms)
        })
    }
}

/// Non-success HTTP status from a quote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusError {
    pub status: u16,
    pub target: String,
}

impl StatusError {
    pub fn new(status: u16, target: impl Into<String>) -> Self {
        Self {
            status,
            target: target.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        is_retryable_status(self.status)
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {} for {}", self.status, self.target)
    }
}

impl std::error::Error for StatusError {}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Whether another attempt could succeed. Transport and decode errors count
/// as transient; a status error only if its code is.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StatusError>().map_or(true, StatusError::is_transient)
}

/// Run `operation` until it succeeds, fails permanently, or the policy runs
/// out of retries. The last error is returned as is.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut waits = policy.schedule();
    let mut attempt = 1u32;
    loop {
        let err = match operation().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if !is_transient(&err) {
            return Err(err);
        }
        let Some(wait) = waits.next() else {
            return Err(err);
        };
        log(
            Level::Debug,
            Domain::Market,
            "fetch_retry",
            obj(&[
                ("what", v_str(what)),
                ("attempt", v_num(attempt as f64)),
                ("delay_ms", v_num(wait.as_millis() as f64)),
                ("msg", v_str(&err.to_string())),
            ]),
        );
        sleep(wait).await;
        attempt += 1;
    }
}
