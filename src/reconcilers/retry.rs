// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Exponential backoff for transient collaborator failures.
//!
//! Reads against the Kubernetes API go through [`retry_api_call`]; the
//! Compute Engine client drives its own loop with [`cloud_backoff`]. Both
//! retry only rate limiting, server errors and connection failures. Anything
//! else fails the attempt immediately and is left to the controller backoff.

use anyhow::Result;
use reqwest::StatusCode;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Maximum total time spent retrying a Kubernetes read
const MAX_ELAPSED_TIME_SECS: u64 = 120;

const INITIAL_INTERVAL_MILLIS: u64 = 100;

const MAX_INTERVAL_SECS: u64 = 10;

const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Jitter applied to every interval (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

const CLOUD_INITIAL_INTERVAL_MILLIS: u64 = 250;

const CLOUD_MAX_INTERVAL_SECS: u64 = 15;

/// Cloud calls get longer to recover, quota errors clear slowly
const CLOUD_MAX_ELAPSED_TIME_SECS: u64 = 180;

/// Exponential backoff with jitter.
pub struct ExponentialBackoff {
    pub current_interval: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Option<Duration>,
    pub multiplier: f64,
    pub randomization_factor: f64,
    start_time: Instant,
}

impl ExponentialBackoff {
    fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier: BACKOFF_MULTIPLIER,
            randomization_factor: RANDOMIZATION_FACTOR,
            start_time: Instant::now(),
        }
    }

    /// Next interval to sleep, or `None` once the elapsed budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(self.apply_jitter(interval))
    }

    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }
        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        // Uniform in [secs - delta, secs + delta]
        let jittered = secs - delta + 2.0 * delta * rand::random::<f64>();
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Backoff for Kubernetes API reads: 100ms doubling to 10s, for at most 2 minutes.
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(MAX_INTERVAL_SECS),
        Some(Duration::from_secs(MAX_ELAPSED_TIME_SECS)),
    )
}

/// Backoff for Compute Engine calls: 250ms doubling to 15s, for at most 3 minutes.
#[must_use]
pub fn cloud_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(CLOUD_INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(CLOUD_MAX_INTERVAL_SECS),
        Some(Duration::from_secs(CLOUD_MAX_ELAPSED_TIME_SECS)),
    )
}

/// True for 429 and the transient 5xx codes.
#[must_use]
pub fn is_retryable_http_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Retry a Kubernetes API call with exponential backoff.
///
/// # Arguments
///
/// * `operation` - Async closure performing the call
/// * `operation_name` - Human-readable name for logging (e.g., "get mesh net/prod")
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once the backoff
/// is exhausted.
pub async fn retry_api_call<T, F, Fut>(mut operation: F, operation_name: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = default_backoff();
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt,
                        elapsed = ?start_time.elapsed(),
                        "Kubernetes API call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable_error(&err) {
            return Err(err.into());
        }

        let Some(duration) = backoff.next_backoff() else {
            error!(
                operation = operation_name,
                attempt,
                elapsed = ?start_time.elapsed(),
                error = %err,
                "Backoff exhausted, giving up"
            );
            return Err(anyhow::anyhow!(
                "{operation_name} failed after {attempt} attempts: {err}"
            ));
        };

        warn!(
            operation = operation_name,
            attempt,
            retry_after = ?duration,
            error = %err,
            "Retryable Kubernetes API error, will retry"
        );
        tokio::time::sleep(duration).await;
    }
}

/// Rate limiting, server errors and transport failures are transient.
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => {
            api_err.code == 429 || (api_err.code >= 500 && api_err.code < 600)
        }
        kube::Error::Service(_) => true,
        _ => false,
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
