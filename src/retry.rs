//! Retry logic with exponential backoff
//!
//! This module provides configurable retry logic for transient part-level
//! failures. It implements exponential backoff with optional jitter to
//! prevent thundering herd, and exposes the injectable [`RetryPolicy`] seam
//! the transfer pipelines wrap every provider call in.

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) should
/// return `true`. Permanent failures (bad configuration, decryption failure,
/// closed queue) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Implementation of IsRetryable for our Error type
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Provider results need to be classified based on content;
            // common transient storage-gateway patterns are retried
            Error::Provider { message, .. } => {
                message.contains("timeout")
                    || message.contains("connection")
                    || message.contains("temporary")
                    || message.contains("429")
                    || message.contains("500")
                    || message.contains("502")
                    || message.contains("503")
            }
            // Coordination failures follow the same classification
            Error::Coordination(msg) => {
                msg.contains("timeout")
                    || msg.contains("connection")
                    || msg.contains("temporary")
                    || msg.contains("503")
            }
            // I/O errors can be retryable in some cases
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // A cancelled or poisoned transfer must not be retried
            Error::Cancelled | Error::QueueClosed => false,
            // Pipeline, target, and archive errors are permanent
            Error::Download(_) | Error::Upload(_) | Error::Target(_) | Error::Zip(_) => false,
            // Config errors are permanent
            Error::Config { .. } => false,
            // Serialization errors are permanent
            Error::Serialization(_) => false,
            // Unknown errors - be conservative and don't retry
            Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `operation` - Async closure that returns Result<T, E> where E implements IsRetryable
///
/// # Returns
///
/// Returns the successful result or the last error after all retry attempts
/// are exhausted.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                // Exponential backoff, capped at max_delay
                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

/// Boxed future returned by retried operations and [`RetryPolicy::execute`].
pub type RetryFuture<'a, T> = Pin<Box<dyn Future<Output = crate::error::Result<T>> + Send + 'a>>;

/// Operation factory handed to a [`RetryPolicy`]: each invocation produces a
/// fresh attempt yielding the operation's payload bytes (empty for operations
/// that carry none, e.g. uploads).
pub type RetryOperation<'a> = Box<dyn FnMut() -> RetryFuture<'a, Vec<u8>> + Send + 'a>;

/// Injectable retry policy wrapped around every provider and coordination call.
///
/// The pipelines are agnostic to the backoff strategy; they only hand the
/// policy a factory producing fresh attempts. The crate ships
/// [`BackoffRetryPolicy`] as the default implementation.
pub trait RetryPolicy: Send + Sync {
    /// Execute `operation` until it succeeds or the policy gives up,
    /// returning the final outcome.
    fn execute<'a>(&'a self, operation: RetryOperation<'a>) -> RetryFuture<'a, Vec<u8>>;
}

/// Default [`RetryPolicy`]: exponential backoff with jitter, driven by a
/// [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct BackoffRetryPolicy {
    config: RetryConfig,
}

impl BackoffRetryPolicy {
    /// Create a policy from the given retry configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl RetryPolicy for BackoffRetryPolicy {
    fn execute<'a>(&'a self, mut operation: RetryOperation<'a>) -> RetryFuture<'a, Vec<u8>> {
        Box::pin(async move { with_retry(&self.config, || operation()).await })
    }
}
