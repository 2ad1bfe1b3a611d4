// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retry logic for LLM calls with exponential backoff
//!
//! Only transient transport failures are retried; client errors surface
//! immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::error::{LlmError, Result, TangleError};

/// Determine if an error is retryable
pub fn is_retryable(error: &TangleError) -> bool {
    match error {
        TangleError::Llm(llm_error) => match llm_error {
            LlmError::Network(_) => true,
            LlmError::RateLimited(_) => true,
            LlmError::Timeout => true,
            LlmError::StreamError(_) => true,
            LlmError::ServerError { status, .. } => *status >= 500 && *status < 600,

            LlmError::AuthenticationFailed => false,
            LlmError::ModelNotFound(_) => false,
            LlmError::UnsupportedParameter { .. } => false,
            LlmError::InvalidResponse(_) => false,
        },
        _ => false,
    }
}

/// Delay for a given attempt: exponential backoff with jitter, capped.
fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponential_ms = config.base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    let capped_ms = exponential_ms.min(config.max_delay_ms);

    let jitter_range = (capped_ms as f64 * config.jitter) as i64;
    let jitter_ms = if jitter_range > 0 {
        let mut rng = rand::rng();
        rng.random_range(-jitter_range..=jitter_range)
    } else {
        0
    };

    let final_ms = (capped_ms as i64 + jitter_ms).max(0) as u64;
    Duration::from_millis(final_ms)
}

/// Retry an async operation with exponential backoff.
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(
                        "{} succeeded after {} attempts",
                        operation_name,
                        attempt + 1
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if !is_retryable(&error) {
                    return Err(error);
                }
                if attempt >= config.max_retries {
                    tracing::warn!(
                        "{} exhausted all {} retries",
                        operation_name,
                        config.max_retries
                    );
                    return Err(error);
                }

                let delay = calculate_delay(config, attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:.1}s",
                    operation_name,
                    attempt + 1,
                    config.max_retries,
                    error,
                    delay.as_secs_f64()
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
