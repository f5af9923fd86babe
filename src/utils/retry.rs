// =============================================================================
// utils/retry.rs
// =============================================================================
// call_with_retry - per-attempt timeout + exponential backoff + full jitter
// Every Chain Data Gateway call goes through this before it is treated as a
// failed lookup or a truncated branch.
// =============================================================================

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Default gateway timeout per attempt (ms)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
/// Retries after the first attempt
pub const DEFAULT_MAX_RETRIES: usize = 2;
/// Base backoff (ms)
const BACKOFF_BASE_MS: u64 = 50;
/// Maximum backoff cap (ms)
const BACKOFF_MAX_MS: u64 = 2000;

/// Timeout and retry budget for one external call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Timeout applied to every attempt
    pub timeout_ms: u64,
    /// Number of retries after the first attempt
    pub max_retries: usize,
    /// Base for the exponential backoff
    pub backoff_base_ms: u64,
    /// Cap for a single backoff sleep
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: BACKOFF_BASE_MS,
            backoff_max_ms: BACKOFF_MAX_MS,
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first one
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }
}

/// Call async closure `op` under `policy`.
///
/// # Example
/// ```no_run
/// use holder_risk::utils::retry::{call_with_retry, RetryPolicy};
///
/// async fn example() -> anyhow::Result<String> {
///     call_with_retry(&RetryPolicy::default(), "classify", || async {
///         Ok("exchange".to_string())
///     })
///     .await
/// }
/// ```
pub async fn call_with_retry<F, Fut, T>(policy: &RetryPolicy, op_name: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match timeout(Duration::from_millis(policy.timeout_ms), op()).await {
            Ok(res) => res,
            Err(_) => {
                if attempt >= max_attempts {
                    return Err(anyhow::anyhow!(
                        "{} timed out after {} attempts",
                        op_name,
                        max_attempts
                    ));
                }

                let backoff_ms = calculate_backoff_with_jitter(policy, attempt);
                tracing::debug!(
                    "{} timed out (attempt {}/{}). Retrying in {}ms...",
                    op_name,
                    attempt,
                    max_attempts,
                    backoff_ms
                );
                sleep(Duration::from_millis(backoff_ms)).await;
                continue;
            }
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(e);
                }

                let backoff_ms = calculate_backoff_with_jitter(policy, attempt);
                tracing::debug!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms...",
                    op_name,
                    attempt,
                    max_attempts,
                    e,
                    backoff_ms
                );
                sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}

/// Formula: random(0, min(max, base * 2^(attempt-1)))
fn calculate_backoff_with_jitter(policy: &RetryPolicy, attempt: usize) -> u64 {
    let mut rng = rand::thread_rng();

    let exp_backoff = policy
        .backoff_base_ms
        .saturating_mul(2_u64.saturating_pow((attempt.saturating_sub(1)) as u32));

    let capped_backoff = exp_backoff.min(policy.backoff_max_ms);

    rng.gen_range(0..=capped_backoff)
}
