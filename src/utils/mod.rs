//! Utility modules for the holder risk engine
//!
//! Reusable helpers shared across the gateway and orchestrator layers.

pub mod retry;

pub use retry::{call_with_retry, RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS};
