//! Error taxonomy for the holder risk engine
//!
//! Root-level failures abort a run and surface as one of these variants.
//! Branch-level failures inside a funding trace never reach the caller as an
//! error; they are recorded as flags on the affected node instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HolderRiskError {
    /// Network failure or timeout after all retries were spent
    #[error("Chain data gateway unavailable during {op}: {detail}")]
    GatewayUnavailable { op: &'static str, detail: String },

    /// Bad address, chain or depth; rejected before any work starts
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A branch beyond the root could not be fetched. Never returned from a
    /// trace; it becomes the description of a `TraceTruncated` flag.
    #[error("Partial trace failure at {address}: {detail}")]
    PartialTraceFailure { address: String, detail: String },

    /// Malformed snapshot (negative balances, NaN percentages, ...)
    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("No analysis found for {0}")]
    AnalysisNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl HolderRiskError {
    /// Only transport-level failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, HolderRiskError::GatewayUnavailable { .. })
    }

    pub(crate) fn gateway(op: &'static str, err: anyhow::Error) -> Self {
        HolderRiskError::GatewayUnavailable {
            op,
            detail: format!("{:#}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, HolderRiskError>;
