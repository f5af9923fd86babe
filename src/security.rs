//! Input validation for trigger requests and configuration.
//!
//! Everything here runs before any gateway call is made:
//! - Address format per chain (EVM hex, Solana base58)
//! - Trace depth bounds
//! - Gateway URL validation with HTTPS enforcement
//! - Log sanitization for API keys

use anyhow::{anyhow, Result};
use url::Url;

use crate::types::Chain;

/// Hard cap on funding trace depth; bounds external-call fan-out
pub const MAX_TRACE_DEPTH: u8 = 6;

/// Validate an address for the given chain.
///
/// # Returns
/// * `Ok(())` if the address is well-formed for `chain`
/// * `Err` describing the problem otherwise
pub fn validate_address(address: &str, chain: Chain) -> Result<()> {
    if address.is_empty() {
        return Err(anyhow!("Address must not be empty"));
    }

    if chain.is_evm() {
        validate_evm_address(address)
    } else {
        validate_solana_address(address)
    }
}

fn validate_evm_address(address: &str) -> Result<()> {
    let body = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("EVM address must start with 0x: {}", address))?;

    if body.len() != 40 {
        return Err(anyhow!(
            "EVM address must have 40 hex digits, got {}",
            body.len()
        ));
    }

    hex::decode(body).map_err(|e| anyhow!("Invalid EVM address {}: {}", address, e))?;
    Ok(())
}

fn validate_solana_address(address: &str) -> Result<()> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| anyhow!("Invalid Solana address {}: {}", address, e))?;

    if bytes.len() != 32 {
        return Err(anyhow!(
            "Solana address must decode to 32 bytes, got {}",
            bytes.len()
        ));
    }
    Ok(())
}

/// Validate a requested trace depth (1..=6)
pub fn validate_trace_depth(depth: u8) -> Result<u8> {
    if depth == 0 || depth > MAX_TRACE_DEPTH {
        return Err(anyhow!(
            "Trace depth {} is out of valid range [1, {}]",
            depth,
            MAX_TRACE_DEPTH
        ));
    }
    Ok(depth)
}

/// Validate a gateway base URL.
///
/// HTTPS is required except for localhost.
pub fn validate_gateway_url(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str).map_err(|e| anyhow!("Invalid URL format: {}", e))?;

    let host = url.host_str().unwrap_or("");
    if url.scheme() != "https" && !host.contains("localhost") && !host.starts_with("127.0.0.1") {
        return Err(anyhow!("Gateway URL must use HTTPS for security"));
    }

    Ok(url.to_string())
}

/// Validate a value is within `[min, max]`
pub fn validate_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(anyhow!(
            "{} = {} is out of valid range [{}, {}]",
            name,
            value,
            min,
            max
        ));
    }
    Ok(())
}

/// Sanitize log output to prevent API key leakage.
pub fn sanitize_for_logging(input: &str) -> String {
    let patterns = [
        (r"[a-zA-Z0-9]{64,}", "[REDACTED-KEY]"),
        (r"Bearer [a-zA-Z0-9\-._~+/]+=*", "Bearer [REDACTED]"),
        (r"(?i)api[_-]?key[=:]\s*[a-zA-Z0-9\-._~+/]+=*", "api_key=[REDACTED]"),
    ];

    let mut output = input.to_string();
    for (pattern, replacement) in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            output = re.replace_all(&output, replacement).to_string();
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_evm_address() {
        assert!(validate_address("0x52908400098527886E0F7030069857D2E4169EE7", Chain::Ethereum).is_ok());
        assert!(validate_address("52908400098527886E0F7030069857D2E4169EE7", Chain::Ethereum).is_err());
        assert!(validate_address("0x1234", Chain::Bsc).is_err());
        assert!(validate_address("0xZZ908400098527886E0F7030069857D2E4169EE7", Chain::Base).is_err());
    }

    #[test]
    fn test_validate_solana_address() {
        assert!(validate_address("11111111111111111111111111111111", Chain::Solana).is_ok());
        assert!(validate_address("invalid_pubkey", Chain::Solana).is_err());
        assert!(validate_address("", Chain::Solana).is_err());
    }

    #[test]
    fn test_validate_trace_depth() {
        assert!(validate_trace_depth(0).is_err());
        assert_eq!(validate_trace_depth(4).unwrap(), 4);
        assert_eq!(validate_trace_depth(6).unwrap(), 6);
        assert!(validate_trace_depth(7).is_err());
    }

    #[test]
    fn test_validate_gateway_url() {
        assert!(validate_gateway_url("https://explorer.example.com/api").is_ok());
        assert!(validate_gateway_url("http://localhost:8080").is_ok());
        assert!(validate_gateway_url("http://explorer.example.com").is_err());
        assert!(validate_gateway_url("not a url").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("pct", 50.0, 0.0, 100.0).is_ok());
        assert!(validate_range("pct", -1.0, 0.0, 100.0).is_err());
        assert!(validate_range("pct", f64::NAN, 0.0, 100.0).is_err());
    }

    #[test]
    fn test_sanitize_for_logging() {
        let output = sanitize_for_logging("GET /holders?api_key=abc123secret Bearer tok456");
        assert!(!output.contains("abc123secret"));
        assert!(!output.contains("tok456"));
        assert!(output.contains("[REDACTED]"));
    }
}
