//! Integration tests for request and configuration validation

use holder_risk::security::{
    sanitize_for_logging, validate_address, validate_gateway_url, validate_range,
    validate_trace_depth, MAX_TRACE_DEPTH,
};
use holder_risk::Chain;

#[test]
fn test_address_validation_per_chain() {
    let evm = "0x52908400098527886E0F7030069857D2E4169EE7";
    for chain in [Chain::Ethereum, Chain::Base, Chain::Bsc, Chain::Arbitrum] {
        assert!(validate_address(evm, chain).is_ok(), "{:?}", chain);
    }
    // EVM shape is not a Solana address
    assert!(validate_address(evm, Chain::Solana).is_err());

    assert!(validate_address("11111111111111111111111111111111", Chain::Solana).is_ok());
    assert!(validate_address("So11111111111111111111111111111111111111112", Chain::Solana).is_ok());

    // Too short, bad alphabet, empty
    assert!(validate_address("too_short", Chain::Solana).is_err());
    assert!(validate_address("0x0OOOOOOOOOOOOOOOOOOOOOOOOOOOOOOOOOOOOOOO", Chain::Ethereum).is_err());
    assert!(validate_address("", Chain::Ethereum).is_err());
}

#[test]
fn test_trace_depth_bounds() {
    assert!(validate_trace_depth(0).is_err());
    for depth in 1..=MAX_TRACE_DEPTH {
        assert_eq!(validate_trace_depth(depth).unwrap(), depth);
    }
    assert!(validate_trace_depth(MAX_TRACE_DEPTH + 1).is_err());
}

#[test]
fn test_gateway_url_validation() {
    assert!(validate_gateway_url("https://gateway.example.com/v1").is_ok());
    assert!(validate_gateway_url("http://localhost:8080").is_ok());
    assert!(validate_gateway_url("http://127.0.0.1:8080").is_ok());

    // Plain HTTP to a remote host is rejected
    assert!(validate_gateway_url("http://gateway.example.com").is_err());
    assert!(validate_gateway_url("not a url").is_err());
    assert!(validate_gateway_url("").is_err());
}

#[test]
fn test_range_validation() {
    assert!(validate_range("tolerance", 0.5, 0.0, 5.0).is_ok());
    assert!(validate_range("tolerance", 5.0, 0.0, 5.0).is_ok());
    assert!(validate_range("tolerance", -0.1, 0.0, 5.0).is_err());
    assert!(validate_range("tolerance", f64::NAN, 0.0, 5.0).is_err());
    assert!(validate_range("tolerance", f64::INFINITY, 0.0, 5.0).is_err());
}

#[test]
fn test_api_keys_never_reach_logs() {
    let key = "a".repeat(64);
    let line = format!("GET /holders?api_key={} failed", key);
    let sanitized = sanitize_for_logging(&line);
    assert!(!sanitized.contains(&key));

    let bearer = sanitize_for_logging("Authorization: Bearer abc.def-123");
    assert!(bearer.contains("Bearer [REDACTED]"));

    // Addresses are short enough to survive
    let address = "0x52908400098527886E0F7030069857D2E4169EE7";
    assert_eq!(sanitize_for_logging(address), address);
}
