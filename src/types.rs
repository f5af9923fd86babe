//! Core types shared by the gateway, analysis and storage layers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Bsc,
    Polygon,
    Arbitrum,
    Base,
    Solana,
}

impl Chain {
    /// EVM-style chains use 0x-prefixed hex addresses
    pub fn is_evm(&self) -> bool {
        !matches!(self, Chain::Solana)
    }

    /// Canonical form of an address on this chain. EVM hex is
    /// case-insensitive and lowercased; Solana base58 is case-sensitive and
    /// kept as is.
    pub fn normalize_address(&self, address: &str) -> String {
        let trimmed = address.trim();
        if self.is_evm() {
            trimmed.to_ascii_lowercase()
        } else {
            trimmed.to_string()
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Bsc => "bsc",
            Chain::Polygon => "polygon",
            Chain::Arbitrum => "arbitrum",
            Chain::Base => "base",
            Chain::Solana => "solana",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "bsc" | "bnb" => Ok(Chain::Bsc),
            "polygon" | "matic" => Ok(Chain::Polygon),
            "arbitrum" | "arb" => Ok(Chain::Arbitrum),
            "base" => Ok(Chain::Base),
            "solana" | "sol" => Ok(Chain::Solana),
            other => Err(format!("Unsupported chain: {}", other)),
        }
    }
}

/// Heuristic classification of an address.
///
/// Closed set: anything the gateway cannot place lands in `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Exchange,
    Dex,
    Mixer,
    Contract,
    #[default]
    #[serde(other)]
    Unknown,
}

impl AddressType {
    /// High-liquidity hubs beyond which provenance is not attributable
    pub fn is_hub(&self) -> bool {
        matches!(self, AddressType::Exchange | AddressType::Dex)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::Exchange => "exchange",
            AddressType::Dex => "dex",
            AddressType::Mixer => "mixer",
            AddressType::Contract => "contract",
            AddressType::Unknown => "unknown",
        }
    }

    /// Lenient parse for gateway payloads; unrecognised labels map to `Unknown`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "exchange" | "cex" => AddressType::Exchange,
            "dex" | "amm" | "pool" => AddressType::Dex,
            "mixer" | "tumbler" => AddressType::Mixer,
            "contract" => AddressType::Contract,
            _ => AddressType::Unknown,
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a token under review
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenKey {
    pub address: String,
    pub chain: Chain,
}

impl TokenKey {
    pub fn new(address: impl Into<String>, chain: Chain) -> Self {
        Self {
            address: chain.normalize_address(&address.into()),
            chain,
        }
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.address)
    }
}
