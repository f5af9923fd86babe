//! Chain Data Gateway
//!
//! The engine never talks to a chain directly. Holder lists, funding sources,
//! wallet ages and address classifications all come through the
//! [`ChainDataGateway`] trait, which is rate-limited and assumed unreliable.
//! [`GatewayClient`] wraps any implementation with timeouts, bounded retry
//! and a short-TTL cache.

pub mod client;
pub mod fixture;
pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AddressType, Chain};

pub use client::{GatewayCacheConfig, GatewayClient};
pub use fixture::FixtureGateway;
pub use http::{HttpChainGateway, HttpGatewayConfig};

/// One row of a token holder list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderBalance {
    pub address: String,
    pub balance: f64,
    /// Percentage of total supply (0-100)
    pub percentage: f64,
    /// First time this wallet received the token, when the explorer knows it
    #[serde(default)]
    pub first_acquired_at: Option<DateTime<Utc>>,
}

/// Inbound funding transfer into a wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingSource {
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sender_type: AddressType,
    /// Native amount transferred, when reported
    #[serde(default)]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAge {
    pub age_in_days: u32,
    pub first_tx_date: Option<DateTime<Utc>>,
    /// Lifetime transaction count, when reported
    #[serde(default)]
    pub tx_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressClassification {
    #[serde(rename = "type")]
    pub address_type: AddressType,
    #[serde(default)]
    pub name: Option<String>,
}

impl AddressClassification {
    pub fn unknown() -> Self {
        Self {
            address_type: AddressType::Unknown,
            name: None,
        }
    }
}

/// Launch metadata for a token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub created_at: Option<DateTime<Utc>>,
    pub creator: Option<String>,
}

/// External collaborator that serves on-chain and explorer data
#[async_trait]
pub trait ChainDataGateway: Send + Sync {
    /// Full holder list with balances for a token
    async fn get_holders(&self, token: &str, chain: Chain) -> Result<Vec<HolderBalance>>;

    /// Earliest/primary inbound funding transaction, `None` if the wallet
    /// has never been funded
    async fn get_funding_source(&self, address: &str, chain: Chain)
        -> Result<Option<FundingSource>>;

    /// Up to `limit` earliest inbound funding transactions, oldest first
    async fn get_funding_sources(
        &self,
        address: &str,
        chain: Chain,
        limit: usize,
    ) -> Result<Vec<FundingSource>> {
        let primary = self.get_funding_source(address, chain).await?;
        Ok(primary.into_iter().take(limit).collect())
    }

    async fn get_wallet_age(&self, address: &str, chain: Chain) -> Result<WalletAge>;

    async fn classify_address(&self, address: &str, chain: Chain)
        -> Result<AddressClassification>;

    /// Launch time and creator; gateways without this data return the default
    async fn get_token_info(&self, _token: &str, _chain: Chain) -> Result<TokenInfo> {
        Ok(TokenInfo::default())
    }
}
