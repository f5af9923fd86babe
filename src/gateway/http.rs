//! REST explorer client implementing [`ChainDataGateway`]
//!
//! Routes (relative to `base_url`):
//! - `GET /v1/{chain}/tokens/{addr}/holders`
//! - `GET /v1/{chain}/tokens/{addr}/info`
//! - `GET /v1/{chain}/addresses/{addr}/funding?limit=n`
//! - `GET /v1/{chain}/addresses/{addr}/age`
//! - `GET /v1/{chain}/addresses/{addr}/classification`
//!
//! Requests are paced by a `governor` quota shared by all callers.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{
    AddressClassification, ChainDataGateway, FundingSource, HolderBalance, TokenInfo, WalletAge,
};
use crate::security::{sanitize_for_logging, validate_gateway_url};
use crate::types::Chain;

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    /// Sent as `X-API-Key` when set
    pub api_key: Option<String>,
    pub requests_per_second: u32,
    /// Transport-level timeout; the retry layer applies its own per attempt
    pub request_timeout_ms: u64,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            requests_per_second: 10,
            request_timeout_ms: 10_000,
        }
    }
}

pub struct HttpChainGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    limiter: Arc<DirectLimiter>,
}

impl HttpChainGateway {
    pub fn new(config: &HttpGatewayConfig) -> Result<Self> {
        let base_url = validate_gateway_url(&config.base_url)?
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN),
        );

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    fn endpoint(&self, chain: Chain, kind: &str, address: &str, resource: &str) -> String {
        format!(
            "{}/v1/{}/{}/{}/{}",
            self.base_url, chain, kind, address, resource
        )
    }

    /// GET `url` and decode JSON; a 404 yields `None`
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        self.limiter.until_ready().await;
        debug!(url = %sanitize_for_logging(url), "Gateway request");

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", sanitize_for_logging(url)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "Gateway returned {} for {}",
                response.status(),
                sanitize_for_logging(url)
            ));
        }

        let body = response
            .json::<T>()
            .await
            .context("Failed to decode gateway response")?;
        Ok(Some(body))
    }
}

#[async_trait]
impl ChainDataGateway for HttpChainGateway {
    #[instrument(skip(self))]
    async fn get_holders(&self, token: &str, chain: Chain) -> Result<Vec<HolderBalance>> {
        let url = self.endpoint(chain, "tokens", token, "holders");
        self.get_json(&url)
            .await?
            .ok_or_else(|| anyhow!("Token {} not found on {}", token, chain))
    }

    async fn get_funding_source(
        &self,
        address: &str,
        chain: Chain,
    ) -> Result<Option<FundingSource>> {
        Ok(self
            .get_funding_sources(address, chain, 1)
            .await?
            .into_iter()
            .next())
    }

    #[instrument(skip(self))]
    async fn get_funding_sources(
        &self,
        address: &str,
        chain: Chain,
        limit: usize,
    ) -> Result<Vec<FundingSource>> {
        let url = format!(
            "{}?limit={}",
            self.endpoint(chain, "addresses", address, "funding"),
            limit
        );
        Ok(self.get_json(&url).await?.unwrap_or_default())
    }

    async fn get_wallet_age(&self, address: &str, chain: Chain) -> Result<WalletAge> {
        let url = self.endpoint(chain, "addresses", address, "age");
        self.get_json(&url)
            .await?
            .ok_or_else(|| anyhow!("No age data for {} on {}", address, chain))
    }

    async fn classify_address(
        &self,
        address: &str,
        chain: Chain,
    ) -> Result<AddressClassification> {
        let url = self.endpoint(chain, "addresses", address, "classification");
        Ok(self
            .get_json(&url)
            .await?
            .unwrap_or_else(AddressClassification::unknown))
    }

    async fn get_token_info(&self, token: &str, chain: Chain) -> Result<TokenInfo> {
        let url = self.endpoint(chain, "tokens", token, "info");
        Ok(self.get_json(&url).await?.unwrap_or_default())
    }
}
