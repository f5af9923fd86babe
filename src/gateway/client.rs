//! Resilient wrapper around a [`ChainDataGateway`]
//!
//! Every call gets a per-attempt timeout and bounded retry. Address
//! classifications and funding sources are cached with a short TTL and shared
//! across all traces of a run; they are immutable on-chain facts, so
//! concurrent writers racing on one key are harmless.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    AddressClassification, ChainDataGateway, FundingSource, HolderBalance, TokenInfo, WalletAge,
};
use crate::error::{HolderRiskError, Result};
use crate::observability::EngineMetrics;
use crate::types::{AddressType, Chain};
use crate::utils::retry::{call_with_retry, RetryPolicy};

/// TTL cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayCacheConfig {
    pub ttl_secs: u64,
    pub max_capacity: u64,
}

impl Default for GatewayCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_capacity: 10_000,
        }
    }
}

#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<dyn ChainDataGateway>,
    retry: RetryPolicy,
    classifications: Cache<String, AddressClassification>,
    funding: Cache<String, Arc<Vec<FundingSource>>>,
    metrics: Arc<EngineMetrics>,
}

fn cache_key(chain: Chain, address: &str) -> String {
    format!("{}:{}", chain, chain.normalize_address(address))
}

fn build_cache<V>(config: &GatewayCacheConfig) -> Cache<String, V>
where
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(config.max_capacity)
        .time_to_live(Duration::from_secs(config.ttl_secs))
        .build()
}

impl GatewayClient {
    pub fn new(
        inner: Arc<dyn ChainDataGateway>,
        retry: RetryPolicy,
        cache: &GatewayCacheConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        debug!(
            ttl_secs = cache.ttl_secs,
            max_capacity = cache.max_capacity,
            "Initialized gateway cache"
        );

        Self {
            inner,
            retry,
            classifications: build_cache(cache),
            funding: build_cache(cache),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Holder snapshot; never cached so every run ranks a fresh list.
    /// Addresses come back in canonical form for `chain`.
    pub async fn holders(&self, token: &str, chain: Chain) -> Result<Vec<HolderBalance>> {
        let mut holders = self
            .call("get_holders", || self.inner.get_holders(token, chain))
            .await?;
        for holder in &mut holders {
            holder.address = chain.normalize_address(&holder.address);
        }
        Ok(holders)
    }

    pub async fn token_info(&self, token: &str, chain: Chain) -> Result<TokenInfo> {
        self.call("get_token_info", || self.inner.get_token_info(token, chain))
            .await
    }

    pub async fn wallet_age(&self, address: &str, chain: Chain) -> Result<WalletAge> {
        self.call("get_wallet_age", || self.inner.get_wallet_age(address, chain))
            .await
    }

    /// Up to `limit` earliest inbound funding transfers, oldest first.
    ///
    /// `force_refresh` skips the cache read; the fresh answer is still cached.
    pub async fn funding_sources(
        &self,
        address: &str,
        chain: Chain,
        limit: usize,
        force_refresh: bool,
    ) -> Result<Vec<FundingSource>> {
        let key = format!("{}:{}", cache_key(chain, address), limit);

        if !force_refresh {
            if let Some(hit) = self.funding.get(&key).await {
                self.metrics.cache_hit("funding");
                return Ok(hit.as_ref().clone());
            }
        }

        let mut sources = self
            .call("get_funding_sources", || {
                self.inner.get_funding_sources(address, chain, limit)
            })
            .await?;
        sources.sort_by_key(|s| s.timestamp);
        sources.truncate(limit);
        for source in &mut sources {
            source.sender = chain.normalize_address(&source.sender);
        }

        for source in &sources {
            if source.sender_type != AddressType::Unknown {
                self.remember_classification(
                    &source.sender,
                    chain,
                    AddressClassification {
                        address_type: source.sender_type,
                        name: None,
                    },
                )
                .await;
            }
        }

        self.funding.insert(key, Arc::new(sources.clone())).await;
        Ok(sources)
    }

    pub async fn classify(
        &self,
        address: &str,
        chain: Chain,
        force_refresh: bool,
    ) -> Result<AddressClassification> {
        let key = cache_key(chain, address);

        if !force_refresh {
            if let Some(hit) = self.classifications.get(&key).await {
                self.metrics.cache_hit("classification");
                return Ok(hit);
            }
        }

        let class = self
            .call("classify_address", || {
                self.inner.classify_address(address, chain)
            })
            .await?;
        self.classifications.insert(key, class.clone()).await;
        Ok(class)
    }

    /// Seed the classification cache with a type learned elsewhere.
    ///
    /// An existing entry with a name is kept.
    pub async fn remember_classification(
        &self,
        address: &str,
        chain: Chain,
        class: AddressClassification,
    ) {
        let key = cache_key(chain, address);
        if let Some(existing) = self.classifications.get(&key).await {
            if existing.name.is_some() {
                return;
            }
        }
        self.classifications.insert(key, class).await;
    }

    async fn call<F, Fut, T>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        self.metrics.gateway_call(op);
        call_with_retry(&self.retry, op, f).await.map_err(|e| {
            warn!(op, error = %e, "Gateway call failed after retries");
            self.metrics.gateway_failure(op);
            HolderRiskError::gateway(op, e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fixture::{evm_address, FixtureGateway, FixtureOp};
    use chrono::{TimeZone, Utc};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            timeout_ms: 200,
            max_retries: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
        }
    }

    fn client(fixture: Arc<FixtureGateway>) -> GatewayClient {
        GatewayClient::new(
            fixture,
            fast_retry(),
            &GatewayCacheConfig::default(),
            Arc::new(EngineMetrics::default()),
        )
    }

    #[tokio::test]
    async fn test_classification_is_cached() {
        let fixture = Arc::new(FixtureGateway::new());
        let addr = evm_address(7);
        fixture.set_classification(&addr, AddressType::Exchange, Some("Binance"));
        let client = client(fixture.clone());

        let first = client.classify(&addr, Chain::Ethereum, false).await.unwrap();
        let second = client.classify(&addr, Chain::Ethereum, false).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fixture.call_count_for(FixtureOp::Classify, &addr), 1);

        client.classify(&addr, Chain::Ethereum, true).await.unwrap();
        assert_eq!(fixture.call_count_for(FixtureOp::Classify, &addr), 2);
    }

    #[tokio::test]
    async fn test_cache_is_keyed_by_chain() {
        let fixture = Arc::new(FixtureGateway::new());
        let addr = evm_address(8);
        let client = client(fixture.clone());

        client.classify(&addr, Chain::Ethereum, false).await.unwrap();
        client.classify(&addr, Chain::Bsc, false).await.unwrap();
        assert_eq!(fixture.call_count_for(FixtureOp::Classify, &addr), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let fixture = Arc::new(FixtureGateway::new());
        let addr = evm_address(9);
        fixture.fail_times(FixtureOp::WalletAge, &addr, 2);
        let client = client(fixture.clone());

        assert!(client.wallet_age(&addr, Chain::Ethereum).await.is_ok());
        assert_eq!(fixture.call_count_for(FixtureOp::WalletAge, &addr), 3);
    }

    #[tokio::test]
    async fn test_persistent_failure_maps_to_gateway_unavailable() {
        let fixture = Arc::new(FixtureGateway::new());
        let token = evm_address(1);
        fixture.fail(FixtureOp::Holders, &token);
        let client = client(fixture.clone());

        let err = client.holders(&token, Chain::Ethereum).await.unwrap_err();
        assert!(matches!(
            err,
            HolderRiskError::GatewayUnavailable { op: "get_holders", .. }
        ));
        assert_eq!(fixture.call_count_for(FixtureOp::Holders, &token), 3);
    }

    #[tokio::test]
    async fn test_funding_sources_seed_classification_cache() {
        let fixture = Arc::new(FixtureGateway::new());
        let wallet = evm_address(10);
        let funder = evm_address(11);
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        fixture.add_funding(&wallet, &funder, at, AddressType::Dex, None);
        let client = client(fixture.clone());

        let sources = client
            .funding_sources(&wallet, Chain::Base, 1, false)
            .await
            .unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].sender, funder);

        let class = client.classify(&funder, Chain::Base, false).await.unwrap();
        assert_eq!(class.address_type, AddressType::Dex);
        assert_eq!(fixture.call_count_for(FixtureOp::Classify, &funder), 0);

        client
            .funding_sources(&wallet, Chain::Base, 1, false)
            .await
            .unwrap();
        assert_eq!(fixture.call_count_for(FixtureOp::FundingSource, &wallet), 1);
    }

    #[tokio::test]
    async fn test_evm_addresses_come_back_lowercased() {
        let fixture = Arc::new(FixtureGateway::new());
        let token = evm_address(12);
        let wallet = "0x00000000000000000000000000000000000000AB";
        fixture.set_holders(
            &token,
            vec![HolderBalance {
                address: wallet.to_string(),
                balance: 1.0,
                percentage: 1.0,
                first_acquired_at: None,
            }],
        );
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        fixture.add_funding(&evm_address(0xab), "0x00000000000000000000000000000000000000CD", at, AddressType::Unknown, None);
        let client = client(fixture.clone());

        let holders = client.holders(&token, Chain::Ethereum).await.unwrap();
        assert_eq!(holders[0].address, wallet.to_ascii_lowercase());

        let sources = client
            .funding_sources(&evm_address(0xab), Chain::Ethereum, 1, false)
            .await
            .unwrap();
        assert_eq!(sources[0].sender, evm_address(0xcd));
    }
}
