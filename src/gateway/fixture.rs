//! In-memory gateway for tests and offline runs
//!
//! Data is keyed by address only (chain is ignored). Failures can be injected
//! per operation and address, either permanently or for the next `n` calls,
//! and every call is counted so tests can assert on caching and retry.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{
    AddressClassification, ChainDataGateway, FundingSource, HolderBalance, TokenInfo, WalletAge,
};
use crate::types::{AddressType, Chain};

/// Deterministic, well-formed EVM address for fixtures
pub fn evm_address(n: u64) -> String {
    format!("0x{:040x}", n)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixtureOp {
    Holders,
    FundingSource,
    WalletAge,
    Classify,
    TokenInfo,
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Always,
    Times(usize),
}

#[derive(Default)]
pub struct FixtureGateway {
    holders: DashMap<String, Vec<HolderBalance>>,
    funding: DashMap<String, Vec<FundingSource>>,
    ages: DashMap<String, WalletAge>,
    classifications: DashMap<String, AddressClassification>,
    token_info: DashMap<String, TokenInfo>,
    failures: DashMap<(FixtureOp, String), Failure>,
    calls: DashMap<(FixtureOp, String), u64>,
    latency_ms: AtomicU64,
    active: AtomicU64,
    max_active: AtomicU64,
}

/// Releases one in-flight slot, also when the caller drops the future
struct InFlight<'a>(&'a AtomicU64);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FixtureGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_holders(&self, token: &str, holders: Vec<HolderBalance>) {
        self.holders.insert(token.to_string(), holders);
    }

    /// Append one inbound funding transfer into `wallet`
    pub fn add_funding(
        &self,
        wallet: &str,
        sender: &str,
        timestamp: DateTime<Utc>,
        sender_type: AddressType,
        amount: Option<f64>,
    ) {
        let mut entry = self.funding.entry(wallet.to_string()).or_default();
        entry.push(FundingSource {
            sender: sender.to_string(),
            timestamp,
            sender_type,
            amount,
        });
        entry.sort_by_key(|s| s.timestamp);
    }

    pub fn set_wallet_age(&self, wallet: &str, age_in_days: u32, tx_count: Option<u64>) {
        self.ages.insert(
            wallet.to_string(),
            WalletAge {
                age_in_days,
                first_tx_date: None,
                tx_count,
            },
        );
    }

    pub fn set_wallet_age_full(&self, wallet: &str, age: WalletAge) {
        self.ages.insert(wallet.to_string(), age);
    }

    pub fn set_classification(&self, address: &str, address_type: AddressType, name: Option<&str>) {
        self.classifications.insert(
            address.to_string(),
            AddressClassification {
                address_type,
                name: name.map(str::to_string),
            },
        );
    }

    pub fn set_token_info(&self, token: &str, info: TokenInfo) {
        self.token_info.insert(token.to_string(), info);
    }

    /// Every call of `op` for `address` fails until cleared
    pub fn fail(&self, op: FixtureOp, address: &str) {
        self.failures
            .insert((op, address.to_string()), Failure::Always);
    }

    /// The next `times` calls of `op` for `address` fail
    pub fn fail_times(&self, op: FixtureOp, address: &str, times: usize) {
        self.failures
            .insert((op, address.to_string()), Failure::Times(times));
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Artificial delay applied to every call
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn call_count(&self, op: FixtureOp) -> u64 {
        self.calls
            .iter()
            .filter(|entry| entry.key().0 == op)
            .map(|entry| *entry.value())
            .sum()
    }

    /// Highest number of calls that were in flight at the same time
    pub fn max_concurrent_calls(&self) -> u64 {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn call_count_for(&self, op: FixtureOp, address: &str) -> u64 {
        self.calls
            .get(&(op, address.to_string()))
            .map(|count| *count)
            .unwrap_or(0)
    }

    async fn enter(&self, op: FixtureOp, address: &str) -> Result<()> {
        let key = (op, address.to_string());
        *self.calls.entry(key.clone()).or_insert(0) += 1;

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _slot = InFlight(&self.active);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let injected = match self.failures.get_mut(&key) {
            Some(mut failure) => match *failure {
                Failure::Always => true,
                Failure::Times(0) => false,
                Failure::Times(n) => {
                    *failure = Failure::Times(n - 1);
                    true
                }
            },
            None => false,
        };

        if injected {
            return Err(anyhow!("injected {:?} failure for {}", op, address));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainDataGateway for FixtureGateway {
    async fn get_holders(&self, token: &str, _chain: Chain) -> Result<Vec<HolderBalance>> {
        self.enter(FixtureOp::Holders, token).await?;
        Ok(self
            .holders
            .get(token)
            .map(|h| h.clone())
            .unwrap_or_default())
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

    async fn get_funding_sources(
        &self,
        address: &str,
        _chain: Chain,
        limit: usize,
    ) -> Result<Vec<FundingSource>> {
        self.enter(FixtureOp::FundingSource, address).await?;
        Ok(self
            .funding
            .get(address)
            .map(|sources| sources.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_wallet_age(&self, address: &str, _chain: Chain) -> Result<WalletAge> {
        self.enter(FixtureOp::WalletAge, address).await?;
        Ok(self.ages.get(address).map(|a| a.clone()).unwrap_or(WalletAge {
            age_in_days: 0,
            first_tx_date: None,
            tx_count: None,
        }))
    }

    async fn classify_address(
        &self,
        address: &str,
        _chain: Chain,
    ) -> Result<AddressClassification> {
        self.enter(FixtureOp::Classify, address).await?;
        Ok(self
            .classifications
            .get(address)
            .map(|c| c.clone())
            .unwrap_or_else(AddressClassification::unknown))
    }

    async fn get_token_info(&self, token: &str, _chain: Chain) -> Result<TokenInfo> {
        self.enter(FixtureOp::TokenInfo, token).await?;
        Ok(self
            .token_info
            .get(token)
            .map(|i| i.clone())
            .unwrap_or_default())
    }
}
