//! Durable store for analyses and per-holder wallet traces
//!
//! One `HolderAnalysis` row per token, N `WalletTrace` rows per analysis.
//! A completed run replaces the row and all of its traces in one step; a
//! failed run only touches status and error.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::analysis::{
    ClusterSet, ClusterSummary, ConcentrationMetrics, FlagCategory, FundingChainNode, GraphSummary,
    GraphView, ResultMap, RiskFlag, RiskScores, TemporalMetrics,
};
use crate::types::{AddressType, TokenKey};

pub use memory::InMemoryAnalysisStore;
pub use sqlite::SqliteAnalysisStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::NotStarted => "NOT_STARTED",
            AnalysisStatus::Running => "RUNNING",
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NOT_STARTED" => Ok(AnalysisStatus::NotStarted),
            "RUNNING" => Ok(AnalysisStatus::Running),
            "COMPLETED" => Ok(AnalysisStatus::Completed),
            "FAILED" => Ok(AnalysisStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown analysis status: {}", other)),
        }
    }
}

/// Every metric of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetrics {
    pub concentration: ConcentrationMetrics,
    pub scores: RiskScores,
    pub temporal: TemporalMetrics,
    pub cluster_summary: ClusterSummary,
    pub graph_summary: GraphSummary,
    pub clusters: ClusterSet,
    pub graph: GraphView,
    pub results: ResultMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderAnalysis {
    pub id: Uuid,
    pub token: TokenKey,
    pub status: AnalysisStatus,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Last completed metrics; never written by a failed attempt
    pub metrics: Option<AnalysisMetrics>,
}

impl HolderAnalysis {
    /// Placeholder for a token that was never analyzed
    pub fn not_started(token: TokenKey) -> Self {
        Self {
            id: Uuid::nil(),
            token,
            status: AnalysisStatus::NotStarted,
            analyzed_at: None,
            last_error: None,
            metrics: None,
        }
    }
}

/// One analyzed top holder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTrace {
    pub analysis_id: Uuid,
    pub address: String,
    pub percentage: f64,
    pub rank: usize,
    pub age_days: Option<u32>,
    pub first_tx_date: Option<DateTime<Utc>>,
    pub wallet_type: AddressType,
    pub cluster_id: Option<u32>,
    /// `None` until traced, or when the root lookup failed
    pub funding_chain: Option<FundingChainNode>,
    pub funding_depth: u8,
    pub primary_funding_source: Option<String>,
    pub primary_funding_type: Option<AddressType>,
    pub risk_flags: Vec<RiskFlag>,
    pub has_critical_flag: bool,
    pub risk_flag_count: usize,
    pub is_fresh: bool,
}

impl WalletTrace {
    pub fn new(analysis_id: Uuid, address: impl Into<String>, percentage: f64, rank: usize) -> Self {
        Self {
            analysis_id,
            address: address.into(),
            percentage,
            rank,
            age_days: None,
            first_tx_date: None,
            wallet_type: AddressType::Unknown,
            cluster_id: None,
            funding_chain: None,
            funding_depth: 0,
            primary_funding_source: None,
            primary_funding_type: None,
            risk_flags: Vec::new(),
            has_critical_flag: false,
            risk_flag_count: 0,
            is_fresh: false,
        }
    }

    /// Replace the flag list, keeping count and critical marker in sync
    pub fn set_flags(&mut self, flags: Vec<RiskFlag>) {
        self.has_critical_flag = flags.iter().any(RiskFlag::is_critical);
        self.risk_flag_count = flags.len();
        self.risk_flags = flags;
    }

    pub fn push_flag(&mut self, flag: RiskFlag) {
        let mut flags = std::mem::take(&mut self.risk_flags);
        flags.push(flag);
        self.set_flags(flags);
    }

    /// Install a traced chain and the funding fields derived from it
    pub fn set_funding_chain(&mut self, chain: Option<FundingChainNode>) {
        self.funding_depth = chain.as_ref().map(|c| c.max_depth()).unwrap_or(0);
        self.primary_funding_source = chain
            .as_ref()
            .and_then(|c| c.primary_source())
            .map(|s| s.address.clone());
        self.primary_funding_type = chain
            .as_ref()
            .and_then(|c| c.primary_source())
            .map(|s| s.address_type);
        self.funding_chain = chain;
    }

    /// Swap funding-derived flags for `flags`, keeping wallet, cluster and
    /// timing flags
    pub fn replace_funding_flags(&mut self, flags: Vec<RiskFlag>) {
        let mut kept: Vec<RiskFlag> = self
            .risk_flags
            .iter()
            .filter(|f| f.kind.category() != FlagCategory::Funding)
            .cloned()
            .collect();
        kept.extend(flags);
        self.set_flags(kept);
    }

    /// Take the funding fields and funding flags of `update`. Rank, age,
    /// cluster membership and the other flags stay as this row has them.
    pub fn merge_funding(&mut self, update: &WalletTrace) {
        self.funding_chain = update.funding_chain.clone();
        self.funding_depth = update.funding_depth;
        self.primary_funding_source = update.primary_funding_source.clone();
        self.primary_funding_type = update.primary_funding_type;
        self.replace_funding_flags(
            update
                .risk_flags
                .iter()
                .filter(|f| f.kind.category() == FlagCategory::Funding)
                .cloned()
                .collect(),
        );
    }

    pub fn is_suspicious(&self) -> bool {
        self.has_critical_flag || self.risk_flag_count >= 2
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceFilter {
    #[default]
    All,
    /// Critical flag or at least two flags
    Suspicious,
    Fresh,
    Clustered,
}

impl TraceFilter {
    pub fn matches(&self, trace: &WalletTrace) -> bool {
        match self {
            TraceFilter::All => true,
            TraceFilter::Suspicious => trace.is_suspicious(),
            TraceFilter::Fresh => trace.is_fresh,
            TraceFilter::Clustered => trace.cluster_id.is_some(),
        }
    }
}

impl FromStr for TraceFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(TraceFilter::All),
            "suspicious" => Ok(TraceFilter::Suspicious),
            "fresh" => Ok(TraceFilter::Fresh),
            "clustered" => Ok(TraceFilter::Clustered),
            other => Err(anyhow::anyhow!("Unknown trace filter: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceQuery {
    pub filter: TraceFilter,
    pub offset: usize,
    pub limit: usize,
}

impl Default for TraceQuery {
    fn default() -> Self {
        Self {
            filter: TraceFilter::All,
            offset: 0,
            limit: 50,
        }
    }
}

impl TraceQuery {
    pub fn page(filter: TraceFilter, page: usize, page_size: usize) -> Self {
        Self {
            filter,
            offset: page.saturating_sub(1) * page_size,
            limit: page_size,
        }
    }
}

/// One page of traces in rank order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TracePage {
    pub traces: Vec<WalletTrace>,
    /// Matching rows before pagination
    pub total: usize,
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn get_analysis(&self, token: &TokenKey) -> Result<Option<HolderAnalysis>>;

    /// Set RUNNING, creating the row on first trigger. Metrics of the last
    /// completed run are kept.
    async fn mark_running(&self, token: &TokenKey) -> Result<HolderAnalysis>;

    /// Set FAILED with `error`; nothing else changes
    async fn mark_failed(&self, token: &TokenKey, error: &str) -> Result<()>;

    /// Atomically replace the analysis row and all of its traces
    async fn save_completed(&self, analysis: &HolderAnalysis, traces: &[WalletTrace])
        -> Result<()>;

    async fn list_traces(&self, analysis_id: Uuid, query: &TraceQuery) -> Result<TracePage>;

    async fn get_trace(&self, analysis_id: Uuid, address: &str) -> Result<Option<WalletTrace>>;

    /// Merge the funding fields (chain, depth, primary source, funding
    /// flags) of `trace` into the current row; see
    /// [`WalletTrace::merge_funding`]. Returns false if the row does not
    /// exist.
    async fn update_trace_funding(&self, trace: &WalletTrace) -> Result<bool>;
}
