//! Data model shared by the analysis components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::types::AddressType;

/// One ranked holder from a single balance snapshot, enriched with age data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSnapshot {
    pub address: String,
    pub balance: f64,
    /// Percentage of total supply (0-100)
    pub percentage: f64,
    /// 1-based rank by balance, ties broken by address
    pub rank: usize,
    pub age_days: Option<u32>,
    pub first_tx_date: Option<DateTime<Utc>>,
    pub tx_count: Option<u64>,
    /// First time the wallet received the token
    pub first_acquired_at: Option<DateTime<Utc>>,
}

impl WalletSnapshot {
    pub fn new(address: impl Into<String>, balance: f64, percentage: f64, rank: usize) -> Self {
        Self {
            address: address.into(),
            balance,
            percentage,
            rank,
            age_days: None,
            first_tx_date: None,
            tx_count: None,
            first_acquired_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Which part of a wallet record a flag describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagCategory {
    /// Derived from the funding chain; replaced by a deep trace refresh
    Funding,
    Wallet,
    Cluster,
    Timing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagKind {
    Mixer,
    CreatorLinked,
    PreLaunchFunding,
    TraceTruncated,
    TraceUnavailable,
    FreshWallet,
    Clustered,
    SniperEntry,
}

impl FlagKind {
    pub fn severity(&self) -> Severity {
        match self {
            FlagKind::Mixer | FlagKind::CreatorLinked => Severity::Critical,
            FlagKind::PreLaunchFunding => Severity::High,
            FlagKind::TraceTruncated | FlagKind::Clustered | FlagKind::SniperEntry => {
                Severity::Medium
            }
            FlagKind::TraceUnavailable | FlagKind::FreshWallet => Severity::Low,
        }
    }

    pub fn category(&self) -> FlagCategory {
        match self {
            FlagKind::Mixer
            | FlagKind::CreatorLinked
            | FlagKind::PreLaunchFunding
            | FlagKind::TraceTruncated
            | FlagKind::TraceUnavailable => FlagCategory::Funding,
            FlagKind::FreshWallet => FlagCategory::Wallet,
            FlagKind::Clustered => FlagCategory::Cluster,
            FlagKind::SniperEntry => FlagCategory::Timing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub kind: FlagKind,
    pub severity: Severity,
    pub description: String,
}

impl RiskFlag {
    pub fn new(kind: FlagKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            description: description.into(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Why a funding chain node was not expanded further
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    DepthLimit,
    ExchangeHub,
    /// Address already on the current path
    Cycle,
    NoFunding,
    LookupFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::DepthLimit => "depth limit",
            StopReason::ExchangeHub => "exchange hub",
            StopReason::Cycle => "cycle",
            StopReason::NoFunding => "no funding",
            StopReason::LookupFailed => "lookup failed",
        };
        f.write_str(s)
    }
}

/// One address in a per-wallet provenance tree.
///
/// The root is the traced wallet. Each child is a sender that funded its
/// parent; `funded_at` and `amount` describe that transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingChainNode {
    pub address: String,
    pub address_type: AddressType,
    pub label: Option<String>,
    pub flags: Vec<RiskFlag>,
    pub funded_at: Option<DateTime<Utc>>,
    pub amount: Option<f64>,
    pub depth: u8,
    /// `None` when the node was expanded
    pub stop_reason: Option<StopReason>,
    pub children: Vec<FundingChainNode>,
}

impl FundingChainNode {
    /// Deepest node depth in this subtree
    pub fn max_depth(&self) -> u8 {
        self.children
            .iter()
            .map(FundingChainNode::max_depth)
            .max()
            .unwrap_or(self.depth)
            .max(self.depth)
    }

    /// Pre-order walk over the subtree
    pub fn nodes(&self) -> Vec<&FundingChainNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Nodes below the root
    pub fn ancestors(&self) -> impl Iterator<Item = &FundingChainNode> {
        self.nodes().into_iter().skip(1)
    }

    pub fn primary_source(&self) -> Option<&FundingChainNode> {
        self.children.first()
    }

    pub fn has_flag(&self, kind: FlagKind) -> bool {
        self.flags.iter().any(|f| f.kind == kind)
    }

    /// True if any node in the subtree carries `kind`
    pub fn any_flag(&self, kind: FlagKind) -> bool {
        self.nodes().iter().any(|n| n.has_flag(kind))
    }

    /// All flags of the subtree, in walk order
    pub fn collect_flags(&self) -> Vec<RiskFlag> {
        self.nodes()
            .into_iter()
            .flat_map(|n| n.flags.iter().cloned())
            .collect()
    }
}

/// Holders inferred to be controlled together (size >= 2)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// 1..n in order of smallest member address
    pub id: u32,
    /// Sorted ascending
    pub members: Vec<String>,
    pub size: usize,
    pub shared_funding_source: Option<String>,
    pub total_percentage: f64,
    pub suspicious: bool,
}

/// Output of one cluster detection pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSet {
    pub run_id: Uuid,
    pub clusters: Vec<Cluster>,
}

impl ClusterSet {
    pub fn empty(run_id: Uuid) -> Self {
        Self {
            run_id,
            clusters: Vec::new(),
        }
    }

    /// address -> cluster id
    pub fn membership(&self) -> HashMap<&str, u32> {
        self.clusters
            .iter()
            .flat_map(|c| c.members.iter().map(move |m| (m.as_str(), c.id)))
            .collect()
    }

    pub fn cluster_of(&self, address: &str) -> Option<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.members.binary_search_by(|m| m.as_str().cmp(address)).is_ok())
    }

    pub fn suspicious_count(&self) -> usize {
        self.clusters.iter().filter(|c| c.suspicious).count()
    }

    pub fn largest_size(&self) -> usize {
        self.clusters.iter().map(|c| c.size).max().unwrap_or(0)
    }

    /// Holders absorbed by clustering: sum of (size - 1)
    pub fn merged_count(&self) -> usize {
        self.clusters.iter().map(|c| c.size.saturating_sub(1)).sum()
    }

    pub fn summary(&self) -> ClusterSummary {
        ClusterSummary {
            cluster_count: self.clusters.len(),
            suspicious_cluster_count: self.suspicious_count(),
            largest_cluster_size: self.largest_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub cluster_count: usize,
    pub suspicious_cluster_count: usize,
    pub largest_cluster_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(address: &str, depth: u8) -> FundingChainNode {
        FundingChainNode {
            address: address.to_string(),
            address_type: AddressType::Unknown,
            label: None,
            flags: Vec::new(),
            funded_at: None,
            amount: None,
            depth,
            stop_reason: Some(StopReason::NoFunding),
            children: Vec::new(),
        }
    }

    #[test]
    fn test_node_walk_and_depth() {
        let mut mid = leaf("b", 1);
        let mut deep = leaf("c", 2);
        deep.flags.push(RiskFlag::new(FlagKind::Mixer, "mixer"));
        mid.children.push(deep);
        let mut root = leaf("a", 0);
        root.children.push(mid);

        assert_eq!(root.max_depth(), 2);
        let order: Vec<_> = root.nodes().iter().map(|n| n.address.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(root.ancestors().count(), 2);
        assert!(root.any_flag(FlagKind::Mixer));
        assert!(!root.has_flag(FlagKind::Mixer));
    }

    #[test]
    fn test_flag_severity() {
        assert!(RiskFlag::new(FlagKind::CreatorLinked, "creator").is_critical());
        assert!(!RiskFlag::new(FlagKind::TraceTruncated, "partial").is_critical());
        assert_eq!(FlagKind::FreshWallet.category(), FlagCategory::Wallet);
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn test_cluster_set_queries() {
        let set = ClusterSet {
            run_id: Uuid::nil(),
            clusters: vec![Cluster {
                id: 1,
                members: vec!["a".into(), "c".into(), "d".into()],
                size: 3,
                shared_funding_source: None,
                total_percentage: 12.0,
                suspicious: true,
            }],
        };
        assert_eq!(set.cluster_of("c").map(|c| c.id), Some(1));
        assert!(set.cluster_of("b").is_none());
        assert_eq!(set.merged_count(), 2);
        assert_eq!(set.membership().len(), 3);
        assert_eq!(set.summary().suspicious_cluster_count, 1);
    }
}
