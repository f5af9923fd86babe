//! Risk Scorer
//!
//! Composite 0-100 scores and temporal signals derived from holder ages,
//! cluster structure and funding-chain flags. Pure functions of their
//! inputs: "now" and the launch time arrive through [`TemporalData`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::types::{ClusterSet, FlagKind, FundingChainNode, WalletSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub established_age_days: u32,
    pub established_min_tx: u64,
    pub sniper_window_secs: i64,
    pub coordination_window_secs: i64,
    pub diamond_hands_days: i64,
    pub paper_hands_days: i64,
    /// Wallets younger than this are flagged fresh
    pub fresh_wallet_days: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            established_age_days: 180,
            established_min_tx: 50,
            sniper_window_secs: 300,
            coordination_window_secs: 120,
            diamond_hands_days: 30,
            paper_hands_days: 7,
            fresh_wallet_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalData {
    pub now: DateTime<Utc>,
    pub launch_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScores {
    pub sybil_score: f64,
    pub insider_score: f64,
    pub exit_risk_score: f64,
    /// Higher is better
    pub smart_money_ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalMetrics {
    pub coordinated_buying_pct: f64,
    pub coordinated_wallets: Vec<String>,
    pub sniper_count: usize,
    pub snipers: Vec<String>,
    pub avg_holding_days: Option<f64>,
    pub diamond_hands_ratio: Option<f64>,
    pub paper_hands_ratio: Option<f64>,
    /// Holders with a known first acquisition time
    pub holders_with_acquisition: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub scores: RiskScores,
    pub temporal: TemporalMetrics,
    /// Holders whose funding or entry marks them as insiders
    pub insiders: Vec<String>,
}

// An empty f64 sum is -0.0; never let that sign reach the output
fn share(part: f64, total: f64) -> f64 {
    if total > 0.0 && part > 0.0 {
        (part / total).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_finite() && score > 0.0 {
        score.min(100.0)
    } else {
        0.0
    }
}

/// Score the analyzed holders.
///
/// `wallets` are the ranked holders that were traced; top-10 concentration
/// is read from their raw percentages.
pub fn compute_risk_scores(
    wallets: &[WalletSnapshot],
    clusters: &ClusterSet,
    traces: &HashMap<String, FundingChainNode>,
    temporal: &TemporalData,
    config: &ScoringConfig,
) -> RiskAssessment {
    if wallets.is_empty() {
        return RiskAssessment::default();
    }

    let total_pct: f64 = wallets.iter().map(|w| w.percentage).sum();
    let cluster_size: HashMap<&str, usize> = clusters
        .clusters
        .iter()
        .flat_map(|c| c.members.iter().map(move |m| (m.as_str(), c.size)))
        .collect();

    // Sybil
    let clustered_pct: f64 = wallets
        .iter()
        .filter(|w| cluster_size.contains_key(w.address.as_str()))
        .map(|w| w.percentage)
        .sum();
    let suspicious = clusters.suspicious_count().min(5) as f64;
    let sybil_score =
        70.0 * share(clustered_pct, total_pct) + 30.0 * suspicious / 5.0;

    // Insider
    let insiders: Vec<String> = wallets
        .iter()
        .filter(|w| is_insider(w, traces.get(&w.address), temporal.launch_at))
        .map(|w| w.address.clone())
        .collect();
    let insider_set: HashSet<&str> = insiders.iter().map(String::as_str).collect();
    let insider_pct: f64 = wallets
        .iter()
        .filter(|w| insider_set.contains(w.address.as_str()))
        .map(|w| w.percentage)
        .sum();
    let insider_score = 100.0 * share(insider_pct, total_pct);

    // Holding durations
    let durations: Vec<(&WalletSnapshot, i64)> = wallets
        .iter()
        .filter_map(|w| {
            let acquired = w.first_acquired_at?;
            Some((w, (temporal.now - acquired).num_days().max(0)))
        })
        .collect();
    let known = durations.len();
    let diamond = durations
        .iter()
        .filter(|(_, d)| *d >= config.diamond_hands_days)
        .count();
    let paper: Vec<&WalletSnapshot> = durations
        .iter()
        .filter(|(_, d)| *d < config.paper_hands_days)
        .map(|(w, _)| *w)
        .collect();
    let ratio = |count: usize| (known > 0).then(|| count as f64 / known as f64);
    let avg_holding_days = (known > 0)
        .then(|| durations.iter().map(|(_, d)| *d as f64).sum::<f64>() / known as f64);

    // Exit risk
    let paper_pct: f64 = paper.iter().map(|w| w.percentage).sum();
    let mut by_rank: Vec<&WalletSnapshot> = wallets.iter().collect();
    by_rank.sort_by_key(|w| w.rank);
    let top10_pct: f64 = by_rank.iter().take(10).map(|w| w.percentage).sum();
    let exit_risk_score = 0.6 * 100.0 * share(paper_pct, total_pct) + 0.4 * top10_pct;

    // Smart money
    let smart_weighted: f64 = wallets
        .iter()
        .filter(|w| is_established(w, config))
        .map(|w| {
            let size = cluster_size.get(w.address.as_str()).copied().unwrap_or(1);
            w.percentage / size as f64
        })
        .sum();
    let smart_money_ratio = 100.0 * share(smart_weighted, total_pct);

    // Entry timing
    let snipers: Vec<String> = match temporal.launch_at {
        Some(launch) => wallets
            .iter()
            .filter(|w| !cluster_size.contains_key(w.address.as_str()))
            .filter(|w| {
                w.first_acquired_at.map_or(false, |at| {
                    let since = (at - launch).num_seconds();
                    (0..=config.sniper_window_secs).contains(&since)
                })
            })
            .map(|w| w.address.clone())
            .collect(),
        None => Vec::new(),
    };
    let coordinated_wallets = coordinated_entries(wallets, clusters, config);
    let coordinated_buying_pct =
        100.0 * coordinated_wallets.len() as f64 / wallets.len() as f64;

    RiskAssessment {
        scores: RiskScores {
            sybil_score: clamp_score(sybil_score),
            insider_score: clamp_score(insider_score),
            exit_risk_score: clamp_score(exit_risk_score),
            smart_money_ratio: clamp_score(smart_money_ratio),
        },
        temporal: TemporalMetrics {
            coordinated_buying_pct: clamp_score(coordinated_buying_pct),
            coordinated_wallets,
            sniper_count: snipers.len(),
            snipers,
            avg_holding_days,
            diamond_hands_ratio: ratio(diamond),
            paper_hands_ratio: ratio(paper.len()),
            holders_with_acquisition: known,
        },
        insiders,
    }
}

fn is_insider(
    wallet: &WalletSnapshot,
    trace: Option<&FundingChainNode>,
    launch_at: Option<DateTime<Utc>>,
) -> bool {
    let linked = trace.map_or(false, |t| {
        t.any_flag(FlagKind::CreatorLinked) || t.any_flag(FlagKind::PreLaunchFunding)
    });
    let early = match (wallet.first_acquired_at, launch_at) {
        (Some(at), Some(launch)) => at < launch,
        _ => false,
    };
    linked || early
}

/// Long on-chain history; transaction count is only checked when known
fn is_established(wallet: &WalletSnapshot, config: &ScoringConfig) -> bool {
    let old_enough = wallet
        .age_days
        .map_or(false, |age| age >= config.established_age_days);
    let active = wallet
        .tx_count
        .map_or(true, |tx| tx >= config.established_min_tx);
    old_enough && active
}

/// Clustered holders whose first acquisition lands within the coordination
/// window of another member of the same cluster. Sorted by address.
fn coordinated_entries(
    wallets: &[WalletSnapshot],
    clusters: &ClusterSet,
    config: &ScoringConfig,
) -> Vec<String> {
    let acquired: HashMap<&str, DateTime<Utc>> = wallets
        .iter()
        .filter_map(|w| Some((w.address.as_str(), w.first_acquired_at?)))
        .collect();

    let mut out = Vec::new();
    for cluster in &clusters.clusters {
        let mut times: Vec<(DateTime<Utc>, &str)> = cluster
            .members
            .iter()
            .filter_map(|m| acquired.get(m.as_str()).map(|at| (*at, m.as_str())))
            .collect();
        times.sort();

        for (i, (at, address)) in times.iter().enumerate() {
            let near = |other: &(DateTime<Utc>, &str)| {
                (other.0 - *at).num_seconds().abs() <= config.coordination_window_secs
            };
            let before = i > 0 && near(&times[i - 1]);
            let after = i + 1 < times.len() && near(&times[i + 1]);
            if before || after {
                out.push(address.to_string());
            }
        }
    }
    out.sort();
    out
}
