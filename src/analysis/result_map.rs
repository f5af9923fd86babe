//! Metric-keyed result map consumed by the outer vetting score
//!
//! Each entry holds a scalar `value` plus the `rawData` needed to inspect or
//! render it. A `null` value means "no data", never a best-case score.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::concentration::ConcentrationMetrics;
use super::funding_graph::{GraphSummary, GraphView};
use super::risk_scorer::RiskAssessment;
use super::types::{ClusterSet, WalletSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricKey {
    GiniCoefficient,
    NakamotoCoefficient,
    EffectiveHolderCount,
    HolderDistribution,
    SybilScore,
    InsiderScore,
    ExitRiskScore,
    SmartMoneyRatio,
    CoordinatedBuying,
    SniperActivity,
    HoldingDurations,
    FundingGraph,
    TopHolderWalletAge,
}

impl MetricKey {
    pub const ALL: [MetricKey; 13] = [
        MetricKey::GiniCoefficient,
        MetricKey::NakamotoCoefficient,
        MetricKey::EffectiveHolderCount,
        MetricKey::HolderDistribution,
        MetricKey::SybilScore,
        MetricKey::InsiderScore,
        MetricKey::ExitRiskScore,
        MetricKey::SmartMoneyRatio,
        MetricKey::CoordinatedBuying,
        MetricKey::SniperActivity,
        MetricKey::HoldingDurations,
        MetricKey::FundingGraph,
        MetricKey::TopHolderWalletAge,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricEntry {
    pub value: Value,
    pub raw_data: Value,
}

pub type ResultMap = BTreeMap<MetricKey, MetricEntry>;

/// Everything one run produced, borrowed for assembly
pub struct ResultInputs<'a> {
    /// Ranked holders that were traced
    pub analyzed: &'a [WalletSnapshot],
    pub concentration: &'a ConcentrationMetrics,
    pub assessment: &'a RiskAssessment,
    pub clusters: &'a ClusterSet,
    pub graph_summary: &'a GraphSummary,
    pub graph_view: &'a GraphView,
    pub fresh_wallet_days: u32,
}

fn entry(value: impl Serialize, raw_data: Value) -> MetricEntry {
    MetricEntry {
        value: serde_json::to_value(value).unwrap_or(Value::Null),
        raw_data,
    }
}

pub fn build_result_map(inputs: &ResultInputs<'_>) -> ResultMap {
    let c = inputs.concentration;
    let scores = &inputs.assessment.scores;
    let temporal = &inputs.assessment.temporal;
    let summary = inputs.clusters.summary();
    // Scores over zero analyzed holders are "no data", not zero risk
    let scored = |v: f64| (!inputs.analyzed.is_empty()).then_some(v);

    let mut map = ResultMap::new();

    map.insert(
        MetricKey::GiniCoefficient,
        entry(c.gini, json!({ "holderCount": c.holder_count })),
    );
    map.insert(
        MetricKey::NakamotoCoefficient,
        entry(
            c.nakamoto_coefficient,
            json!({ "effectiveHolderCount": c.effective_holder_count }),
        ),
    );
    map.insert(
        MetricKey::EffectiveHolderCount,
        entry(
            c.effective_holder_count,
            json!({
                "rawHolderCount": c.holder_count,
                "clusterCount": summary.cluster_count,
                "mergedHolders": inputs.clusters.merged_count(),
            }),
        ),
    );
    map.insert(
        MetricKey::HolderDistribution,
        entry(
            c.top10_pct,
            json!({
                "top10Pct": c.top10_pct,
                "top50Pct": c.top50_pct,
                "top100Pct": c.top100_pct,
            }),
        ),
    );
    map.insert(
        MetricKey::SybilScore,
        entry(
            scored(scores.sybil_score),
            json!({ "summary": summary, "clusters": inputs.clusters.clusters }),
        ),
    );
    map.insert(
        MetricKey::InsiderScore,
        entry(
            scored(scores.insider_score),
            json!({ "insiders": inputs.assessment.insiders }),
        ),
    );
    map.insert(
        MetricKey::ExitRiskScore,
        entry(
            scored(scores.exit_risk_score),
            json!({
                "paperHandsRatio": temporal.paper_hands_ratio,
                "top10Pct": c.top10_pct,
            }),
        ),
    );
    map.insert(
        MetricKey::SmartMoneyRatio,
        entry(
            scored(scores.smart_money_ratio),
            json!({ "analyzedHolders": inputs.analyzed.len() }),
        ),
    );
    map.insert(
        MetricKey::CoordinatedBuying,
        entry(
            scored(temporal.coordinated_buying_pct),
            json!({ "wallets": temporal.coordinated_wallets }),
        ),
    );
    map.insert(
        MetricKey::SniperActivity,
        entry(
            (!inputs.analyzed.is_empty()).then_some(temporal.sniper_count),
            json!({ "snipers": temporal.snipers }),
        ),
    );
    map.insert(
        MetricKey::HoldingDurations,
        entry(
            temporal.avg_holding_days,
            json!({
                "diamondHandsRatio": temporal.diamond_hands_ratio,
                "paperHandsRatio": temporal.paper_hands_ratio,
                "holdersWithAcquisition": temporal.holders_with_acquisition,
            }),
        ),
    );
    map.insert(
        MetricKey::FundingGraph,
        entry(
            scored(inputs.graph_summary.density),
            json!({ "summary": inputs.graph_summary, "graph": inputs.graph_view }),
        ),
    );
    map.insert(MetricKey::TopHolderWalletAge, wallet_age_entry(inputs));

    map
}

fn wallet_age_entry(inputs: &ResultInputs<'_>) -> MetricEntry {
    let ages: Vec<u32> = inputs.analyzed.iter().filter_map(|w| w.age_days).collect();
    let average = (!ages.is_empty())
        .then(|| ages.iter().map(|&a| a as f64).sum::<f64>() / ages.len() as f64);
    let fresh = ages
        .iter()
        .filter(|&&a| a < inputs.fresh_wallet_days)
        .count();

    let wallets: Vec<Value> = inputs
        .analyzed
        .iter()
        .map(|w| json!({ "address": w.address, "rank": w.rank, "ageDays": w.age_days }))
        .collect();

    entry(
        average,
        json!({ "freshWalletCount": fresh, "wallets": wallets }),
    )
}
