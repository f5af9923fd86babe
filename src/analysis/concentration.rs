//! Concentration Calculator
//!
//! Distribution statistics over one holder snapshot. Every field is `None`
//! when the holder list is empty, so "no data" never reads as "perfectly
//! distributed".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::types::{ClusterSet, WalletSnapshot};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcentrationMetrics {
    pub holder_count: usize,
    pub gini: Option<f64>,
    pub nakamoto_coefficient: Option<usize>,
    pub effective_holder_count: Option<usize>,
    pub top10_pct: Option<f64>,
    pub top50_pct: Option<f64>,
    pub top100_pct: Option<f64>,
}

/// Compute concentration metrics; `clusters` merge holders for the
/// Nakamoto coefficient and the effective holder count only.
pub fn compute_concentration(
    wallets: &[WalletSnapshot],
    clusters: &ClusterSet,
) -> ConcentrationMetrics {
    if wallets.is_empty() {
        return ConcentrationMetrics::default();
    }

    let mut ranked: Vec<&WalletSnapshot> = wallets.iter().collect();
    ranked.sort_by(|a, b| {
        b.balance
            .total_cmp(&a.balance)
            .then_with(|| a.address.cmp(&b.address))
    });

    let top = |n: usize| -> f64 { ranked.iter().take(n).map(|w| w.percentage).sum() };

    let effective = wallets
        .len()
        .saturating_sub(clusters.merged_count())
        .max(1);

    ConcentrationMetrics {
        holder_count: wallets.len(),
        gini: Some(gini(wallets.iter().map(|w| w.balance))),
        nakamoto_coefficient: Some(nakamoto(wallets, clusters)),
        effective_holder_count: Some(effective),
        top10_pct: Some(top(10)),
        top50_pct: Some(top(50)),
        top100_pct: Some(top(100)),
    }
}

/// Gini over balances: 0 for perfect equality, 1 when one holder owns all.
///
/// A single holder is total concentration by definition.
pub fn gini(balances: impl IntoIterator<Item = f64>) -> f64 {
    let mut values: Vec<f64> = balances.into_iter().collect();
    let n = values.len();
    let total: f64 = values.iter().sum();
    if n == 0 || total <= 0.0 {
        return 0.0;
    }
    if n == 1 {
        return 1.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let weighted: f64 = values
        .iter()
        .enumerate()
        .map(|(i, v)| (i as f64 + 1.0) * v)
        .sum();
    let n = n as f64;
    let g = (2.0 * weighted) / (n * total) - (n + 1.0) / n;
    g.clamp(0.0, 1.0)
}

/// Smallest number of entities whose combined share exceeds 50% of supply,
/// with each cluster counted as one entity. If no prefix exceeds 50% the
/// entity count is returned.
pub fn nakamoto(wallets: &[WalletSnapshot], clusters: &ClusterSet) -> usize {
    let membership = clusters.membership();
    let mut merged: HashMap<u32, f64> = HashMap::new();
    let mut entities: Vec<f64> = Vec::with_capacity(wallets.len());

    for wallet in wallets {
        match membership.get(wallet.address.as_str()) {
            Some(&id) => *merged.entry(id).or_insert(0.0) += wallet.percentage,
            None => entities.push(wallet.percentage),
        }
    }
    entities.extend(merged.into_values());
    entities.sort_by(|a, b| b.total_cmp(a));

    let mut cumulative = 0.0;
    for (i, share) in entities.iter().enumerate() {
        cumulative += share;
        if cumulative > 50.0 {
            return i + 1;
        }
    }
    entities.len().max(1)
}
