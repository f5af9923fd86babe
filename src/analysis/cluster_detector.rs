//! Cluster Detector
//!
//! Partitions traced holders into sets inferred to be controlled together.
//! Holders are merged with a union-find when any rule matches:
//!
//! - **Shared funder**: same immediate sender, funding timestamps within
//!   `shared_funder_window_secs`
//! - **Converging ancestry**: the same non-hub address appears anywhere in
//!   both funding trees, or one holder appears in another holder's tree
//! - **Similarity** (optional): primary funding amounts within
//!   `amount_tolerance_pct` and timestamps within `similarity_window_secs`
//!
//! The representative of every set is its lexicographically smallest
//! address, so identical inputs always give identical clusters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{Cluster, ClusterSet, FundingChainNode, WalletSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub shared_funder_window_secs: i64,
    pub similarity_enabled: bool,
    pub amount_tolerance_pct: f64,
    pub similarity_window_secs: i64,
    /// Clusters larger than this are suspicious
    pub suspicious_min_size: usize,
    /// Clusters controlling at least this much supply are suspicious
    pub suspicious_supply_pct: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            shared_funder_window_secs: 300,
            similarity_enabled: true,
            amount_tolerance_pct: 2.0,
            similarity_window_secs: 60,
            suspicious_min_size: 3,
            suspicious_supply_pct: 5.0,
        }
    }
}

/// Disjoint sets over indices of an address-sorted slice
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// The smaller index (smaller address) becomes the representative
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if ra < rb {
            self.parent[rb] = ra;
        } else {
            self.parent[ra] = rb;
        }
        true
    }
}

struct PrimaryFunding<'a> {
    sender: &'a str,
    at: DateTime<Utc>,
    amount: Option<f64>,
}

fn primary_funding(trace: &FundingChainNode) -> Option<PrimaryFunding<'_>> {
    let source = trace.primary_source()?;
    Some(PrimaryFunding {
        sender: &source.address,
        at: source.funded_at?,
        amount: source.amount,
    })
}

fn amounts_match(a: f64, b: f64, tolerance_pct: f64) -> bool {
    if a <= 0.0 || b <= 0.0 || !a.is_finite() || !b.is_finite() {
        return false;
    }
    (a - b).abs() <= a.max(b) * tolerance_pct / 100.0
}

/// Group holders into clusters. Holders without a trace never cluster.
pub fn detect_clusters(
    run_id: Uuid,
    wallets: &[WalletSnapshot],
    traces: &HashMap<String, FundingChainNode>,
    config: &ClusterConfig,
) -> ClusterSet {
    let mut holders: Vec<&WalletSnapshot> = wallets
        .iter()
        .filter(|w| traces.contains_key(&w.address))
        .collect();
    holders.sort_by(|a, b| a.address.cmp(&b.address));
    holders.dedup_by(|a, b| a.address == b.address);

    if holders.len() < 2 {
        return ClusterSet::empty(run_id);
    }

    let index: HashMap<&str, usize> = holders
        .iter()
        .enumerate()
        .map(|(i, w)| (w.address.as_str(), i))
        .collect();
    let primaries: Vec<Option<PrimaryFunding>> = holders
        .iter()
        .map(|w| traces.get(&w.address).and_then(primary_funding))
        .collect();

    let mut uf = UnionFind::new(holders.len());
    let mut merges = 0usize;

    // Shared immediate funder within the window
    let mut by_sender: BTreeMap<&str, Vec<(DateTime<Utc>, usize)>> = BTreeMap::new();
    for (i, primary) in primaries.iter().enumerate() {
        if let Some(p) = primary {
            by_sender.entry(p.sender).or_default().push((p.at, i));
        }
    }
    for group in by_sender.values_mut() {
        group.sort();
        for pair in group.windows(2) {
            let gap = (pair[1].0 - pair[0].0).num_seconds();
            if gap <= config.shared_funder_window_secs && uf.union(pair[0].1, pair[1].1) {
                merges += 1;
            }
        }
    }

    // Converging non-hub ancestry, including holders funding holders
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    for (i, holder) in holders.iter().enumerate() {
        let Some(trace) = traces.get(&holder.address) else {
            continue;
        };
        for node in trace.ancestors() {
            if let Some(&j) = index.get(node.address.as_str()) {
                if uf.union(i, j) {
                    merges += 1;
                }
            }
            if node.address_type.is_hub() {
                continue;
            }
            match first_seen.get(node.address.as_str()) {
                Some(&j) => {
                    if uf.union(i, j) {
                        merges += 1;
                    }
                }
                None => {
                    first_seen.insert(node.address.as_str(), i);
                }
            }
        }
    }

    // Near-identical amount and timing
    if config.similarity_enabled {
        let mut timed: Vec<(DateTime<Utc>, usize, f64)> = primaries
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let p = p.as_ref()?;
                Some((p.at, i, p.amount?))
            })
            .collect();
        timed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        for (k, &(at_a, a, amount_a)) in timed.iter().enumerate() {
            for &(at_b, b, amount_b) in &timed[k + 1..] {
                if (at_b - at_a).num_seconds() > config.similarity_window_secs {
                    break;
                }
                if amounts_match(amount_a, amount_b, config.amount_tolerance_pct)
                    && uf.union(a, b)
                {
                    merges += 1;
                }
            }
        }
    }

    let mut sets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..holders.len() {
        let root = uf.find(i);
        sets.entry(root).or_default().push(i);
    }

    // Roots are the smallest member index, so BTreeMap order is smallest-member order
    let clusters: Vec<Cluster> = sets
        .into_values()
        .filter(|members| members.len() >= 2)
        .enumerate()
        .map(|(n, members)| {
            let total_percentage: f64 = members.iter().map(|&i| holders[i].percentage).sum();
            let size = members.len();
            Cluster {
                id: n as u32 + 1,
                shared_funding_source: shared_source(&members, &primaries),
                members: members
                    .iter()
                    .map(|&i| holders[i].address.clone())
                    .collect(),
                size,
                total_percentage,
                suspicious: size > config.suspicious_min_size
                    || total_percentage >= config.suspicious_supply_pct,
            }
        })
        .collect();

    debug!(merges, holders = holders.len(), "Union-find converged");
    info!(
        clusters = clusters.len(),
        suspicious = clusters.iter().filter(|c| c.suspicious).count(),
        "Cluster detection complete"
    );

    ClusterSet { run_id, clusters }
}

/// Most common primary sender among members, if at least two share it
fn shared_source(members: &[usize], primaries: &[Option<PrimaryFunding>]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for &i in members {
        if let Some(p) = &primaries[i] {
            *counts.entry(p.sender).or_insert(0) += 1;
        }
    }
    // BTreeMap iteration is ascending, so max_by_key keeps the last of equal
    // counts; reverse to prefer the smallest address
    counts
        .into_iter()
        .rev()
        .max_by_key(|(_, count)| *count)
        .filter(|(_, count)| *count >= 2)
        .map(|(sender, _)| sender.to_string())
}
