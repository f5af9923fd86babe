//! Aggregate funding graph
//!
//! Whole-token directed graph built from every per-wallet trace: nodes are
//! all addresses seen, edges run funder -> funded. Rebuilt on every run and
//! never shares nodes with the trace trees it was built from.

use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use super::types::{ClusterSet, FlagKind, FundingChainNode, WalletSnapshot};
use crate::types::AddressType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Floor for the hub degree threshold
    pub hub_min_degree: usize,
    /// Standard deviations above the mean degree
    pub hub_sigma: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            hub_min_degree: 3,
            hub_sigma: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
struct GraphNode {
    address: String,
    address_type: AddressType,
    label: Option<String>,
    flags: BTreeSet<FlagKind>,
    holder_pct: Option<f64>,
}

#[derive(Debug, Clone)]
struct GraphEdge {
    funded_at: Option<DateTime<Utc>>,
    amount: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSummary {
    pub node_count: usize,
    pub edge_count: usize,
    pub density: f64,
    pub hub_count: usize,
}

/// Node-link export for force-directed or hierarchical renderers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphView {
    pub nodes: Vec<ViewNode>,
    pub edges: Vec<ViewEdge>,
    pub clusters: Vec<ViewCluster>,
    pub hubs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewNode {
    pub id: String,
    pub label: String,
    /// Address type, or `holder` for analyzed holders
    pub group: String,
    /// Size weight: supply percentage for holders, degree otherwise
    pub size: f64,
    pub flags: Vec<FlagKind>,
    pub cluster_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewEdge {
    pub source: String,
    pub target: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewCluster {
    pub id: u32,
    pub members: Vec<String>,
    pub suspicious: bool,
}

pub struct FundingGraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    wallet_to_node: HashMap<String, NodeIndex>,
    config: GraphConfig,
}

impl FundingGraph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            graph: DiGraph::new(),
            wallet_to_node: HashMap::new(),
            config,
        }
    }

    /// Build from the ranked holders and their traces, in rank order
    pub fn build(
        wallets: &[WalletSnapshot],
        traces: &HashMap<String, FundingChainNode>,
        config: GraphConfig,
    ) -> Self {
        let mut graph = Self::new(config);
        let mut ranked: Vec<&WalletSnapshot> = wallets.iter().collect();
        ranked.sort_by_key(|w| w.rank);

        for wallet in &ranked {
            let idx = graph.get_or_create_node(&wallet.address);
            graph.graph[idx].holder_pct = Some(wallet.percentage);
        }
        for wallet in ranked {
            if let Some(trace) = traces.get(&wallet.address) {
                graph.add_trace(trace);
            }
        }

        debug!(
            nodes = graph.graph.node_count(),
            edges = graph.graph.edge_count(),
            "Funding graph built"
        );
        graph
    }

    fn get_or_create_node(&mut self, address: &str) -> NodeIndex {
        if let Some(&idx) = self.wallet_to_node.get(address) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode {
            address: address.to_string(),
            address_type: AddressType::Unknown,
            label: None,
            flags: BTreeSet::new(),
            holder_pct: None,
        });
        self.wallet_to_node.insert(address.to_string(), idx);
        idx
    }

    /// Merge one provenance tree; duplicate funder -> funded pairs keep the
    /// first edge seen
    pub fn add_trace(&mut self, root: &FundingChainNode) {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let idx = self.get_or_create_node(&node.address);
            {
                let entry = &mut self.graph[idx];
                if entry.address_type == AddressType::Unknown {
                    entry.address_type = node.address_type;
                }
                if entry.label.is_none() {
                    entry.label = node.label.clone();
                }
                entry.flags.extend(node.flags.iter().map(|f| f.kind));
            }

            for child in &node.children {
                let from = self.get_or_create_node(&child.address);
                if from != idx && self.graph.find_edge(from, idx).is_none() {
                    self.graph.add_edge(
                        from,
                        idx,
                        GraphEdge {
                            funded_at: child.funded_at,
                            amount: child.amount,
                        },
                    );
                }
                stack.push(child);
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// E / (N(N-1)) for a directed graph; 0 below two nodes
    pub fn density(&self) -> f64 {
        let n = self.graph.node_count() as f64;
        if n < 2.0 {
            return 0.0;
        }
        self.graph.edge_count() as f64 / (n * (n - 1.0))
    }

    fn degree(&self, idx: NodeIndex) -> usize {
        self.graph.edges_directed(idx, Direction::Incoming).count()
            + self.graph.edges_directed(idx, Direction::Outgoing).count()
    }

    /// Addresses whose total degree is at least max(min_degree, mean + k*sigma),
    /// sorted ascending
    pub fn hubs(&self) -> Vec<String> {
        let degrees: Vec<(NodeIndex, usize)> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.degree(idx)))
            .collect();
        if degrees.is_empty() {
            return Vec::new();
        }

        let n = degrees.len() as f64;
        let mean = degrees.iter().map(|(_, d)| *d as f64).sum::<f64>() / n;
        let variance = degrees
            .iter()
            .map(|(_, d)| (*d as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let threshold = (mean + self.config.hub_sigma * variance.sqrt())
            .max(self.config.hub_min_degree as f64);

        let mut hubs: Vec<String> = degrees
            .into_iter()
            .filter(|(_, d)| *d as f64 >= threshold)
            .map(|(idx, _)| self.graph[idx].address.clone())
            .collect();
        hubs.sort();
        hubs
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            density: self.density(),
            hub_count: self.hubs().len(),
        }
    }

    /// Read projection for renderers; nodes and edges sorted by address
    pub fn export_view(&self, clusters: &ClusterSet) -> GraphView {
        let membership = clusters.membership();

        let mut nodes: Vec<ViewNode> = self
            .graph
            .node_indices()
            .map(|idx| {
                let node = &self.graph[idx];
                let group = if node.holder_pct.is_some() {
                    "holder".to_string()
                } else {
                    node.address_type.to_string()
                };
                ViewNode {
                    id: node.address.clone(),
                    label: node.label.clone().unwrap_or_else(|| short_address(&node.address)),
                    group,
                    size: node.holder_pct.unwrap_or(self.degree(idx) as f64),
                    flags: node.flags.iter().copied().collect(),
                    cluster_id: membership.get(node.address.as_str()).copied(),
                }
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<ViewEdge> = self
            .graph
            .edge_references()
            .map(|edge| ViewEdge {
                source: self.graph[edge.source()].address.clone(),
                target: self.graph[edge.target()].address.clone(),
                timestamp: edge.weight().funded_at,
                amount: edge.weight().amount,
            })
            .collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        GraphView {
            nodes,
            edges,
            clusters: clusters
                .clusters
                .iter()
                .map(|c| ViewCluster {
                    id: c.id,
                    members: c.members.clone(),
                    suspicious: c.suspicious,
                })
                .collect(),
            hubs: self.hubs(),
        }
    }
}

fn short_address(address: &str) -> String {
    if address.len() <= 12 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}
