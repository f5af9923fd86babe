//! Holder risk analysis components
//!
//! - `funding_tracer`: per-wallet provenance trees
//! - `cluster_detector`: union-find grouping of related holders
//! - `concentration`: Gini, Nakamoto, effective holders, top-N
//! - `risk_scorer`: composite scores and temporal signals
//! - `funding_graph`: aggregate graph and node-link export
//! - `result_map`: metric-keyed output

pub mod cluster_detector;
pub mod concentration;
pub mod funding_graph;
pub mod funding_tracer;
pub mod result_map;
pub mod risk_scorer;
pub mod types;

pub use cluster_detector::{detect_clusters, ClusterConfig};
pub use concentration::{compute_concentration, ConcentrationMetrics};
pub use funding_graph::{FundingGraph, GraphConfig, GraphSummary, GraphView};
pub use funding_tracer::{FundingTracer, TraceOptions, TracerConfig};
pub use result_map::{build_result_map, MetricEntry, MetricKey, ResultInputs, ResultMap};
pub use risk_scorer::{
    compute_risk_scores, RiskAssessment, RiskScores, ScoringConfig, TemporalData, TemporalMetrics,
};
pub use types::{
    Cluster, ClusterSet, ClusterSummary, FlagCategory, FlagKind, FundingChainNode, RiskFlag,
    Severity, StopReason, WalletSnapshot,
};
