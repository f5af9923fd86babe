//! holder-risk - Holder risk and funding-network analysis engine
//!
//! Traces where top holders got their funds, groups wallets that look
//! commonly controlled, measures supply concentration and derives composite
//! risk scores. The output is a metric-keyed result map consumed by an outer
//! token-vetting score.

pub mod analysis;
pub mod config;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod orchestrator;
pub mod security;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use analysis::{MetricEntry, MetricKey, ResultMap};
pub use config::EngineConfig;
pub use error::{HolderRiskError, Result};
pub use gateway::{ChainDataGateway, FixtureGateway, GatewayClient, HttpChainGateway};
pub use orchestrator::{AnalysisOrchestrator, AnalysisRequest, TriggerOutcome};
pub use storage::{
    AnalysisStatus, AnalysisStore, HolderAnalysis, InMemoryAnalysisStore, SqliteAnalysisStore,
    TraceFilter, TraceQuery, WalletTrace,
};
pub use types::{AddressType, Chain, TokenKey};
