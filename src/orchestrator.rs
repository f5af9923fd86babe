//! Analysis orchestration for one token at a time
//!
//! Sequences the gateway fetch, per-holder tracing, clustering, concentration,
//! scoring and result assembly, and owns the per-token state machine
//! `NOT_STARTED -> RUNNING -> {COMPLETED, FAILED}`.
//!
//! At most one run per token is in flight; duplicate triggers are answered
//! with [`TriggerOutcome::AlreadyRunning`]. A run is cancellable through
//! [`AnalysisOrchestrator::cancel`], in which case nothing is persisted
//! beyond the FAILED status.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::analysis::{
    build_result_map, compute_concentration, compute_risk_scores, detect_clusters, FlagKind,
    FundingChainNode, FundingGraph, FundingTracer, ResultInputs, ResultMap, RiskFlag,
    TemporalData, TraceOptions, WalletSnapshot,
};
use crate::config::EngineConfig;
use crate::error::{HolderRiskError, Result};
use crate::gateway::{ChainDataGateway, GatewayClient, HolderBalance, TokenInfo, WalletAge};
use crate::observability::EngineMetrics;
use crate::security::{validate_address, validate_trace_depth};
use crate::storage::{
    AnalysisMetrics, AnalysisStatus, AnalysisStore, HolderAnalysis, TracePage, TraceQuery,
    WalletTrace,
};
use crate::types::{Chain, TokenKey};

/// Trigger for one analysis run
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub token: String,
    pub chain: Chain,
    /// Defaults to `tracer.default_depth`
    pub trace_depth: Option<u8>,
    /// Bypass cached classifications and funding sources
    pub force_refresh: bool,
    /// Pins "now" for temporal metrics
    pub as_of: Option<DateTime<Utc>>,
}

impl AnalysisRequest {
    pub fn new(token: impl Into<String>, chain: Chain) -> Self {
        Self {
            token: token.into(),
            chain,
            trace_depth: None,
            force_refresh: false,
            as_of: None,
        }
    }

    pub fn with_depth(mut self, depth: u8) -> Self {
        self.trace_depth = Some(depth);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn as_of(mut self, now: DateTime<Utc>) -> Self {
        self.as_of = Some(now);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Completed(HolderAnalysis),
    /// Another run for the same token holds the in-flight slot
    AlreadyRunning,
}

impl TriggerOutcome {
    pub fn analysis(&self) -> Option<&HolderAnalysis> {
        match self {
            TriggerOutcome::Completed(analysis) => Some(analysis),
            TriggerOutcome::AlreadyRunning => None,
        }
    }
}

/// Releases a token's in-flight slot when the run ends, however it ends
struct InFlightGuard {
    slots: Arc<DashMap<TokenKey, CancellationToken>>,
    key: TokenKey,
    metrics: Arc<EngineMetrics>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.slots.remove(&self.key);
        self.metrics.analyses_in_flight.dec();
    }
}

/// Per-holder gateway work, merged back in rank order
struct HolderWork {
    index: usize,
    age: Option<WalletAge>,
    trace: Option<FundingChainNode>,
}

pub struct AnalysisOrchestrator {
    client: GatewayClient,
    tracer: FundingTracer,
    store: Arc<dyn AnalysisStore>,
    config: EngineConfig,
    in_flight: Arc<DashMap<TokenKey, CancellationToken>>,
    metrics: Arc<EngineMetrics>,
}

impl AnalysisOrchestrator {
    pub fn new(
        gateway: Arc<dyn ChainDataGateway>,
        store: Arc<dyn AnalysisStore>,
        config: EngineConfig,
    ) -> Self {
        Self::with_metrics(gateway, store, config, Arc::new(EngineMetrics::default()))
    }

    pub fn with_metrics(
        gateway: Arc<dyn ChainDataGateway>,
        store: Arc<dyn AnalysisStore>,
        config: EngineConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let client = GatewayClient::new(
            gateway,
            config.gateway.retry.clone(),
            &config.gateway.cache,
            metrics.clone(),
        );
        let tracer = FundingTracer::new(client.clone(), config.tracer.clone());

        info!(
            top_n = config.analysis.top_n,
            batch_size = config.analysis.batch_size,
            default_depth = config.tracer.default_depth,
            "Analysis orchestrator ready"
        );

        Self {
            client,
            tracer,
            store,
            config,
            in_flight: Arc::new(DashMap::new()),
            metrics,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn is_running(&self, token: &str, chain: Chain) -> bool {
        self.in_flight.contains_key(&TokenKey::new(token, chain))
    }

    /// Run one analysis to completion.
    ///
    /// Input is validated before any state changes. Gateway failure on the
    /// holder fetch, a malformed snapshot or cancellation leave the token
    /// FAILED with its previous metrics untouched.
    #[instrument(skip(self, request), fields(token = %request.token, chain = %request.chain))]
    pub async fn run_analysis(&self, request: AnalysisRequest) -> Result<TriggerOutcome> {
        let (key, depth) = self.validate_request(&request)?;
        let Some((guard, cancel)) = self.claim(&key) else {
            self.metrics.analyses_rejected.inc();
            info!("Analysis already running, trigger ignored");
            return Ok(TriggerOutcome::AlreadyRunning);
        };
        self.execute(key, depth, request, cancel, guard).await
    }

    /// Run in a background task.
    ///
    /// The in-flight slot is claimed before this returns, so a trigger made
    /// right after observes the run.
    pub fn spawn_analysis(
        self: &Arc<Self>,
        request: AnalysisRequest,
    ) -> Result<JoinHandle<Result<TriggerOutcome>>> {
        let (key, depth) = self.validate_request(&request)?;
        let Some((guard, cancel)) = self.claim(&key) else {
            self.metrics.analyses_rejected.inc();
            info!(token = %key, "Analysis already running, trigger ignored");
            return Ok(tokio::spawn(async { Ok(TriggerOutcome::AlreadyRunning) }));
        };

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.execute(key, depth, request, cancel, guard).await
        }))
    }

    /// Signal cancellation to the in-flight run for `token`.
    ///
    /// Returns immediately; false when nothing was running.
    pub fn cancel(&self, token: &str, chain: Chain) -> bool {
        match self.in_flight.get(&TokenKey::new(token, chain)) {
            Some(slot) => {
                slot.cancel();
                info!(token, chain = %chain, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Stored analysis, or a NOT_STARTED placeholder
    pub async fn status(&self, token: &str, chain: Chain) -> Result<HolderAnalysis> {
        let key = validated_key(token, chain)?;
        Ok(self
            .store
            .get_analysis(&key)
            .await?
            .unwrap_or_else(|| HolderAnalysis::not_started(key)))
    }

    /// Result map for the outer vetting score; `None` unless COMPLETED
    pub async fn holder_risk_signal(&self, token: &str, chain: Chain) -> Result<Option<ResultMap>> {
        let analysis = self.status(token, chain).await?;
        if analysis.status != AnalysisStatus::Completed {
            return Ok(None);
        }
        Ok(analysis.metrics.map(|m| m.results))
    }

    pub async fn list_traces(
        &self,
        token: &str,
        chain: Chain,
        query: &TraceQuery,
    ) -> Result<TracePage> {
        let key = validated_key(token, chain)?;
        let analysis = self
            .store
            .get_analysis(&key)
            .await?
            .ok_or_else(|| HolderRiskError::AnalysisNotFound(key.to_string()))?;
        Ok(self.store.list_traces(analysis.id, query).await?)
    }

    /// Re-trace one holder with deep branching and a fresh cache read.
    ///
    /// Only the funding fields of the stored row change; rank, percentage,
    /// the parent's status and metrics stay as they are.
    #[instrument(skip(self))]
    pub async fn deep_trace_wallet(
        &self,
        token: &str,
        chain: Chain,
        wallet: &str,
        depth: Option<u8>,
    ) -> Result<WalletTrace> {
        let key = validated_key(token, chain)?;
        validate_address(wallet, chain).map_err(invalid)?;
        let wallet = chain.normalize_address(wallet);
        let wallet = wallet.as_str();
        let depth = validate_trace_depth(depth.unwrap_or(self.config.tracer.default_depth))
            .map_err(invalid)?;

        let analysis = self
            .store
            .get_analysis(&key)
            .await?
            .ok_or_else(|| HolderRiskError::AnalysisNotFound(key.to_string()))?;
        let mut trace = self
            .store
            .get_trace(analysis.id, wallet)
            .await?
            .ok_or_else(|| {
                HolderRiskError::AnalysisNotFound(format!("{} is not a traced holder of {}", wallet, key))
            })?;

        let info = self.fetch_token_info(&key).await;
        let options = TraceOptions {
            launch_at: info.created_at,
            creator: info.creator,
            force_refresh: true,
            branching: Some(self.config.tracer.deep_trace_branching),
        };
        let root = self
            .tracer
            .trace_funding_chain(wallet, chain, depth, &options)
            .await?;

        trace.replace_funding_flags(root.collect_flags());
        trace.set_funding_chain(Some(root));

        // The store merges funding fields into whatever row is current, so a
        // rerun that landed meanwhile keeps its cluster and wallet flags
        let vanished = || {
            HolderRiskError::AnalysisNotFound(format!("trace row for {} vanished", wallet))
        };
        if !self.store.update_trace_funding(&trace).await? {
            return Err(vanished());
        }
        let trace = self
            .store
            .get_trace(analysis.id, wallet)
            .await?
            .ok_or_else(vanished)?;

        info!(
            wallet,
            depth = trace.funding_depth,
            flags = trace.risk_flag_count,
            "Deep trace refreshed"
        );
        Ok(trace)
    }

    fn validate_request(&self, request: &AnalysisRequest) -> Result<(TokenKey, u8)> {
        let key = validated_key(&request.token, request.chain)?;
        let depth = validate_trace_depth(
            request
                .trace_depth
                .unwrap_or(self.config.tracer.default_depth),
        )
        .map_err(invalid)?;
        Ok((key, depth))
    }

    fn claim(&self, key: &TokenKey) -> Option<(InFlightGuard, CancellationToken)> {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let cancel = CancellationToken::new();
                slot.insert(cancel.clone());
                self.metrics.analyses_in_flight.inc();
                Some((
                    InFlightGuard {
                        slots: Arc::clone(&self.in_flight),
                        key: key.clone(),
                        metrics: Arc::clone(&self.metrics),
                    },
                    cancel,
                ))
            }
        }
    }

    async fn execute(
        &self,
        key: TokenKey,
        depth: u8,
        request: AnalysisRequest,
        cancel: CancellationToken,
        _guard: InFlightGuard,
    ) -> Result<TriggerOutcome> {
        let started = self.store.mark_running(&key).await?;
        self.metrics.analyses_started.inc();
        info!(token = %key, depth, analysis_id = %started.id, "Analysis started");

        let computed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HolderRiskError::Cancelled),
            result = self.compute(&started, depth, &request) => result,
        };

        let saved = match computed {
            Ok(_) if cancel.is_cancelled() => Err(HolderRiskError::Cancelled),
            Ok((analysis, traces)) => self
                .store
                .save_completed(&analysis, &traces)
                .await
                .map(|_| (analysis, traces.len()))
                .map_err(HolderRiskError::from),
            Err(e) => Err(e),
        };

        match saved {
            Ok((analysis, trace_count)) => {
                self.metrics.analyses_completed.inc();
                info!(
                    token = %key,
                    traces = trace_count,
                    clusters = analysis
                        .metrics
                        .as_ref()
                        .map(|m| m.cluster_summary.cluster_count)
                        .unwrap_or(0),
                    "Analysis completed"
                );
                Ok(TriggerOutcome::Completed(analysis))
            }
            Err(err) => {
                self.metrics.analyses_failed.inc();
                warn!(token = %key, error = %err, "Analysis failed");
                if let Err(store_err) = self.store.mark_failed(&key, &err.to_string()).await {
                    warn!(token = %key, error = %store_err, "Could not record failure");
                }
                Err(err)
            }
        }
    }

    async fn compute(
        &self,
        started: &HolderAnalysis,
        depth: u8,
        request: &AnalysisRequest,
    ) -> Result<(HolderAnalysis, Vec<WalletTrace>)> {
        let key = &started.token;
        let chain = key.chain;
        let now = request.as_of.unwrap_or_else(Utc::now);

        let holders = self.client.holders(&key.address, chain).await?;
        validate_snapshot(&holders, self.config.analysis.percentage_tolerance)?;

        // Ranked once; everything downstream sees this order
        let mut ranked = rank_holders(holders);
        debug!(holders = ranked.len(), "Ranked holder snapshot");

        let info = self.fetch_token_info(key).await;
        let options = TraceOptions {
            launch_at: info.created_at,
            creator: info.creator.clone(),
            force_refresh: request.force_refresh,
            branching: None,
        };

        let top_n = self.config.analysis.top_n.min(ranked.len());
        // Futures are built up front so the stream holds no borrowing closure
        let pending: Vec<_> = ranked[..top_n]
            .iter()
            .enumerate()
            .map(|(index, wallet)| {
                self.holder_work(index, wallet.address.clone(), chain, depth, &options)
            })
            .collect();
        let mut work: Vec<HolderWork> = stream::iter(pending)
            .buffer_unordered(self.config.analysis.batch_size.max(1))
            .collect()
            .await;
        work.sort_by_key(|w| w.index);

        let mut traces: HashMap<String, FundingChainNode> = HashMap::new();
        for item in work {
            let wallet = &mut ranked[item.index];
            if let Some(age) = item.age {
                wallet.age_days = Some(age.age_in_days);
                wallet.first_tx_date = age.first_tx_date;
                wallet.tx_count = age.tx_count;
            }
            if let Some(trace) = item.trace {
                traces.insert(wallet.address.clone(), trace);
            }
        }
        let analyzed = &ranked[..top_n];

        let clusters = detect_clusters(started.id, analyzed, &traces, &self.config.cluster);
        let concentration = compute_concentration(&ranked, &clusters);
        let assessment = compute_risk_scores(
            analyzed,
            &clusters,
            &traces,
            &TemporalData {
                now,
                launch_at: info.created_at,
            },
            &self.config.scoring,
        );
        let graph = FundingGraph::build(analyzed, &traces, self.config.graph.clone());
        let graph_summary = graph.summary();
        let graph_view = graph.export_view(&clusters);

        let results = build_result_map(&ResultInputs {
            analyzed,
            concentration: &concentration,
            assessment: &assessment,
            clusters: &clusters,
            graph_summary: &graph_summary,
            graph_view: &graph_view,
            fresh_wallet_days: self.config.scoring.fresh_wallet_days,
        });

        let snipers: HashSet<&str> = assessment
            .temporal
            .snipers
            .iter()
            .map(String::as_str)
            .collect();
        let membership = clusters.membership();
        let wallet_traces: Vec<WalletTrace> = analyzed
            .iter()
            .map(|wallet| {
                self.wallet_trace(
                    started,
                    wallet,
                    traces.remove(&wallet.address),
                    membership.get(wallet.address.as_str()).copied(),
                    snipers.contains(wallet.address.as_str()),
                )
            })
            .collect();

        let metrics = AnalysisMetrics {
            concentration,
            scores: assessment.scores.clone(),
            temporal: assessment.temporal.clone(),
            cluster_summary: clusters.summary(),
            graph_summary,
            clusters,
            graph: graph_view,
            results,
        };

        let analysis = HolderAnalysis {
            id: started.id,
            token: key.clone(),
            status: AnalysisStatus::Completed,
            analyzed_at: Some(Utc::now()),
            last_error: None,
            metrics: Some(metrics),
        };
        Ok((analysis, wallet_traces))
    }

    /// Age and funding trace for one holder. Failures here are absorbed.
    async fn holder_work(
        &self,
        index: usize,
        address: String,
        chain: Chain,
        depth: u8,
        options: &TraceOptions,
    ) -> HolderWork {
        let address = address.as_str();
        let age = match self.client.wallet_age(address, chain).await {
            Ok(age) => Some(age),
            Err(e) => {
                warn!(address, error = %e, "Wallet age unavailable");
                None
            }
        };
        let trace = match self
            .tracer
            .trace_funding_chain(address, chain, depth, options)
            .await
        {
            Ok(trace) => Some(trace),
            Err(e) => {
                warn!(address, error = %e, "Funding trace unavailable");
                None
            }
        };
        HolderWork { index, age, trace }
    }

    fn wallet_trace(
        &self,
        analysis: &HolderAnalysis,
        wallet: &WalletSnapshot,
        chain: Option<FundingChainNode>,
        cluster_id: Option<u32>,
        sniper: bool,
    ) -> WalletTrace {
        let mut trace = WalletTrace::new(analysis.id, &wallet.address, wallet.percentage, wallet.rank);
        trace.age_days = wallet.age_days;
        trace.first_tx_date = wallet.first_tx_date;
        trace.cluster_id = cluster_id;

        let mut flags = Vec::new();
        match &chain {
            Some(root) => {
                trace.wallet_type = root.address_type;
                flags.extend(root.collect_flags());
            }
            None => flags.push(RiskFlag::new(
                FlagKind::TraceUnavailable,
                "Funding data for this wallet could not be fetched",
            )),
        }

        let fresh_days = self.config.scoring.fresh_wallet_days;
        trace.is_fresh = wallet.age_days.map(|d| d < fresh_days).unwrap_or(false);
        if trace.is_fresh {
            flags.push(RiskFlag::new(
                FlagKind::FreshWallet,
                format!(
                    "Wallet is {} days old (fresh below {})",
                    wallet.age_days.unwrap_or(0),
                    fresh_days
                ),
            ));
        }
        if let Some(id) = cluster_id {
            flags.push(RiskFlag::new(
                FlagKind::Clustered,
                format!("Member of cluster {}", id),
            ));
        }
        if sniper {
            flags.push(RiskFlag::new(
                FlagKind::SniperEntry,
                "First acquisition shortly after launch",
            ));
        }

        trace.set_funding_chain(chain);
        trace.set_flags(flags);
        trace
    }

    /// Launch metadata; a failed lookup only disables launch-relative signals
    async fn fetch_token_info(&self, key: &TokenKey) -> TokenInfo {
        match self.client.token_info(&key.address, key.chain).await {
            Ok(info) => info,
            Err(e) => {
                warn!(token = %key, error = %e, "Token info unavailable, launch signals disabled");
                TokenInfo::default()
            }
        }
    }
}

fn invalid(err: anyhow::Error) -> HolderRiskError {
    HolderRiskError::InvalidInput(err.to_string())
}

fn validated_key(token: &str, chain: Chain) -> Result<TokenKey> {
    validate_address(token, chain).map_err(invalid)?;
    Ok(TokenKey::new(token, chain))
}

/// Reject snapshots that would corrupt every metric downstream
fn validate_snapshot(holders: &[HolderBalance], tolerance: f64) -> Result<()> {
    let mut seen = HashSet::with_capacity(holders.len());
    let mut total_pct = 0.0;

    for holder in holders {
        if !holder.balance.is_finite() || holder.balance < 0.0 {
            return Err(HolderRiskError::ComputationError(format!(
                "holder {} has invalid balance {}",
                holder.address, holder.balance
            )));
        }
        if !holder.percentage.is_finite() || holder.percentage < 0.0 || holder.percentage > 100.0 {
            return Err(HolderRiskError::ComputationError(format!(
                "holder {} has invalid percentage {}",
                holder.address, holder.percentage
            )));
        }
        if !seen.insert(holder.address.as_str()) {
            return Err(HolderRiskError::ComputationError(format!(
                "holder {} appears twice in the snapshot",
                holder.address
            )));
        }
        total_pct += holder.percentage;
    }

    if total_pct > 100.0 + tolerance {
        return Err(HolderRiskError::ComputationError(format!(
            "holder percentages sum to {:.4}",
            total_pct
        )));
    }
    Ok(())
}

/// Balance descending, address ascending on ties; ranks start at 1
fn rank_holders(mut holders: Vec<HolderBalance>) -> Vec<WalletSnapshot> {
    holders.sort_by(|a, b| {
        b.balance
            .total_cmp(&a.balance)
            .then_with(|| a.address.cmp(&b.address))
    });
    holders
        .into_iter()
        .enumerate()
        .map(|(i, h)| {
            let mut snapshot = WalletSnapshot::new(h.address, h.balance, h.percentage, i + 1);
            snapshot.first_acquired_at = h.first_acquired_at;
            snapshot
        })
        .collect()
}
