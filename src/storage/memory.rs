//! In-memory analysis store for tests and single-process runs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    AnalysisStatus, AnalysisStore, HolderAnalysis, TracePage, TraceQuery, WalletTrace,
};
use crate::types::TokenKey;

#[derive(Default)]
struct Inner {
    analyses: HashMap<TokenKey, HolderAnalysis>,
    /// analysis id -> traces in rank order
    traces: HashMap<Uuid, Vec<WalletTrace>>,
}

/// Single lock over both tables so a completed save is atomic
#[derive(Default)]
pub struct InMemoryAnalysisStore {
    inner: RwLock<Inner>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn get_analysis(&self, token: &TokenKey) -> Result<Option<HolderAnalysis>> {
        Ok(self.inner.read().await.analyses.get(token).cloned())
    }

    async fn mark_running(&self, token: &TokenKey) -> Result<HolderAnalysis> {
        let mut inner = self.inner.write().await;
        let analysis = inner
            .analyses
            .entry(token.clone())
            .or_insert_with(|| HolderAnalysis {
                id: Uuid::new_v4(),
                ..HolderAnalysis::not_started(token.clone())
            });
        analysis.status = AnalysisStatus::Running;
        analysis.last_error = None;
        Ok(analysis.clone())
    }

    async fn mark_failed(&self, token: &TokenKey, error: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let analysis = inner
            .analyses
            .get_mut(token)
            .ok_or_else(|| anyhow!("No analysis row for {}", token))?;
        analysis.status = AnalysisStatus::Failed;
        analysis.last_error = Some(error.to_string());
        Ok(())
    }

    async fn save_completed(
        &self,
        analysis: &HolderAnalysis,
        traces: &[WalletTrace],
    ) -> Result<()> {
        let mut sorted = traces.to_vec();
        sorted.sort_by_key(|t| t.rank);

        let mut inner = self.inner.write().await;
        inner
            .analyses
            .insert(analysis.token.clone(), analysis.clone());
        inner.traces.insert(analysis.id, sorted);
        debug!(token = %analysis.token, traces = traces.len(), "Saved completed analysis");
        Ok(())
    }

    async fn list_traces(&self, analysis_id: Uuid, query: &TraceQuery) -> Result<TracePage> {
        let inner = self.inner.read().await;
        let Some(traces) = inner.traces.get(&analysis_id) else {
            return Ok(TracePage::default());
        };

        let matching: Vec<&WalletTrace> =
            traces.iter().filter(|t| query.filter.matches(t)).collect();
        Ok(TracePage {
            total: matching.len(),
            traces: matching
                .into_iter()
                .skip(query.offset)
                .take(query.limit)
                .cloned()
                .collect(),
        })
    }

    async fn get_trace(&self, analysis_id: Uuid, address: &str) -> Result<Option<WalletTrace>> {
        let inner = self.inner.read().await;
        Ok(inner
            .traces
            .get(&analysis_id)
            .and_then(|traces| traces.iter().find(|t| t.address == address))
            .cloned())
    }

    async fn update_trace_funding(&self, trace: &WalletTrace) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(row) = inner
            .traces
            .get_mut(&trace.analysis_id)
            .and_then(|traces| traces.iter_mut().find(|t| t.address == trace.address))
        else {
            return Ok(false);
        };

        row.merge_funding(trace);
        Ok(true)
    }
}
