//! Store contract tests, run against both the in-memory and SQLite stores

use chrono::Utc;
use holder_risk::analysis::{
    ClusterSet, ClusterSummary, ConcentrationMetrics, FlagKind, GraphSummary, GraphView,
    ResultMap, RiskFlag, RiskScores, TemporalMetrics,
};
use holder_risk::storage::{AnalysisMetrics, TracePage};
use holder_risk::{
    AnalysisStatus, AnalysisStore, Chain, HolderAnalysis, InMemoryAnalysisStore,
    SqliteAnalysisStore, TokenKey, TraceFilter, TraceQuery, WalletTrace,
};
use std::sync::Arc;

async fn stores() -> Vec<(&'static str, Arc<dyn AnalysisStore>)> {
    let db_path = format!("/tmp/holder_risk_store_{}.db", rand::random::<u64>());
    let memory: Arc<dyn AnalysisStore> = Arc::new(InMemoryAnalysisStore::new());
    let sqlite: Arc<dyn AnalysisStore> =
        Arc::new(SqliteAnalysisStore::new(&db_path, 2).await.unwrap());
    vec![("memory", memory), ("sqlite", sqlite)]
}

fn metrics(gini: f64) -> AnalysisMetrics {
    AnalysisMetrics {
        concentration: ConcentrationMetrics {
            holder_count: 3,
            gini: Some(gini),
            ..Default::default()
        },
        scores: RiskScores::default(),
        temporal: TemporalMetrics::default(),
        cluster_summary: ClusterSummary::default(),
        graph_summary: GraphSummary::default(),
        clusters: ClusterSet::empty(uuid::Uuid::nil()),
        graph: GraphView::default(),
        results: ResultMap::new(),
    }
}

fn completed(running: &HolderAnalysis, gini: f64) -> HolderAnalysis {
    HolderAnalysis {
        status: AnalysisStatus::Completed,
        analyzed_at: Some(Utc::now()),
        last_error: None,
        metrics: Some(metrics(gini)),
        ..running.clone()
    }
}

fn traces(analysis: &HolderAnalysis, prefix: &str, n: usize) -> Vec<WalletTrace> {
    (0..n)
        .map(|i| {
            let mut t = WalletTrace::new(analysis.id, format!("{}{}", prefix, i), 10.0 - i as f64, i + 1);
            if i % 2 == 0 {
                t.is_fresh = true;
                t.push_flag(RiskFlag::new(FlagKind::FreshWallet, "fresh"));
            }
            if i % 3 == 0 {
                t.cluster_id = Some(1);
                t.push_flag(RiskFlag::new(FlagKind::Clustered, "cluster 1"));
            }
            t
        })
        .collect()
}

#[tokio::test]
async fn test_failed_run_keeps_previous_metrics() {
    for (name, store) in stores().await {
        let token = TokenKey::new("0x00000000000000000000000000000000000000aa", Chain::Ethereum);

        let running = store.mark_running(&token).await.unwrap();
        let done = completed(&running, 0.42);
        store
            .save_completed(&done, &traces(&done, "0xa", 3))
            .await
            .unwrap();

        let rerun = store.mark_running(&token).await.unwrap();
        assert_eq!(rerun.id, running.id, "{}: id must be stable per token", name);
        assert_eq!(rerun.status, AnalysisStatus::Running);

        store.mark_failed(&token, "gateway unavailable").await.unwrap();
        let failed = store.get_analysis(&token).await.unwrap().unwrap();
        assert_eq!(failed.status, AnalysisStatus::Failed, "{}", name);
        assert_eq!(failed.last_error.as_deref(), Some("gateway unavailable"));
        let kept = failed.metrics.expect("previous metrics retained");
        assert_eq!(kept.concentration.gini, Some(0.42), "{}", name);

        let page = store
            .list_traces(failed.id, &TraceQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 3, "{}: traces of the last completed run remain", name);
    }
}

#[tokio::test]
async fn test_rerun_replaces_all_traces() {
    for (name, store) in stores().await {
        let token = TokenKey::new("0x00000000000000000000000000000000000000bb", Chain::Base);
        let running = store.mark_running(&token).await.unwrap();
        let first = completed(&running, 0.1);
        store
            .save_completed(&first, &traces(&first, "0xold", 5))
            .await
            .unwrap();

        let running = store.mark_running(&token).await.unwrap();
        let second = completed(&running, 0.9);
        store
            .save_completed(&second, &traces(&second, "0xnew", 2))
            .await
            .unwrap();

        let page: TracePage = store
            .list_traces(second.id, &TraceQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2, "{}", name);
        assert!(page.traces.iter().all(|t| t.address.starts_with("0xnew")));
        assert!(store.get_trace(second.id, "0xold0").await.unwrap().is_none());

        let stored = store.get_analysis(&token).await.unwrap().unwrap();
        assert_eq!(stored.status, AnalysisStatus::Completed);
        assert_eq!(stored.metrics.unwrap().concentration.gini, Some(0.9));
    }
}

#[tokio::test]
async fn test_filters_and_pagination_agree() {
    for (name, store) in stores().await {
        let token = TokenKey::new("0x00000000000000000000000000000000000000cc", Chain::Bsc);
        let running = store.mark_running(&token).await.unwrap();
        let done = completed(&running, 0.5);
        let rows = traces(&done, "0xw", 12);
        store.save_completed(&done, &rows).await.unwrap();

        for filter in [
            TraceFilter::All,
            TraceFilter::Suspicious,
            TraceFilter::Fresh,
            TraceFilter::Clustered,
        ] {
            let expected: Vec<&WalletTrace> = rows.iter().filter(|t| filter.matches(t)).collect();
            let mut collected = Vec::new();
            let mut page = 1;
            loop {
                let result = store
                    .list_traces(done.id, &TraceQuery::page(filter, page, 5))
                    .await
                    .unwrap();
                assert_eq!(result.total, expected.len(), "{} {:?}", name, filter);
                if result.traces.is_empty() {
                    break;
                }
                collected.extend(result.traces);
                page += 1;
            }
            let ranks: Vec<usize> = collected.iter().map(|t| t.rank).collect();
            let expected_ranks: Vec<usize> = expected.iter().map(|t| t.rank).collect();
            assert_eq!(ranks, expected_ranks, "{} {:?}", name, filter);
        }
    }
}

#[tokio::test]
async fn test_trace_round_trips_every_field() {
    for (name, store) in stores().await {
        let token = TokenKey::new("0x00000000000000000000000000000000000000dd", Chain::Arbitrum);
        let running = store.mark_running(&token).await.unwrap();
        let done = completed(&running, 0.3);

        let mut row = WalletTrace::new(done.id, "0xfeed", 12.5, 1);
        row.age_days = Some(3);
        row.first_tx_date = Some(Utc::now());
        row.cluster_id = Some(4);
        row.is_fresh = true;
        row.set_flags(vec![
            RiskFlag::new(FlagKind::Mixer, "mixer in chain"),
            RiskFlag::new(FlagKind::FreshWallet, "fresh"),
        ]);
        store.save_completed(&done, &[row.clone()]).await.unwrap();

        let stored = store.get_trace(done.id, "0xfeed").await.unwrap().unwrap();
        assert_eq!(stored.risk_flag_count, stored.risk_flags.len(), "{}", name);
        assert!(stored.has_critical_flag);
        assert_eq!(stored.cluster_id, Some(4));
        assert_eq!(stored.age_days, Some(3));
        assert_eq!(stored.risk_flags, row.risk_flags);
    }
}

#[tokio::test]
async fn test_funding_update_from_stale_copy_keeps_current_row() {
    for (name, store) in stores().await {
        let token = TokenKey::new("0x00000000000000000000000000000000000000cc", Chain::Ethereum);
        let address = "0xstale0";

        let running = store.mark_running(&token).await.unwrap();
        let first = completed(&running, 0.2);
        let mut old_row = WalletTrace::new(first.id, address, 12.0, 1);
        old_row.cluster_id = Some(1);
        old_row.push_flag(RiskFlag::new(FlagKind::Clustered, "cluster 1"));
        store.save_completed(&first, &[old_row]).await.unwrap();
        let mut stale = store.get_trace(first.id, address).await.unwrap().unwrap();

        let running = store.mark_running(&token).await.unwrap();
        let second = completed(&running, 0.3);
        let mut new_row = WalletTrace::new(second.id, address, 8.0, 2);
        new_row.is_fresh = true;
        new_row.push_flag(RiskFlag::new(FlagKind::FreshWallet, "fresh"));
        store.save_completed(&second, &[new_row]).await.unwrap();

        stale.push_flag(RiskFlag::new(FlagKind::Mixer, "mixer"));
        assert!(store.update_trace_funding(&stale).await.unwrap(), "{}", name);

        let row = store.get_trace(second.id, address).await.unwrap().unwrap();
        let kinds: Vec<FlagKind> = row.risk_flags.iter().map(|f| f.kind).collect();
        assert_eq!(row.cluster_id, None, "{}", name);
        assert_eq!(row.rank, 2, "{}", name);
        assert!(kinds.contains(&FlagKind::FreshWallet), "{}: {:?}", name, kinds);
        assert!(kinds.contains(&FlagKind::Mixer), "{}: {:?}", name, kinds);
        assert!(!kinds.contains(&FlagKind::Clustered), "{}: {:?}", name, kinds);
        assert_eq!(row.risk_flag_count, 2, "{}", name);
        assert!(row.has_critical_flag, "{}", name);
    }
}
