//! Integration tests for composite risk scores and temporal signals

use chrono::{DateTime, Duration, TimeZone, Utc};
use holder_risk::analysis::{
    compute_risk_scores, Cluster, ClusterSet, FlagKind, FundingChainNode, RiskFlag, ScoringConfig,
    TemporalData, WalletSnapshot,
};
use holder_risk::AddressType;
use std::collections::HashMap;
use uuid::Uuid;

fn launch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

fn wallet(address: &str, pct: f64, rank: usize) -> WalletSnapshot {
    WalletSnapshot::new(address, pct, pct, rank)
}

fn cluster(id: u32, members: &[&str], total: f64, suspicious: bool) -> Cluster {
    Cluster {
        id,
        members: members.iter().map(|m| m.to_string()).collect(),
        size: members.len(),
        shared_funding_source: None,
        total_percentage: total,
        suspicious,
    }
}

fn root_with_flagged_source(holder: &str, source: &str, kind: FlagKind) -> FundingChainNode {
    let child = FundingChainNode {
        address: source.to_string(),
        address_type: AddressType::Unknown,
        label: None,
        flags: vec![RiskFlag::new(kind, "test")],
        funded_at: Some(launch() - Duration::minutes(10)),
        amount: None,
        depth: 1,
        stop_reason: None,
        children: Vec::new(),
    };
    FundingChainNode {
        address: holder.to_string(),
        address_type: AddressType::Unknown,
        label: None,
        flags: Vec::new(),
        funded_at: None,
        amount: None,
        depth: 0,
        stop_reason: None,
        children: vec![child],
    }
}

fn at_launch(days: i64) -> TemporalData {
    TemporalData {
        now: launch() + Duration::days(days),
        launch_at: Some(launch()),
    }
}

#[test]
fn test_sybil_grows_with_clustered_supply() {
    let wallets: Vec<WalletSnapshot> = (0..10)
        .map(|i| wallet(&format!("w{}", i), 10.0, i + 1))
        .collect();
    let traces = HashMap::new();
    let config = ScoringConfig::default();

    let none = ClusterSet::empty(Uuid::nil());
    let small = ClusterSet {
        run_id: Uuid::nil(),
        clusters: vec![cluster(1, &["w0", "w1"], 20.0, true)],
    };
    let large = ClusterSet {
        run_id: Uuid::nil(),
        clusters: vec![
            cluster(1, &["w0", "w1", "w2", "w3"], 40.0, true),
            cluster(2, &["w4", "w5", "w6"], 30.0, true),
        ],
    };

    let s0 = compute_risk_scores(&wallets, &none, &traces, &at_launch(10), &config).scores;
    let s1 = compute_risk_scores(&wallets, &small, &traces, &at_launch(10), &config).scores;
    let s2 = compute_risk_scores(&wallets, &large, &traces, &at_launch(10), &config).scores;

    assert_eq!(s0.sybil_score, 0.0);
    // 70 * 0.2 + 30 * 1/5
    assert!((s1.sybil_score - 20.0).abs() < 1e-9);
    // 70 * 0.7 + 30 * 2/5
    assert!((s2.sybil_score - 61.0).abs() < 1e-9);
}

#[test]
fn test_insider_from_flags_and_early_acquisition() {
    let mut wallets = vec![
        wallet("creator_funded", 30.0, 1),
        wallet("early_bird", 20.0, 2),
        wallet("retail", 50.0, 3),
    ];
    wallets[1].first_acquired_at = Some(launch() - Duration::hours(1));
    wallets[2].first_acquired_at = Some(launch() + Duration::hours(5));

    let mut traces = HashMap::new();
    traces.insert(
        "creator_funded".to_string(),
        root_with_flagged_source("creator_funded", "deployer", FlagKind::CreatorLinked),
    );

    let assessment = compute_risk_scores(
        &wallets,
        &ClusterSet::empty(Uuid::nil()),
        &traces,
        &at_launch(3),
        &ScoringConfig::default(),
    );
    assert!((assessment.scores.insider_score - 50.0).abs() < 1e-9);
    assert_eq!(assessment.insiders, vec!["creator_funded", "early_bird"]);
}

#[test]
fn test_exit_risk_combines_paper_hands_and_top10() {
    let mut wallets = vec![wallet("a", 60.0, 1), wallet("b", 40.0, 2)];
    // a bought two days ago: paper hands; b has held for sixty days
    wallets[0].first_acquired_at = Some(launch() + Duration::days(58));
    wallets[1].first_acquired_at = Some(launch());

    let assessment = compute_risk_scores(
        &wallets,
        &ClusterSet::empty(Uuid::nil()),
        &HashMap::new(),
        &at_launch(60),
        &ScoringConfig::default(),
    );
    // 0.6 * 60 + 0.4 * 100
    assert!((assessment.scores.exit_risk_score - 76.0).abs() < 1e-9);
    assert_eq!(assessment.temporal.paper_hands_ratio, Some(0.5));
    assert_eq!(assessment.temporal.diamond_hands_ratio, Some(0.5));
    assert_eq!(assessment.temporal.avg_holding_days, Some(31.0));
}

#[test]
fn test_sniping_versus_coordinated_entry() {
    let mut wallets = vec![
        wallet("solo_sniper", 10.0, 1),
        wallet("ring_a", 10.0, 2),
        wallet("ring_b", 10.0, 3),
        wallet("late", 10.0, 4),
    ];
    wallets[0].first_acquired_at = Some(launch() + Duration::seconds(12));
    wallets[1].first_acquired_at = Some(launch() + Duration::seconds(20));
    wallets[2].first_acquired_at = Some(launch() + Duration::seconds(50));
    wallets[3].first_acquired_at = Some(launch() + Duration::hours(6));

    let clusters = ClusterSet {
        run_id: Uuid::nil(),
        clusters: vec![cluster(1, &["ring_a", "ring_b"], 20.0, true)],
    };
    let assessment = compute_risk_scores(
        &wallets,
        &clusters,
        &HashMap::new(),
        &at_launch(1),
        &ScoringConfig::default(),
    );

    assert_eq!(assessment.temporal.snipers, vec!["solo_sniper"]);
    assert_eq!(assessment.temporal.sniper_count, 1);
    assert_eq!(assessment.temporal.coordinated_wallets, vec!["ring_a", "ring_b"]);
    assert!((assessment.temporal.coordinated_buying_pct - 50.0).abs() < 1e-9);
}

#[test]
fn test_no_launch_time_means_no_snipers() {
    let mut wallets = vec![wallet("a", 50.0, 1)];
    wallets[0].first_acquired_at = Some(launch());
    let temporal = TemporalData {
        now: launch() + Duration::days(1),
        launch_at: None,
    };
    let assessment = compute_risk_scores(
        &wallets,
        &ClusterSet::empty(Uuid::nil()),
        &HashMap::new(),
        &temporal,
        &ScoringConfig::default(),
    );
    assert_eq!(assessment.temporal.sniper_count, 0);
    assert_eq!(assessment.scores.insider_score, 0.0);
}

#[test]
fn test_scores_are_bounded_and_pure() {
    let mut wallets: Vec<WalletSnapshot> = (0..20)
        .map(|i| {
            let mut w = wallet(&format!("w{:02}", i), 5.0, i + 1);
            w.age_days = Some(if i % 2 == 0 { 400 } else { 2 });
            w.tx_count = Some(120);
            w.first_acquired_at = Some(launch() + Duration::seconds(i as i64 * 30));
            w
        })
        .collect();
    wallets[3].tx_count = None;

    let clusters = ClusterSet {
        run_id: Uuid::nil(),
        clusters: vec![cluster(1, &["w00", "w01", "w02", "w03", "w04"], 25.0, true)],
    };
    let traces = HashMap::new();
    let config = ScoringConfig::default();

    let first = compute_risk_scores(&wallets, &clusters, &traces, &at_launch(2), &config);
    let second = compute_risk_scores(&wallets, &clusters, &traces, &at_launch(2), &config);
    assert_eq!(first, second);

    for score in [
        first.scores.sybil_score,
        first.scores.insider_score,
        first.scores.exit_risk_score,
        first.scores.smart_money_ratio,
        first.temporal.coordinated_buying_pct,
    ] {
        assert!((0.0..=100.0).contains(&score), "score {} out of range", score);
    }
    assert!(first.scores.smart_money_ratio > 0.0);
}

#[test]
fn test_zero_scores_serialize_as_positive_zero() {
    // Holders with no insider signal, no established history and no clusters
    let wallets = vec![wallet("a", 30.0, 1), wallet("b", 20.0, 2)];
    let assessment = compute_risk_scores(
        &wallets,
        &ClusterSet::empty(Uuid::nil()),
        &HashMap::new(),
        &at_launch(1),
        &ScoringConfig::default(),
    );

    for score in [
        assessment.scores.sybil_score,
        assessment.scores.insider_score,
        assessment.scores.smart_money_ratio,
        assessment.temporal.coordinated_buying_pct,
    ] {
        assert_eq!(score, 0.0);
        assert!(score.is_sign_positive());
    }
    let json = serde_json::to_string(&assessment.scores).unwrap();
    assert!(!json.contains("-0"), "{}", json);
}
