//! Command-line entry point for the holder risk engine
//!
//! Runs one analysis, deep trace or query against the configured gateway and
//! store, prints the result as JSON and exits.

use anyhow::{anyhow, Context, Result};
use holder_risk::config::{EngineConfig, StorageBackend};
use holder_risk::observability::{init_observability_with_level, ObservabilityConfig};
use holder_risk::{
    AnalysisOrchestrator, AnalysisRequest, AnalysisStore, Chain, HttpChainGateway,
    InMemoryAnalysisStore, SqliteAnalysisStore, TraceFilter, TraceQuery, TriggerOutcome,
};
use std::sync::Arc;

const TRACE_PAGE_SIZE: usize = 20;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        return Ok(());
    }

    let config = match EngineConfig::from_toml_file("config.toml") {
        Ok(c) => c,
        Err(e) => {
            if std::path::Path::new("config.toml").exists() {
                return Err(e.context("Invalid config.toml"));
            }
            let mut config = EngineConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            config
        }
    };

    let _observability_guard =
        init_observability_with_level(Some(ObservabilityConfig::default()), config.log_filter())
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to initialize observability: {}", e);
                eprintln!("Continuing without OpenTelemetry tracing...");
                holder_risk::observability::ObservabilityGuard
            });

    let orchestrator = Arc::new(build_orchestrator(config).await?);

    match args[1].as_str() {
        "analyze" => {
            if args.len() < 4 {
                eprintln!("Usage: {} analyze <chain> <token> [depth] [--force]", args[0]);
                return Ok(());
            }
            let chain = parse_chain(&args[2])?;
            let mut request = AnalysisRequest::new(&args[3], chain);
            for arg in &args[4..] {
                if arg == "--force" {
                    request = request.force_refresh();
                } else {
                    request = request.with_depth(arg.parse().context("Invalid depth")?);
                }
            }
            analyze(orchestrator, request).await?;
        }
        "trace" => {
            if args.len() < 5 {
                eprintln!("Usage: {} trace <chain> <token> <wallet> [depth]", args[0]);
                return Ok(());
            }
            let chain = parse_chain(&args[2])?;
            let depth = match args.get(5) {
                Some(d) => Some(d.parse::<u8>().context("Invalid depth")?),
                None => None,
            };
            let trace = orchestrator
                .deep_trace_wallet(&args[3], chain, &args[4], depth)
                .await?;
            println!("{}", serde_json::to_string_pretty(&trace)?);
        }
        "status" => {
            if args.len() < 4 {
                eprintln!("Usage: {} status <chain> <token>", args[0]);
                return Ok(());
            }
            let chain = parse_chain(&args[2])?;
            let analysis = orchestrator.status(&args[3], chain).await?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        "traces" => {
            if args.len() < 4 {
                eprintln!(
                    "Usage: {} traces <chain> <token> [all|suspicious|fresh|clustered] [page]",
                    args[0]
                );
                return Ok(());
            }
            let chain = parse_chain(&args[2])?;
            let filter = match args.get(4) {
                Some(f) => f.parse::<TraceFilter>()?,
                None => TraceFilter::All,
            };
            let page = match args.get(5) {
                Some(p) => p.parse::<usize>().context("Invalid page")?,
                None => 1,
            };
            let result = orchestrator
                .list_traces(&args[3], chain, &TraceQuery::page(filter, page, TRACE_PAGE_SIZE))
                .await?;
            println!("{} matching traces (page {})", result.total, page);
            for trace in &result.traces {
                println!(
                    "#{:<3} {} {:>7.3}% cluster={} flags={}{}",
                    trace.rank,
                    trace.address,
                    trace.percentage,
                    trace
                        .cluster_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    trace.risk_flag_count,
                    if trace.has_critical_flag { " CRITICAL" } else { "" }
                );
            }
        }
        _ => {
            print_usage(&args[0]);
        }
    }

    Ok(())
}

async fn build_orchestrator(config: EngineConfig) -> Result<AnalysisOrchestrator> {
    let gateway = Arc::new(HttpChainGateway::new(&config.gateway.http)?);
    let store: Arc<dyn AnalysisStore> = match config.storage.backend {
        StorageBackend::Sqlite => Arc::new(
            SqliteAnalysisStore::new(&config.storage.database_path, config.storage.pool_size)
                .await?,
        ),
        StorageBackend::Memory => Arc::new(InMemoryAnalysisStore::new()),
    };
    Ok(AnalysisOrchestrator::new(gateway, store, config))
}

async fn analyze(orchestrator: Arc<AnalysisOrchestrator>, request: AnalysisRequest) -> Result<()> {
    let token = request.token.clone();
    let chain = request.chain;
    let mut handle = orchestrator.spawn_analysis(request)?;

    let outcome = tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, cancelling analysis");
            orchestrator.cancel(&token, chain);
            handle.await?
        }
    };

    match outcome? {
        TriggerOutcome::Completed(analysis) => {
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        TriggerOutcome::AlreadyRunning => {
            println!("Analysis for {} is already running", token);
        }
    }
    Ok(())
}

fn parse_chain(s: &str) -> Result<Chain> {
    s.parse::<Chain>().map_err(|e| anyhow!(e))
}

fn print_usage(program: &str) {
    println!("Holder Risk Engine CLI");
    println!();
    println!("Usage:");
    println!("  {} analyze <chain> <token> [depth] [--force]", program);
    println!("      Run a full holder analysis");
    println!("  {} trace <chain> <token> <wallet> [depth]", program);
    println!("      Deep re-trace of one analyzed holder");
    println!("  {} status <chain> <token>", program);
    println!("      Show stored analysis status and metrics");
    println!("  {} traces <chain> <token> [all|suspicious|fresh|clustered] [page]", program);
    println!("      List wallet traces");
    println!();
    println!("Chains: ethereum, bsc, polygon, arbitrum, base, solana");
    println!("Reads config.toml from the working directory when present.");
}
