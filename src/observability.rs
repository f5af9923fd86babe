//! Observability module - tracing subscriber, OpenTelemetry export and metrics
//!
//! This module provides observability for the holder risk engine using:
//! - `tracing-subscriber` with an env filter and fmt layer
//! - OpenTelemetry OTLP export (optional) for distributed traces
//! - Prometheus counters for analysis runs and gateway traffic
//!
//! # Usage
//! ```no_run
//! use holder_risk::observability::init_observability;
//!
//! #[tokio::main]
//! async fn main() {
//!     let _guard = init_observability(None).expect("Failed to initialize observability");
//!     // Guard will flush traces on drop
//! }
//! ```

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::{
    runtime,
    trace::{Config, RandomIdGenerator, Sampler, Tracer},
    Resource,
};
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Configuration for the observability system
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub service_version: String,
    /// Environment (dev, staging, prod)
    pub environment: String,
    /// OTLP endpoint for traces (e.g., "http://localhost:4317")
    pub otlp_endpoint: String,
    pub enable_tracing: bool,
    /// Sampling ratio (0.0 to 1.0)
    pub sampling_ratio: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "holder-risk".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()),
            otlp_endpoint: std::env::var("OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_tracing: std::env::var("ENABLE_TRACING")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            sampling_ratio: std::env::var("TRACE_SAMPLING_RATIO")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
        }
    }
}

/// Guard that ensures proper cleanup of OpenTelemetry resources
pub struct ObservabilityGuard;

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        global::shutdown_tracer_provider();
    }
}

/// Initialize the tracing subscriber and, if enabled, OTLP trace export.
///
/// `default_level` seeds the env filter when `RUST_LOG` is not set.
pub fn init_observability(config: Option<ObservabilityConfig>) -> Result<ObservabilityGuard> {
    init_observability_with_level(config, "info")
}

pub fn init_observability_with_level(
    config: Option<ObservabilityConfig>,
    default_level: &str,
) -> Result<ObservabilityGuard> {
    let config = config.unwrap_or_default();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if config.enable_tracing {
        let resource = Resource::new(vec![
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", config.service_version.clone()),
            KeyValue::new("deployment.environment", config.environment.clone()),
        ]);
        let tracer = init_tracing(&config, resource)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(telemetry_layer)
            .try_init()
            .context("Failed to initialize tracing subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("Failed to initialize tracing subscriber")?;
    }

    tracing::info!(
        "Observability initialized: service={}, version={}, environment={}, tracing={}",
        config.service_name,
        config.service_version,
        config.environment,
        config.enable_tracing
    );

    Ok(ObservabilityGuard)
}

/// Initialize OpenTelemetry tracing with OTLP exporter
fn init_tracing(config: &ObservabilityConfig, resource: Resource) -> Result<Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(&config.otlp_endpoint)
        .with_protocol(Protocol::Grpc)
        .with_timeout(Duration::from_secs(3));

    let tracer_provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            Config::default()
                .with_sampler(Sampler::TraceIdRatioBased(config.sampling_ratio))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .install_batch(runtime::Tokio)
        .context("Failed to install OTLP tracer")?;

    let tracer = tracer_provider.tracer("holder-risk");
    global::set_tracer_provider(tracer_provider);

    Ok(tracer)
}

/// Prometheus collectors for the engine
#[derive(Clone)]
pub struct EngineMetrics {
    pub analyses_started: IntCounter,
    pub analyses_completed: IntCounter,
    pub analyses_failed: IntCounter,
    /// Triggers rejected because a run for the same token was in flight
    pub analyses_rejected: IntCounter,
    pub analyses_in_flight: IntGauge,
    pub gateway_calls: IntCounterVec,
    pub gateway_failures: IntCounterVec,
    pub cache_hits: IntCounterVec,
    pub traces_truncated: IntCounter,
    registry: Registry,
}

impl EngineMetrics {
    /// Register all collectors on `registry`.
    ///
    /// A collector that fails to register is replaced by an unregistered one
    /// so metric calls never panic.
    pub fn new(registry: Registry) -> Self {
        let counter = |name: &str, help: &str| {
            register_int_counter_with_registry!(Opts::new(name, help), &registry).unwrap_or_else(
                |e| {
                    warn!(error = %e, metric = name, "Failed to register counter, using fallback");
                    fallback_counter(name)
                },
            )
        };
        let counter_vec = |name: &str, help: &str, label: &str| {
            register_int_counter_vec_with_registry!(Opts::new(name, help), &[label], &registry)
                .unwrap_or_else(|e| {
                    warn!(error = %e, metric = name, "Failed to register counter vec, using fallback");
                    fallback_counter_vec(name, label)
                })
        };

        let analyses_in_flight = register_int_gauge_with_registry!(
            Opts::new(
                "holder_risk_analyses_in_flight",
                "Number of analyses currently running"
            ),
            &registry
        )
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to register in-flight gauge, using fallback");
            fallback_gauge("holder_risk_analyses_in_flight")
        });

        Self {
            analyses_started: counter(
                "holder_risk_analyses_started_total",
                "Analyses that entered RUNNING",
            ),
            analyses_completed: counter(
                "holder_risk_analyses_completed_total",
                "Analyses that reached COMPLETED",
            ),
            analyses_failed: counter(
                "holder_risk_analyses_failed_total",
                "Analyses that ended FAILED",
            ),
            analyses_rejected: counter(
                "holder_risk_analyses_rejected_total",
                "Triggers ignored because the token was already running",
            ),
            analyses_in_flight,
            gateway_calls: counter_vec(
                "holder_risk_gateway_calls_total",
                "Chain data gateway calls by operation",
                "op",
            ),
            gateway_failures: counter_vec(
                "holder_risk_gateway_failures_total",
                "Gateway calls that failed after retries",
                "op",
            ),
            cache_hits: counter_vec(
                "holder_risk_cache_hits_total",
                "Gateway cache hits by cache",
                "cache",
            ),
            traces_truncated: counter(
                "holder_risk_traces_truncated_total",
                "Funding trace branches truncated by lookup failures",
            ),
            registry,
        }
    }

    pub fn gateway_call(&self, op: &str) {
        self.gateway_calls.with_label_values(&[op]).inc();
    }

    pub fn gateway_failure(&self, op: &str) {
        self.gateway_failures.with_label_values(&[op]).inc();
    }

    pub fn cache_hit(&self, cache: &str) {
        self.cache_hits.with_label_values(&[cache]).inc();
    }

    /// Encode the registry in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}

fn fallback_counter(name: &str) -> IntCounter {
    IntCounter::new(format!("{}_fallback", name), "fallback counter")
        .unwrap_or_else(|_| unreachable_counter())
}

fn fallback_counter_vec(name: &str, label: &str) -> IntCounterVec {
    IntCounterVec::new(
        Opts::new(format!("{}_fallback", name), "fallback counter vec"),
        &[label],
    )
    .unwrap_or_else(|_| {
        IntCounterVec::new(Opts::new("holder_risk_fallback_vec", "fallback"), &["label"])
            .expect("static fallback counter vec is valid")
    })
}

fn fallback_gauge(name: &str) -> IntGauge {
    IntGauge::new(format!("{}_fallback", name), "fallback gauge").unwrap_or_else(|_| {
        IntGauge::new("holder_risk_fallback_gauge", "fallback")
            .expect("static fallback gauge is valid")
    })
}

fn unreachable_counter() -> IntCounter {
    IntCounter::new("holder_risk_fallback_counter", "fallback")
        .expect("static fallback counter is valid")
}
