//! Engine configuration
//!
//! One TOML document with a section per component. Every section defaults
//! independently, so a partial file is valid. Secrets and deployment paths
//! can be overridden from the environment.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::analysis::{ClusterConfig, GraphConfig, ScoringConfig, TracerConfig};
use crate::gateway::{GatewayCacheConfig, HttpGatewayConfig};
use crate::security::{validate_gateway_url, validate_range, validate_trace_depth};
use crate::utils::RetryPolicy;

/// Main configuration for the holder risk engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gateway: GatewayConfig,
    pub analysis: AnalysisConfig,
    pub tracer: TracerConfig,
    pub cluster: ClusterConfig,
    pub scoring: ScoringConfig,
    pub graph: GraphConfig,
    pub storage: StorageConfig,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            analysis: AnalysisConfig::default(),
            tracer: TracerConfig::default(),
            cluster: ClusterConfig::default(),
            scoring: ScoringConfig::default(),
            graph: GraphConfig::default(),
            storage: StorageConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub http: HttpGatewayConfig,
    pub retry: RetryPolicy,
    pub cache: GatewayCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Top holders that get traced and scored
    pub top_n: usize,
    /// Concurrent per-holder gateway work
    pub batch_size: usize,
    /// Allowed excess over 100% when summing snapshot percentages
    pub percentage_tolerance: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            top_n: 50,
            batch_size: 5,
            percentage_tolerance: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_path: String,
    pub pool_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_path: "holder_risk.db".to_string(),
            pool_size: 5,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: EngineConfig = toml::from_str(&contents)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override with environment variables if present (for secrets)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("GATEWAY_URL") {
            self.gateway.http.base_url = url;
        }
        if let Ok(key) = std::env::var("GATEWAY_API_KEY") {
            if !key.is_empty() {
                self.gateway.http.api_key = Some(key);
            }
        }
        if let Ok(path) = std::env::var("HOLDER_RISK_DB") {
            self.storage.database_path = path;
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_gateway_url(&self.gateway.http.base_url)?;
        validate_trace_depth(self.tracer.default_depth)?;

        if self.analysis.batch_size == 0 {
            return Err(anyhow!("analysis.batch_size must be at least 1"));
        }
        if self.analysis.top_n == 0 {
            return Err(anyhow!("analysis.top_n must be at least 1"));
        }
        if self.tracer.branching == 0 || self.tracer.deep_trace_branching == 0 {
            return Err(anyhow!("tracer branching must be at least 1"));
        }
        if self.gateway.retry.timeout_ms == 0 {
            return Err(anyhow!("gateway.retry.timeout_ms must be positive"));
        }
        if self.storage.pool_size == 0 {
            return Err(anyhow!("storage.pool_size must be at least 1"));
        }

        validate_range(
            "analysis.percentage_tolerance",
            self.analysis.percentage_tolerance,
            0.0,
            10.0,
        )?;
        validate_range(
            "cluster.amount_tolerance_pct",
            self.cluster.amount_tolerance_pct,
            0.0,
            100.0,
        )?;
        validate_range(
            "cluster.suspicious_supply_pct",
            self.cluster.suspicious_supply_pct,
            0.0,
            100.0,
        )?;
        validate_range("graph.hub_sigma", self.graph.hub_sigma, 0.0, 10.0)?;

        if self.scoring.paper_hands_days > self.scoring.diamond_hands_days {
            return Err(anyhow!(
                "scoring.paper_hands_days ({}) exceeds diamond_hands_days ({})",
                self.scoring.paper_hands_days,
                self.scoring.diamond_hands_days
            ));
        }
        Ok(())
    }

    /// `log_level`, falling back to `info`
    pub fn log_filter(&self) -> &str {
        match self.log_level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "warn" => "warn",
            "error" => "error",
            _ => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analysis.top_n, 50);
        assert_eq!(config.analysis.batch_size, 5);
        assert_eq!(config.tracer.default_depth, 4);
        assert_eq!(config.gateway.retry.max_attempts(), 3);
        assert_eq!(config.log_filter(), "info");
    }

    #[test]
    fn test_partial_toml() {
        let toml = r#"
            log_level = "debug"

            [tracer]
            default_depth = 6

            [cluster]
            similarity_enabled = false
        "#;
        let config: EngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.tracer.default_depth, 6);
        assert_eq!(config.tracer.deep_trace_branching, 3);
        assert!(!config.cluster.similarity_enabled);
        assert_eq!(config.analysis.batch_size, 5);
        assert_eq!(config.log_filter(), "debug");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.tracer.default_depth = 9;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.analysis.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.gateway.http.base_url = "http://explorer.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_file_round_trip() {
        let path = format!("/tmp/holder_risk_config_{}.toml", rand::random::<u64>());
        let mut config = EngineConfig::default();
        config.analysis.top_n = 25;
        config.to_toml_file(&path).unwrap();

        let loaded = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded.analysis.top_n, 25);
        let _ = std::fs::remove_file(&path);
    }
}
