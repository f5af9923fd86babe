//! Funding Chain Tracer
//!
//! Walks backward from a wallet through its earliest inbound funding
//! transfers, building a per-wallet provenance tree.
//!
//! A branch stops expanding when:
//! - the depth limit is reached
//! - the sender is an exchange or DEX hub
//! - the sender is already on the current path
//! - the sender has no inbound funding
//! - the sender's lookup failed after retries (branch is marked truncated)
//!
//! Only a failed funding lookup for the root itself is an error.

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

use super::types::{FlagKind, FundingChainNode, RiskFlag, StopReason};
use crate::error::{HolderRiskError, Result};
use crate::gateway::{FundingSource, GatewayClient};
use crate::security::MAX_TRACE_DEPTH;
use crate::types::{AddressType, Chain};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Depth used when a request does not name one
    pub default_depth: u8,
    /// Funding sources expanded per node in a regular run
    pub branching: usize,
    /// Funding sources expanded per node in an operator deep trace
    pub deep_trace_branching: usize,
    /// Funding that lands at most this many seconds before launch counts as
    /// coordinated pre-funding
    pub prefunding_window_secs: i64,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            default_depth: 4,
            branching: 1,
            deep_trace_branching: 3,
            prefunding_window_secs: 3600,
        }
    }
}

/// Per-trace inputs that are not part of the tracer configuration
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    pub launch_at: Option<DateTime<Utc>>,
    pub creator: Option<String>,
    pub force_refresh: bool,
    /// Overrides `TracerConfig::branching` when set
    pub branching: Option<usize>,
}

pub struct FundingTracer {
    client: GatewayClient,
    config: TracerConfig,
}

impl FundingTracer {
    pub fn new(client: GatewayClient, config: TracerConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Trace the funding provenance of `address` up to `max_depth` hops.
    #[instrument(skip(self, options), fields(chain = %chain))]
    pub async fn trace_funding_chain(
        &self,
        address: &str,
        chain: Chain,
        max_depth: u8,
        options: &TraceOptions,
    ) -> Result<FundingChainNode> {
        if max_depth == 0 || max_depth > MAX_TRACE_DEPTH {
            return Err(HolderRiskError::InvalidInput(format!(
                "trace depth {} outside 1..={}",
                max_depth, MAX_TRACE_DEPTH
            )));
        }

        let branching = options
            .branching
            .unwrap_or(self.config.branching)
            .max(1);
        let walk = Walk {
            chain,
            max_depth,
            branching,
            options,
            prefunding_window: Duration::seconds(self.config.prefunding_window_secs),
        };

        let mut path = HashSet::new();
        let root = self
            .visit(&walk, address.to_string(), 0, None, &mut path)
            .await?;

        debug!(
            address,
            depth_reached = root.max_depth(),
            nodes = root.nodes().len(),
            "Funding chain traced"
        );
        Ok(root)
    }

    fn visit<'s, 'p>(
        &'s self,
        walk: &'s Walk<'s>,
        address: String,
        depth: u8,
        incoming: Option<FundingSource>,
        path: &'p mut HashSet<String>,
    ) -> BoxFuture<'p, Result<FundingChainNode>>
    where
        's: 'p,
    {
        async move {
            let mut node = self
                .describe(walk, &address, depth, incoming.as_ref())
                .await;

            if depth > 0 && path.contains(&address) {
                node.stop_reason = Some(StopReason::Cycle);
                return Ok(node);
            }
            if depth > 0 && node.address_type.is_hub() {
                node.stop_reason = Some(StopReason::ExchangeHub);
                return Ok(node);
            }
            if depth >= walk.max_depth {
                node.stop_reason = Some(StopReason::DepthLimit);
                return Ok(node);
            }

            let sources = match self
                .client
                .funding_sources(&address, walk.chain, walk.branching, walk.options.force_refresh)
                .await
            {
                Ok(sources) => sources,
                Err(e) if depth == 0 => return Err(e),
                Err(e) => {
                    let partial = HolderRiskError::PartialTraceFailure {
                        address: address.clone(),
                        detail: e.to_string(),
                    };
                    warn!(depth, error = %partial, "Funding lookup failed, truncating branch");
                    self.client.metrics().traces_truncated.inc();
                    node.flags
                        .push(RiskFlag::new(FlagKind::TraceTruncated, partial.to_string()));
                    node.stop_reason = Some(StopReason::LookupFailed);
                    return Ok(node);
                }
            };

            if sources.is_empty() {
                node.stop_reason = Some(StopReason::NoFunding);
                return Ok(node);
            }

            path.insert(address.clone());
            for source in sources {
                let sender = source.sender.clone();
                let child = self
                    .visit(walk, sender, depth + 1, Some(source), &mut *path)
                    .await?;
                node.children.push(child);
            }
            path.remove(&address);

            Ok(node)
        }
        .boxed()
    }

    /// Classify `address` and attach the flags that depend only on the node
    async fn describe(
        &self,
        walk: &Walk<'_>,
        address: &str,
        depth: u8,
        incoming: Option<&FundingSource>,
    ) -> FundingChainNode {
        let (address_type, label) = match self
            .client
            .classify(address, walk.chain, walk.options.force_refresh)
            .await
        {
            Ok(class) if class.address_type == AddressType::Unknown => (
                incoming.map(|s| s.sender_type).unwrap_or_default(),
                class.name,
            ),
            Ok(class) => (class.address_type, class.name),
            Err(e) => {
                debug!(address, error = %e, "Classification failed, using reported type");
                (incoming.map(|s| s.sender_type).unwrap_or_default(), None)
            }
        };

        let mut flags = Vec::new();
        if address_type == AddressType::Mixer {
            flags.push(RiskFlag::new(
                FlagKind::Mixer,
                format!("{} is a mixer", label.as_deref().unwrap_or(address)),
            ));
        }
        if let Some(creator) = &walk.options.creator {
            if creator.eq_ignore_ascii_case(address) {
                flags.push(RiskFlag::new(
                    FlagKind::CreatorLinked,
                    format!("{} is the token creator", address),
                ));
            }
        }
        if let (Some(source), Some(launch)) = (incoming, walk.options.launch_at) {
            if source.timestamp <= launch && launch - source.timestamp <= walk.prefunding_window {
                flags.push(RiskFlag::new(
                    FlagKind::PreLaunchFunding,
                    format!(
                        "funding sent {}s before launch",
                        (launch - source.timestamp).num_seconds()
                    ),
                ));
            }
        }

        FundingChainNode {
            address: address.to_string(),
            address_type,
            label,
            flags,
            funded_at: incoming.map(|s| s.timestamp),
            amount: incoming.and_then(|s| s.amount),
            depth,
            stop_reason: None,
            children: Vec::new(),
        }
    }
}

struct Walk<'a> {
    chain: Chain,
    max_depth: u8,
    branching: usize,
    options: &'a TraceOptions,
    prefunding_window: Duration,
}
