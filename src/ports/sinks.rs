//! Outbound Ports
//!
//! Interfaces to the collaborators downstream of the funnel: the alerting
//! channel (ranked scored tokens) and the observability channel (cycle
//! summaries).

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::{Address, Label, MergedToken, Metric, Provider, RejectReason, Stage, TokenFlag};

/// One ranked token handed to the alerting collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredToken {
    pub address: Address,
    pub score: Option<f64>,
    pub stage: Stage,
    pub sources: BTreeSet<Provider>,
    pub normalized_metrics: BTreeMap<Metric, f64>,
    pub labels: BTreeMap<Label, String>,
    pub flags: BTreeSet<TokenFlag>,
}

impl ScoredToken {
    pub fn is_high_conviction(&self) -> bool {
        self.flags.contains(&TokenFlag::HighConviction)
    }

    pub fn is_partial(&self) -> bool {
        self.flags.contains(&TokenFlag::CycleTimeout)
    }
}

impl From<&MergedToken> for ScoredToken {
    fn from(token: &MergedToken) -> Self {
        Self {
            address: token.address.clone(),
            score: token.score(),
            stage: token.stage(),
            sources: token.sources.clone(),
            normalized_metrics: token.normalized_metrics.clone(),
            labels: token.labels.clone(),
            flags: token.flags.clone(),
        }
    }
}

/// Why a cycle was abandoned
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    InvalidConfiguration(String),
    AllProvidersUnreachable,
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed,
    TimedOut,
    Aborted { cause: AbortReason },
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Completed => f.write_str("completed"),
            CycleOutcome::TimedOut => f.write_str("timed out"),
            CycleOutcome::Aborted { cause: AbortReason::InvalidConfiguration(detail) } => {
                write!(f, "aborted (invalid configuration: {})", detail)
            }
            CycleOutcome::Aborted { cause: AbortReason::AllProvidersUnreachable } => {
                f.write_str("aborted (all providers unreachable)")
            }
        }
    }
}

/// Per-cycle report for the observability collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub outcome: CycleOutcome,
    pub tokens_discovered: usize,
    /// Stage the token was in when rejected -> count
    pub tokens_rejected_by_stage: BTreeMap<String, usize>,
    pub rejected_by_reason: BTreeMap<RejectReason, usize>,
    pub tokens_fully_scored: usize,
    pub high_conviction: usize,
    pub partial_results: usize,
    pub total_cost: u64,
    pub cache_hit_rate: f64,
    pub provider_error_counts: BTreeMap<Provider, u64>,
    pub budget_alerts: Vec<u8>,
    pub duration_ms: u64,
}

impl CycleSummary {
    pub fn empty(cycle: u64, outcome: CycleOutcome) -> Self {
        Self {
            cycle,
            outcome,
            tokens_discovered: 0,
            tokens_rejected_by_stage: BTreeMap::new(),
            rejected_by_reason: BTreeMap::new(),
            tokens_fully_scored: 0,
            high_conviction: 0,
            partial_results: 0,
            total_cost: 0,
            cache_hit_rate: 0.0,
            provider_error_counts: BTreeMap::new(),
            budget_alerts: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn total_rejected(&self) -> usize {
        self.rejected_by_reason.values().sum()
    }
}

/// Consumer of the ranked scored-token list, once per cycle
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish(&self, tokens: &[ScoredToken]);
}

/// Consumer of cycle summaries
#[async_trait]
pub trait SummarySink: Send + Sync {
    async fn report(&self, summary: &CycleSummary);
}
