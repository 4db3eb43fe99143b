//! Merged Tokens
//!
//! One `MergedToken` per unique address per discovery cycle. The correlator
//! creates and reconciles it; the scoring pipeline drives it through the
//! stage state machine:
//!
//! `Discovered -> QuickPassed -> MediumPassed -> FullyScored`, with
//! `Rejected` reachable from any non-terminal stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::token::{Address, FieldSet, Label, Metric, Provider};

/// Funnel stage of a merged token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovered,
    QuickPassed,
    MediumPassed,
    FullyScored,
    Rejected,
}

impl Stage {
    /// Position in the forward progression. `Rejected` sits past every
    /// non-terminal stage so it is always a forward move.
    fn rank(&self) -> u8 {
        match self {
            Stage::Discovered => 0,
            Stage::QuickPassed => 1,
            Stage::MediumPassed => 2,
            Stage::FullyScored => 3,
            Stage::Rejected => 4,
        }
    }

    /// True for stages a token can no longer leave
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::FullyScored | Stage::Rejected)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Discovered => "discovered",
            Stage::QuickPassed => "quick_passed",
            Stage::MediumPassed => "medium_passed",
            Stage::FullyScored => "fully_scored",
            Stage::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Why a token left the funnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Failed a hard quick-stage threshold
    BelowThreshold,
    /// Weighted stage score under the stage minimum
    BelowStageScore,
    /// Failed a stage while required data could not be obtained
    DataUnavailable,
    /// Stablecoin / wrapped major, never a discovery candidate
    Excluded,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::BelowThreshold => "below_threshold",
            RejectReason::BelowStageScore => "below_stage_score",
            RejectReason::DataUnavailable => "data_unavailable",
            RejectReason::Excluded => "excluded",
        };
        f.write_str(s)
    }
}

/// Output annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenFlag {
    HighConviction,
    BelowAlertThreshold,
    CycleTimeout,
}

/// One provider's value for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observation {
    pub value: f64,
    pub fetched_at: DateTime<Utc>,
}

/// One provider's value for one label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelObservation {
    pub value: String,
    pub fetched_at: DateTime<Utc>,
}

/// Stage transition that would move a token backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: Stage,
    pub to: Stage,
}

/// All providers' view of one token within one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedToken {
    pub address: Address,
    /// Providers that reported this token during discovery
    pub sources: BTreeSet<Provider>,
    pub normalized_metrics: BTreeMap<Metric, f64>,
    pub labels: BTreeMap<Label, String>,
    pub stage_scores: BTreeMap<String, f64>,
    pub flags: BTreeSet<TokenFlag>,
    pub missing: BTreeSet<FieldSet>,
    stage: Stage,
    score: Option<f64>,
    rejection: Option<RejectReason>,
    /// Stage the token was in when rejected
    rejected_from: Option<Stage>,
    /// Raw observations, kept so reconciliation is order independent
    #[serde(skip)]
    pub(crate) metric_obs: BTreeMap<Metric, BTreeMap<Provider, Observation>>,
    #[serde(skip)]
    pub(crate) label_obs: BTreeMap<Label, BTreeMap<Provider, LabelObservation>>,
}

impl MergedToken {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            sources: BTreeSet::new(),
            normalized_metrics: BTreeMap::new(),
            labels: BTreeMap::new(),
            stage_scores: BTreeMap::new(),
            flags: BTreeSet::new(),
            missing: BTreeSet::new(),
            stage: Stage::Discovered,
            score: None,
            rejection: None,
            rejected_from: None,
            metric_obs: BTreeMap::new(),
            label_obs: BTreeMap::new(),
        }
    }

    pub fn platform_count(&self) -> usize {
        self.sources.len()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Final score, only present once `FullyScored`
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        self.rejection
    }

    pub fn rejected_from(&self) -> Option<Stage> {
        self.rejected_from
    }

    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.normalized_metrics.get(&metric).copied()
    }

    pub fn label(&self, label: Label) -> Option<&str> {
        self.labels.get(&label).map(String::as_str)
    }

    pub fn liquidity(&self) -> f64 {
        self.metric(Metric::LiquidityUsd).unwrap_or(0.0)
    }

    /// Move to the next non-terminal stage. Skips, backward or same-stage
    /// moves and moves out of a terminal stage are refused; terminal stages
    /// are reached through `finish` and `reject` only.
    pub fn advance(&mut self, to: Stage) -> Result<(), InvalidTransition> {
        if to.is_terminal() || to.rank() != self.stage.rank() + 1 {
            return Err(InvalidTransition { from: self.stage, to });
        }
        self.advance_unscored(to)
    }

    /// Reject from any non-terminal stage
    pub fn reject(&mut self, reason: RejectReason) -> Result<(), InvalidTransition> {
        let from = self.stage;
        self.advance_unscored(Stage::Rejected)?;
        self.rejection = Some(reason);
        self.rejected_from = Some(from);
        Ok(())
    }

    /// Record the final score and move to `FullyScored`
    pub fn finish(&mut self, score: f64) -> Result<(), InvalidTransition> {
        if self.stage != Stage::MediumPassed {
            return Err(InvalidTransition { from: self.stage, to: Stage::FullyScored });
        }
        self.score = Some(score);
        self.stage = Stage::FullyScored;
        Ok(())
    }

    fn advance_unscored(&mut self, to: Stage) -> Result<(), InvalidTransition> {
        if self.stage.is_terminal() || to.rank() <= self.stage.rank() {
            return Err(InvalidTransition { from: self.stage, to });
        }
        self.stage = to;
        Ok(())
    }
}
