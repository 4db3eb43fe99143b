//! Scoring Components
//!
//! Pure per-component sub-scores for the three funnel stages. Each component
//! maps one or more normalized metrics to `[0, 1]`, scaled by its
//! `max_points`. A stage score is the weighted sum of component points divided
//! by the stage's theoretical maximum, times 100, so it always lies in
//! `[0, 100]`. A component whose inputs are missing scores its minimum.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::merged::MergedToken;
use super::token::{Label, Metric};

/// Tolerance for the weights-sum-to-one check
pub const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// Scored component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Liquidity,
    Volume,
    Age,
    Momentum,
    Platforms,
    Trades,
    Holders,
    BuyPressure,
    VolumeTrend,
    Security,
    HolderDistribution,
    WhaleActivity,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Liquidity => "liquidity",
            Component::Volume => "volume",
            Component::Age => "age",
            Component::Momentum => "momentum",
            Component::Platforms => "platforms",
            Component::Trades => "trades",
            Component::Holders => "holders",
            Component::BuyPressure => "buy_pressure",
            Component::VolumeTrend => "volume_trend",
            Component::Security => "security",
            Component::HolderDistribution => "holder_distribution",
            Component::WhaleActivity => "whale_activity",
        }
    }

    /// Saturation reference used when none is configured
    pub fn default_reference(&self) -> f64 {
        match self {
            Component::Liquidity => 500_000.0,
            Component::Volume => 1_000_000.0,
            // Hours until age stops adding points
            Component::Age => 72.0,
            // 24h price change (%) for full points
            Component::Momentum => 100.0,
            Component::Platforms => 3.0,
            Component::Trades => 5_000.0,
            Component::Holders => 5_000.0,
            // Buy share of 24h flow for full points
            Component::BuyPressure => 0.7,
            // 24h volume change (%) for full points
            Component::VolumeTrend => 100.0,
            Component::Security => 100.0,
            // Top-10 holder share (%) at which the component hits zero
            Component::HolderDistribution => 80.0,
            Component::WhaleActivity => 1.0,
        }
    }

    /// Sub-score in `[0, 1]`; `None` when the inputs are unavailable
    pub fn evaluate(&self, token: &MergedToken, reference: f64) -> Option<f64> {
        let m = |metric: Metric| token.metric(metric);
        let raw = match self {
            Component::Liquidity => log_ratio(m(Metric::LiquidityUsd)?, reference),
            Component::Volume => log_ratio(m(Metric::Volume24hUsd)?, reference),
            Component::Age => linear(m(Metric::AgeHours)?, reference),
            Component::Momentum => linear(m(Metric::PriceChange24hPct)?, reference),
            Component::Platforms => linear(token.platform_count() as f64, reference),
            Component::Trades => log_ratio(m(Metric::Trades24h)?, reference),
            Component::Holders => log_ratio(m(Metric::HolderCount)?, reference),
            Component::BuyPressure => linear(buy_share(token)?, reference),
            Component::VolumeTrend => linear(m(Metric::VolumeChange24hPct)?, reference),
            Component::Security => security_score(token)?,
            Component::HolderDistribution => {
                let top10 = m(Metric::Top10HolderPct)?;
                if reference <= 0.0 {
                    0.0
                } else {
                    1.0 - top10 / reference
                }
            }
            Component::WhaleActivity => classify_whales(token)?.score(),
        };
        // Overflowing inputs (inf / inf) score the minimum
        Some(if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) })
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn linear(value: f64, reference: f64) -> f64 {
    if reference <= 0.0 {
        return 0.0;
    }
    value / reference
}

/// `ln(1 + v) / ln(1 + ref)`; dollar and count metrics span orders of magnitude
fn log_ratio(value: f64, reference: f64) -> f64 {
    if reference <= 0.0 || value <= 0.0 {
        return 0.0;
    }
    value.ln_1p() / reference.ln_1p()
}

/// Buy share of 24h flow, by volume when known, else by trade count
fn buy_share(token: &MergedToken) -> Option<f64> {
    let by_volume = token
        .metric(Metric::BuyVolume24hUsd)
        .zip(token.metric(Metric::SellVolume24hUsd));
    let by_count = token.metric(Metric::Buys24h).zip(token.metric(Metric::Sells24h));
    let (buys, sells) = by_volume.or(by_count)?;
    let total = buys + sells;
    if total <= 0.0 {
        return None;
    }
    Some(buys / total)
}

/// `1 - risk/100`, halved per active authority, zero on danger-level findings
fn security_score(token: &MergedToken) -> Option<f64> {
    let risk = token.metric(Metric::RiskScore);
    let level = token.label(Label::RiskLevel);
    if risk.is_none() && level.is_none() {
        return None;
    }
    if level == Some("danger") {
        return Some(0.0);
    }

    let mut score = 1.0 - risk.unwrap_or(0.0) / 100.0;
    if token.label(Label::MintAuthority) == Some("active") {
        score *= 0.5;
    }
    if token.label(Label::FreezeAuthority) == Some("active") {
        score *= 0.5;
    }
    Some(score)
}

/// Large-holder behaviour over the last 24h
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhaleActivity {
    Accumulating,
    Neutral,
    Distributing,
}

impl WhaleActivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhaleActivity::Accumulating => "accumulating",
            WhaleActivity::Neutral => "neutral",
            WhaleActivity::Distributing => "distributing",
        }
    }

    fn score(&self) -> f64 {
        match self {
            WhaleActivity::Accumulating => 1.0,
            WhaleActivity::Neutral => 0.5,
            WhaleActivity::Distributing => 0.0,
        }
    }
}

/// Classify from buy/sell flow and holder concentration
///
/// Heavy selling into a concentrated book is distribution even at a
/// moderate sell share.
pub fn classify_whales(token: &MergedToken) -> Option<WhaleActivity> {
    let share = buy_share(token)?;
    let concentrated = token.metric(Metric::Top10HolderPct).is_some_and(|pct| pct >= 50.0);

    Some(if share >= 0.6 {
        WhaleActivity::Accumulating
    } else if share <= 0.4 || (concentrated && share < 0.5) {
        WhaleActivity::Distributing
    } else {
        WhaleActivity::Neutral
    })
}

/// Weight, cap and saturation point of one component
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub weight: f64,
    #[serde(default = "default_max_points")]
    pub max_points: f64,
    /// Falls back to the component's default reference
    #[serde(default)]
    pub reference: Option<f64>,
}

fn default_max_points() -> f64 {
    1.0
}

impl ComponentSpec {
    pub fn weighted(weight: f64) -> Self {
        Self {
            weight,
            max_points: default_max_points(),
            reference: None,
        }
    }
}

/// Points awarded to one component
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComponentScore {
    pub component: Component,
    pub points: f64,
    pub max_points: f64,
    /// False when the inputs were unavailable and the minimum was used
    pub evidence: bool,
}

/// Stage score with its breakdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageScore {
    /// Normalized to `[0, 100]`
    pub score: f64,
    pub components: Vec<ComponentScore>,
}

impl StageScore {
    pub fn missing_evidence(&self) -> bool {
        self.components.iter().any(|c| !c.evidence)
    }
}

/// Validate a stage's component table
pub fn validate_weights(stage: &str, components: &BTreeMap<Component, ComponentSpec>) -> Result<(), String> {
    if components.is_empty() {
        return Err(format!("{} stage has no components", stage));
    }
    for (component, spec) in components {
        if !spec.weight.is_finite() || spec.weight < 0.0 {
            return Err(format!("{} weight for {} must be >= 0, got {}", stage, component, spec.weight));
        }
        if !spec.max_points.is_finite() || spec.max_points <= 0.0 {
            return Err(format!(
                "{} max_points for {} must be > 0, got {}",
                stage, component, spec.max_points
            ));
        }
        if let Some(reference) = spec.reference {
            if !reference.is_finite() || reference <= 0.0 {
                return Err(format!(
                    "{} reference for {} must be > 0, got {}",
                    stage, component, reference
                ));
            }
        }
    }
    let sum: f64 = components.values().map(|s| s.weight).sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
        return Err(format!("{} stage weights must sum to 1.0, got {:.6}", stage, sum));
    }
    Ok(())
}

/// Weighted, normalized score of `token` over `components`
pub fn score_stage(token: &MergedToken, components: &BTreeMap<Component, ComponentSpec>) -> StageScore {
    let mut raw = 0.0;
    let mut theoretical_max = 0.0;
    let mut breakdown = Vec::with_capacity(components.len());

    for (component, spec) in components {
        let reference = spec.reference.unwrap_or_else(|| component.default_reference());
        let sub = component.evaluate(token, reference);
        let points = sub.unwrap_or(0.0) * spec.max_points;

        raw += spec.weight * points;
        theoretical_max += spec.weight * spec.max_points;
        breakdown.push(ComponentScore {
            component: *component,
            points,
            max_points: spec.max_points,
            evidence: sub.is_some(),
        });
    }

    let score = if theoretical_max > 0.0 {
        (raw / theoretical_max * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };
    StageScore {
        score,
        components: breakdown,
    }
}
