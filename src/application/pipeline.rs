//! Scoring Pipeline
//!
//! Three-stage funnel over the correlator's merged tokens:
//! - quick: discovery data only, hard thresholds then a cheap weighted score
//! - medium: fetches activity fields for quick survivors, stricter score
//! - full: fetches security and holder data for medium survivors, final
//!   `[0, 100]` score and conviction flags
//!
//! Each stage only looks at tokens the previous stage passed, so the number
//! of paid lookups shrinks stage by stage.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::application::batch_coordinator::{BatchCoordinator, Resolution};
use crate::application::correlator::Correlator;
use crate::config::ConfigError;
use crate::domain::scoring::{classify_whales, score_stage, validate_weights};
use crate::domain::{
    Address, BatchRequest, Component, ComponentSpec, FieldSet, Label, Metric, MergedToken,
    Priority, Provider, RejectReason, Stage, TokenFlag,
};

/// Hard quick-stage filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickFilters {
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: f64,
    #[serde(default = "default_min_volume")]
    pub min_volume_24h: f64,
    #[serde(default)]
    pub min_market_cap: Option<f64>,
    #[serde(default)]
    pub max_market_cap: Option<f64>,
    /// Symbols never worth scouting (case-insensitive exact match)
    #[serde(default = "default_excluded_symbols")]
    pub excluded_symbols: Vec<String>,
}

fn default_min_liquidity() -> f64 {
    50_000.0
}

fn default_min_volume() -> f64 {
    1_000.0
}

fn default_excluded_symbols() -> Vec<String> {
    [
        "USDC", "USDT", "BUSD", "DAI", "TUSD", "USDP", "PYUSD", "FRAX", "SOL", "WSOL", "WETH", "WBTC",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for QuickFilters {
    fn default() -> Self {
        Self {
            min_liquidity: default_min_liquidity(),
            min_volume_24h: default_min_volume(),
            min_market_cap: None,
            max_market_cap: None,
            excluded_symbols: default_excluded_symbols(),
        }
    }
}

impl QuickFilters {
    pub fn is_excluded(&self, symbol: &str) -> bool {
        let symbol = symbol.trim();
        self.excluded_symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol))
    }
}

/// Components and minimum score of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub components: BTreeMap<Component, ComponentSpec>,
    /// Normalized score a token needs to pass the stage
    #[serde(default)]
    pub min_score: f64,
}

impl StageConfig {
    fn from_weights(weights: &[(Component, f64)], min_score: f64) -> Self {
        Self {
            components: weights
                .iter()
                .map(|(c, w)| (*c, ComponentSpec::weighted(*w)))
                .collect(),
            min_score,
        }
    }
}

/// Provider and field set fetched for a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub provider: Provider,
    pub field_set: FieldSet,
}

impl SourceSpec {
    pub fn new(provider: Provider, field_set: FieldSet) -> Self {
        Self { provider, field_set }
    }
}

/// Weights, thresholds and data sources of the funnel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub filters: QuickFilters,
    #[serde(default = "default_quick")]
    pub quick: StageConfig,
    #[serde(default = "default_medium")]
    pub medium: StageConfig,
    #[serde(default = "default_full")]
    pub full: StageConfig,
    /// Fully scored tokens at or above this are high conviction
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
    #[serde(default = "default_medium_sources")]
    pub medium_sources: Vec<SourceSpec>,
    #[serde(default = "default_full_sources")]
    pub full_sources: Vec<SourceSpec>,
}

fn default_quick() -> StageConfig {
    StageConfig::from_weights(
        &[
            (Component::Liquidity, 0.30),
            (Component::Volume, 0.25),
            (Component::Age, 0.15),
            (Component::Momentum, 0.10),
            (Component::Platforms, 0.20),
        ],
        25.0,
    )
}

fn default_medium() -> StageConfig {
    StageConfig::from_weights(
        &[
            (Component::Trades, 0.30),
            (Component::Holders, 0.30),
            (Component::BuyPressure, 0.25),
            (Component::VolumeTrend, 0.15),
        ],
        35.0,
    )
}

fn default_full() -> StageConfig {
    StageConfig::from_weights(
        &[
            (Component::Security, 0.30),
            (Component::HolderDistribution, 0.20),
            (Component::WhaleActivity, 0.15),
            (Component::Liquidity, 0.15),
            (Component::Momentum, 0.10),
            (Component::Platforms, 0.10),
        ],
        0.0,
    )
}

fn default_alert_threshold() -> f64 {
    70.0
}

fn default_medium_sources() -> Vec<SourceSpec> {
    vec![SourceSpec::new(Provider::Birdeye, FieldSet::Activity)]
}

fn default_full_sources() -> Vec<SourceSpec> {
    vec![
        SourceSpec::new(Provider::RugCheck, FieldSet::Security),
        SourceSpec::new(Provider::Birdeye, FieldSet::Holders),
    ]
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            filters: QuickFilters::default(),
            quick: default_quick(),
            medium: default_medium(),
            full: default_full(),
            alert_threshold: default_alert_threshold(),
            medium_sources: default_medium_sources(),
            full_sources: default_full_sources(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, stage) in [("quick", &self.quick), ("medium", &self.medium), ("full", &self.full)] {
            validate_weights(name, &stage.components).map_err(ConfigError::ValidationError)?;
            if !(0.0..=100.0).contains(&stage.min_score) {
                return Err(ConfigError::ValidationError(format!(
                    "{} min_score must be 0-100, got {}",
                    name, stage.min_score
                )));
            }
        }

        if !(0.0..=100.0).contains(&self.alert_threshold) {
            return Err(ConfigError::ValidationError(format!(
                "alert_threshold must be 0-100, got {}",
                self.alert_threshold
            )));
        }

        let f = &self.filters;
        if f.min_liquidity < 0.0 || f.min_volume_24h < 0.0 {
            return Err(ConfigError::ValidationError(
                "min_liquidity and min_volume_24h must be >= 0".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (f.min_market_cap, f.max_market_cap) {
            if min > max {
                return Err(ConfigError::ValidationError(format!(
                    "min_market_cap ({}) exceeds max_market_cap ({})",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

/// What one stage did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub evaluated: usize,
    pub passed: usize,
    pub rejected: BTreeMap<RejectReason, usize>,
    /// Per-token data requests issued
    pub requests: usize,
    /// Requests that resolved without data
    pub unavailable: usize,
}

impl StageReport {
    fn new(stage: &'static str) -> Self {
        Self {
            stage,
            evaluated: 0,
            passed: 0,
            rejected: BTreeMap::new(),
            requests: 0,
            unavailable: 0,
        }
    }

    fn reject(&mut self, token: &mut MergedToken, reason: RejectReason) {
        if token.reject(reason).is_ok() {
            *self.rejected.entry(reason).or_insert(0) += 1;
        }
    }

    pub fn total_rejected(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Quick -> medium -> full funnel
#[derive(Debug, Clone)]
pub struct ScoringPipeline {
    config: ScoringConfig,
}

impl ScoringPipeline {
    /// Build from config. Invalid weights are a startup error.
    pub fn new(config: ScoringConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Run all three stages
    pub async fn run(&self, correlator: &mut Correlator, coordinator: &Arc<BatchCoordinator>) -> Vec<StageReport> {
        let quick = self.run_quick(correlator);
        let medium = self.run_medium(correlator, coordinator).await;
        let full = self.run_full(correlator, coordinator).await;
        vec![quick, medium, full]
    }

    /// Discovery-data-only filter over `Discovered` tokens
    pub fn run_quick(&self, correlator: &mut Correlator) -> StageReport {
        let mut report = StageReport::new("quick");
        let filters = &self.config.filters;

        for token in correlator.tokens_mut() {
            if token.stage() != Stage::Discovered {
                continue;
            }
            report.evaluated += 1;

            if token.label(Label::Symbol).is_some_and(|s| filters.is_excluded(s)) {
                report.reject(token, RejectReason::Excluded);
                continue;
            }

            let liquidity = token.metric(Metric::LiquidityUsd);
            let volume = token.metric(Metric::Volume24hUsd);
            let (Some(liquidity), Some(volume)) = (liquidity, volume) else {
                token.missing.insert(FieldSet::Market);
                report.reject(token, RejectReason::DataUnavailable);
                continue;
            };

            let market_cap = token.metric(Metric::MarketCapUsd);
            let below_cap = matches!((market_cap, filters.min_market_cap), (Some(mc), Some(min)) if mc < min);
            let above_cap = matches!((market_cap, filters.max_market_cap), (Some(mc), Some(max)) if mc > max);
            if liquidity < filters.min_liquidity || volume < filters.min_volume_24h || below_cap || above_cap {
                tracing::debug!(
                    "{} below quick thresholds (liquidity ${:.0}, volume ${:.0})",
                    token.address,
                    liquidity,
                    volume
                );
                report.reject(token, RejectReason::BelowThreshold);
                continue;
            }

            let scored = score_stage(token, &self.config.quick.components);
            token.stage_scores.insert("quick".to_string(), scored.score);
            if scored.score < self.config.quick.min_score {
                report.reject(token, RejectReason::BelowStageScore);
                continue;
            }
            if token.advance(Stage::QuickPassed).is_ok() {
                report.passed += 1;
            }
        }

        tracing::info!(
            "Quick stage: {}/{} passed, {} rejected",
            report.passed,
            report.evaluated,
            report.total_rejected()
        );
        report
    }

    /// Activity data for `QuickPassed` tokens, then the medium score
    pub async fn run_medium(&self, correlator: &mut Correlator, coordinator: &Arc<BatchCoordinator>) -> StageReport {
        let mut report = StageReport::new("medium");
        let candidates = candidates(correlator, Stage::QuickPassed);
        report.evaluated = candidates.len();
        if candidates.is_empty() {
            return report;
        }

        self.enrich(
            correlator,
            coordinator,
            &candidates,
            &self.config.medium_sources,
            Priority::Normal,
            &mut report,
        )
        .await;

        let required: BTreeSet<FieldSet> = self.config.medium_sources.iter().map(|s| s.field_set).collect();
        for address in &candidates {
            let Some(token) = correlator.get_mut(address) else { continue };
            let scored = score_stage(token, &self.config.medium.components);
            token.stage_scores.insert("medium".to_string(), scored.score);

            if scored.score < self.config.medium.min_score {
                let reason = if token.missing.iter().any(|f| required.contains(f)) {
                    RejectReason::DataUnavailable
                } else {
                    RejectReason::BelowStageScore
                };
                report.reject(token, reason);
                continue;
            }
            if token.advance(Stage::MediumPassed).is_ok() {
                report.passed += 1;
            }
        }

        tracing::info!(
            "Medium stage: {}/{} passed, {} requests ({} unavailable)",
            report.passed,
            report.evaluated,
            report.requests,
            report.unavailable
        );
        report
    }

    /// Security and holder data for `MediumPassed` tokens, then the final score
    pub async fn run_full(&self, correlator: &mut Correlator, coordinator: &Arc<BatchCoordinator>) -> StageReport {
        let mut report = StageReport::new("full");
        let candidates = candidates(correlator, Stage::MediumPassed);
        report.evaluated = candidates.len();
        if candidates.is_empty() {
            return report;
        }

        self.enrich(
            correlator,
            coordinator,
            &candidates,
            &self.config.full_sources,
            Priority::High,
            &mut report,
        )
        .await;

        for address in &candidates {
            let Some(token) = correlator.get_mut(address) else { continue };
            if let Some(activity) = classify_whales(token) {
                token.labels.insert(Label::WhaleActivity, activity.as_str().to_string());
            }

            let scored = score_stage(token, &self.config.full.components);
            token.stage_scores.insert("full".to_string(), scored.score);
            if token.finish(scored.score).is_err() {
                continue;
            }
            report.passed += 1;

            if scored.score >= self.config.alert_threshold {
                token.flags.insert(TokenFlag::HighConviction);
            } else {
                token.flags.insert(TokenFlag::BelowAlertThreshold);
            }
            if scored.missing_evidence() {
                tracing::debug!("{} fully scored without complete evidence", token.address);
            }
        }

        tracing::info!(
            "Full stage: {} scored, {} requests ({} unavailable)",
            report.passed,
            report.requests,
            report.unavailable
        );
        report
    }

    async fn enrich(
        &self,
        correlator: &mut Correlator,
        coordinator: &Arc<BatchCoordinator>,
        candidates: &[Address],
        sources: &[SourceSpec],
        priority: Priority,
        report: &mut StageReport,
    ) {
        let requests: Vec<BatchRequest> = candidates
            .iter()
            .flat_map(|address| {
                sources
                    .iter()
                    .map(move |s| BatchRequest::new(address.clone(), s.provider, s.field_set, priority))
            })
            .collect();
        report.requests = requests.len();

        for (request, resolution) in coordinator.request_all(requests).await {
            match resolution {
                Resolution::Found(record) => {
                    correlator.enrich(&record);
                }
                Resolution::Unavailable(why) => {
                    report.unavailable += 1;
                    tracing::debug!(
                        "{} {} from {} unavailable: {}",
                        request.token_address,
                        request.field_set,
                        request.provider,
                        why
                    );
                    if let Some(token) = correlator.get_mut(&request.token_address) {
                        token.missing.insert(request.field_set);
                    }
                }
            }
        }
    }
}

fn candidates(correlator: &Correlator, stage: Stage) -> Vec<Address> {
    correlator
        .tokens()
        .values()
        .filter(|t| t.stage() == stage)
        .map(|t| t.address.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cache::RecordCache;
    use crate::adapters::provider::{AdapterSettings, ProviderAdapter};
    use crate::adapters::rate_limiter::{RateLimitQuota, RateLimiter};
    use crate::application::batch_coordinator::BatchingConfig;
    use crate::domain::{
        BirdeyeFields, BudgetConfig, BudgetMonitor, DexScreenerFields, ProviderPayload, RiskItem,
        RiskSeverity, RugCheckFields, TokenRecord,
    };
    use crate::ports::mocks::{addr, market_record, ScriptedClient};
    use crate::ports::{ProviderClient, ProviderErrorKind};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::collections::HashMap;
    use std::time::Duration;

    fn discovery(address: &str, symbol: &str, liquidity: f64, volume: f64) -> TokenRecord {
        let now = Utc::now();
        TokenRecord::new(
            addr(address),
            ProviderPayload::DexScreener(DexScreenerFields {
                symbol: Some(symbol.to_string()),
                liquidity_usd: Some(liquidity),
                volume_24h: Some(volume),
                price_change_24h: Some(40.0),
                market_cap: Some(2_000_000.0),
                pair_created_at: Some(now - ChronoDuration::hours(48)),
                ..Default::default()
            }),
            now,
        )
    }

    fn activity(address: &str, buys: u64, sells: u64, holders: u64) -> TokenRecord {
        TokenRecord::new(
            addr(address),
            ProviderPayload::Birdeye(BirdeyeFields {
                buy_24h: Some(buys),
                sell_24h: Some(sells),
                holder_count: Some(holders),
                volume_24h_change_pct: Some(60.0),
                buy_volume_24h_usd: Some(buys as f64 * 100.0),
                sell_volume_24h_usd: Some(sells as f64 * 100.0),
                top10_holder_pct: Some(20.0),
                ..Default::default()
            }),
            Utc::now(),
        )
    }

    fn audit(address: &str, risk_score: f64) -> TokenRecord {
        TokenRecord::new(
            addr(address),
            ProviderPayload::RugCheck(RugCheckFields {
                risk_score: Some(risk_score),
                risks: vec![RiskItem {
                    name: "Low liquidity".to_string(),
                    level: RiskSeverity::Info,
                }],
                top10_holder_pct: Some(20.0),
                ..Default::default()
            }),
            Utc::now(),
        )
    }

    fn adapter(client: ScriptedClient) -> Arc<ProviderAdapter> {
        let provider = client.provider();
        let limiter = RateLimiter::new()
            .with_quota(provider, RateLimitQuota::per_minute(6000))
            .unwrap();
        Arc::new(ProviderAdapter::new(
            Arc::new(client) as Arc<dyn ProviderClient>,
            AdapterSettings {
                base_cost: 5,
                max_batch_size: 20,
                retry_base_delay: Duration::from_millis(1),
                ..Default::default()
            },
            Arc::new(limiter),
            Arc::new(RecordCache::new()),
            Arc::new(BudgetMonitor::new(BudgetConfig::default())),
        ))
    }

    fn coordinator(birdeye: ScriptedClient, rugcheck: ScriptedClient) -> Arc<BatchCoordinator> {
        let adapters = HashMap::from([
            (Provider::Birdeye, adapter(birdeye)),
            (Provider::RugCheck, adapter(rugcheck)),
        ]);
        Arc::new(BatchCoordinator::new(
            adapters,
            BatchingConfig {
                window_ms: 5,
                ..Default::default()
            },
        ))
    }

    fn pipeline() -> ScoringPipeline {
        ScoringPipeline::new(ScoringConfig::default()).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ScoringConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_weights_fail_construction() {
        let mut config = ScoringConfig::default();
        config
            .medium
            .components
            .insert(Component::Trades, ComponentSpec::weighted(0.9));
        let err = ScoringPipeline::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(msg) if msg.contains("medium")));
    }

    #[test]
    fn test_inverted_market_cap_bounds_rejected() {
        let mut config = ScoringConfig::default();
        config.filters.min_market_cap = Some(10.0);
        config.filters.max_market_cap = Some(1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quick_hard_thresholds() {
        let mut correlator = Correlator::default();
        correlator.ingest_all(vec![
            discovery("good", "GOOD", 200_000.0, 50_000.0),
            discovery("thin", "THIN", 10_000.0, 50_000.0),
            discovery("quiet", "QUIET", 200_000.0, 10.0),
            discovery("stable", "usdc", 5_000_000.0, 900_000.0),
        ]);

        let report = pipeline().run_quick(&mut correlator);

        assert_eq!(report.evaluated, 4);
        assert_eq!(report.passed, 1);
        assert_eq!(correlator.get(&addr("good")).unwrap().stage(), Stage::QuickPassed);
        assert_eq!(
            correlator.get(&addr("thin")).unwrap().rejection(),
            Some(RejectReason::BelowThreshold)
        );
        assert_eq!(
            correlator.get(&addr("quiet")).unwrap().rejection(),
            Some(RejectReason::BelowThreshold)
        );
        assert_eq!(
            correlator.get(&addr("stable")).unwrap().rejection(),
            Some(RejectReason::Excluded)
        );
        assert!(correlator.get(&addr("good")).unwrap().stage_scores.contains_key("quick"));
    }

    #[test]
    fn test_quick_missing_market_data() {
        let mut correlator = Correlator::default();
        correlator.ingest(audit("nomarket", 10.0));

        let report = pipeline().run_quick(&mut correlator);

        let token = correlator.get(&addr("nomarket")).unwrap();
        assert_eq!(token.rejection(), Some(RejectReason::DataUnavailable));
        assert!(token.missing.contains(&FieldSet::Market));
        assert_eq!(report.rejected.get(&RejectReason::DataUnavailable), Some(&1));
    }

    #[test]
    fn test_market_cap_bounds_only_apply_when_known() {
        let mut config = ScoringConfig::default();
        config.filters.max_market_cap = Some(1_000_000.0);
        let pipeline = ScoringPipeline::new(config).unwrap();

        let mut correlator = Correlator::default();
        correlator.ingest(discovery("capped", "CAP", 200_000.0, 50_000.0));
        correlator.ingest(market_record(Provider::Birdeye, "uncapped", 200_000.0, 50_000.0, Utc::now()));

        pipeline.run_quick(&mut correlator);
        assert_eq!(
            correlator.get(&addr("capped")).unwrap().rejection(),
            Some(RejectReason::BelowThreshold)
        );
        assert_ne!(correlator.get(&addr("uncapped")).unwrap().rejection(), Some(RejectReason::BelowThreshold));
    }

    #[tokio::test]
    async fn test_full_funnel() {
        let mut correlator = Correlator::default();
        correlator.ingest_all(vec![
            discovery("strong", "STRONG", 400_000.0, 900_000.0),
            discovery("dumping", "DUMP", 300_000.0, 600_000.0),
            discovery("thin", "THIN", 1_000.0, 50_000.0),
        ]);

        let birdeye = ScriptedClient::new(Provider::Birdeye)
            .with_token(activity("strong", 4_000, 1_000, 6_000))
            .with_token(activity("dumping", 1, 20, 5));
        let rugcheck = ScriptedClient::new(Provider::RugCheck).with_token(audit("strong", 5.0));
        let coordinator = coordinator(birdeye, rugcheck);

        let reports = pipeline().run(&mut correlator, &coordinator).await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].passed, 2);
        assert_eq!(reports[1].evaluated, 2);
        assert_eq!(reports[1].passed, 1);
        assert_eq!(reports[2].evaluated, 1);

        let strong = correlator.get(&addr("strong")).unwrap();
        assert_eq!(strong.stage(), Stage::FullyScored);
        let score = strong.score().unwrap();
        assert!((0.0..=100.0).contains(&score));
        assert!(strong.flags.contains(&TokenFlag::HighConviction) || strong.flags.contains(&TokenFlag::BelowAlertThreshold));
        assert_eq!(strong.label(Label::WhaleActivity), Some("accumulating"));
        assert_eq!(strong.sources.len(), 1);
        for key in ["quick", "medium", "full"] {
            assert!(strong.stage_scores.contains_key(key));
        }

        let dumping = correlator.get(&addr("dumping")).unwrap();
        assert_eq!(dumping.rejection(), Some(RejectReason::BelowStageScore));
        assert_eq!(dumping.rejected_from(), Some(Stage::QuickPassed));
    }

    #[tokio::test]
    async fn test_unavailable_full_data_scores_minimum() {
        let mut correlator = Correlator::default();
        correlator.ingest(discovery("lonely", "LONE", 400_000.0, 900_000.0));

        let birdeye = ScriptedClient::new(Provider::Birdeye).with_token(activity("lonely", 4_000, 1_000, 6_000));
        // Audit provider does not know the token
        let rugcheck = ScriptedClient::new(Provider::RugCheck);
        let coordinator = coordinator(birdeye, rugcheck);

        pipeline().run(&mut correlator, &coordinator).await;

        let token = correlator.get(&addr("lonely")).unwrap();
        assert_eq!(token.stage(), Stage::FullyScored);
        assert!(token.missing.contains(&FieldSet::Security));
        assert!(token.score().unwrap() < 100.0);
    }

    #[tokio::test]
    async fn test_medium_failure_rejects_as_unavailable() {
        let mut correlator = Correlator::default();
        correlator.ingest(discovery("orphan", "ORPH", 400_000.0, 900_000.0));

        let birdeye = ScriptedClient::new(Provider::Birdeye).failing_one(
            &addr("orphan"),
            vec![ProviderErrorKind::Client],
        );
        let coordinator = coordinator(birdeye, ScriptedClient::new(Provider::RugCheck));

        let p = pipeline();
        p.run_quick(&mut correlator);
        let report = p.run_medium(&mut correlator, &coordinator).await;

        let token = correlator.get(&addr("orphan")).unwrap();
        assert_eq!(token.rejection(), Some(RejectReason::DataUnavailable));
        assert!(token.missing.contains(&FieldSet::Activity));
        assert_eq!(report.unavailable, 1);
    }

    #[tokio::test]
    async fn test_filtering_is_monotonic() {
        let mut correlator = Correlator::default();
        let mut birdeye = ScriptedClient::new(Provider::Birdeye);
        let mut rugcheck = ScriptedClient::new(Provider::RugCheck);
        for i in 0..12u32 {
            let a = format!("t{:02}", i);
            let liquidity = 20_000.0 * (i + 1) as f64;
            correlator.ingest(discovery(&a, &a, liquidity, liquidity * 2.0));
            birdeye = birdeye.with_token(activity(&a, 100 * i as u64, 150, 300 * i as u64));
            rugcheck = rugcheck.with_token(audit(&a, 10.0 * (i % 5) as f64));
        }
        let coordinator = coordinator(birdeye, rugcheck);

        let reports = pipeline().run(&mut correlator, &coordinator).await;
        let (quick, medium, full) = (&reports[0], &reports[1], &reports[2]);

        assert_eq!(medium.evaluated, quick.passed);
        assert_eq!(full.evaluated, medium.passed);
        assert!(medium.passed + medium.total_rejected() <= quick.passed);
        for token in correlator.tokens().values() {
            assert!(token.stage().is_terminal());
            if let Some(score) = token.score() {
                assert!((0.0..=100.0).contains(&score));
            }
        }
    }
}
