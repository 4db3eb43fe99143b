//! Discovery Cycle
//!
//! One cycle, under an overall deadline:
//! 1. list tokens from every discovery provider concurrently
//! 2. correlate the listings into merged tokens
//! 3. fill liquidity/volume gaps from the gap-fill provider
//! 4. run the scoring funnel
//! 5. publish ranked tokens and report the cycle summary
//!
//! On deadline, the batch coordinator stops admitting requests and every
//! token that did not reach a terminal stage is published as a partial
//! result flagged `CycleTimeout`. The shared cache and budget outlive the
//! cycle; everything else is rebuilt each time.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::adapters::cache::RecordCache;
use crate::adapters::provider::ProviderAdapter;
use crate::adapters::sinks::LogSink;
use crate::application::batch_coordinator::{BatchCoordinator, BatchingConfig, Resolution};
use crate::application::correlator::{compare_rank, Correlator, ReconcileRules};
use crate::application::pipeline::{ScoringPipeline, StageReport};
use crate::domain::{
    BatchRequest, BudgetMonitor, FieldSet, MergedToken, Priority, Provider, Stage, TokenFlag,
};
use crate::ports::{
    AbortReason, AlertSink, CycleOutcome, CycleSummary, ListParams, ScoredToken, SummarySink,
};

/// Cycle timing and discovery sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Pause between cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Overall deadline of one cycle
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    #[serde(default = "default_discovery_providers")]
    pub discovery_providers: Vec<Provider>,
    /// Tokens requested from each discovery listing
    #[serde(default = "default_discovery_limit")]
    pub discovery_limit: usize,
    /// Provider asked for missing liquidity/volume after discovery
    #[serde(default = "default_gap_fill_provider")]
    pub gap_fill_provider: Option<Provider>,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_deadline() -> u64 {
    45
}

fn default_discovery_providers() -> Vec<Provider> {
    vec![Provider::DexScreener, Provider::GeckoTerminal, Provider::Birdeye]
}

fn default_discovery_limit() -> usize {
    50
}

fn default_gap_fill_provider() -> Option<Provider> {
    Some(Provider::Birdeye)
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            deadline_secs: default_deadline(),
            discovery_providers: default_discovery_providers(),
            discovery_limit: default_discovery_limit(),
            gap_fill_provider: default_gap_fill_provider(),
        }
    }
}

impl CycleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Everything one cycle produced
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub summary: CycleSummary,
    /// Ranked list handed to the alert sink
    pub published: Vec<ScoredToken>,
    pub stages: Vec<StageReport>,
    /// Every merged token, in discovery ranking order
    pub tokens: Vec<MergedToken>,
}

/// Runs discovery cycles against a fixed set of provider adapters
pub struct DiscoveryCycle {
    config: CycleConfig,
    adapters: HashMap<Provider, Arc<ProviderAdapter>>,
    cache: Arc<RecordCache>,
    budget: Arc<BudgetMonitor>,
    batching: BatchingConfig,
    rules: ReconcileRules,
    pipeline: ScoringPipeline,
    alerts: Arc<dyn AlertSink>,
    summaries: Arc<dyn SummarySink>,
    cycles: AtomicU64,
    is_running: AtomicBool,
    shutdown: Notify,
}

impl DiscoveryCycle {
    pub fn new(
        config: CycleConfig,
        adapters: HashMap<Provider, Arc<ProviderAdapter>>,
        cache: Arc<RecordCache>,
        budget: Arc<BudgetMonitor>,
        pipeline: ScoringPipeline,
    ) -> Self {
        let sink = Arc::new(LogSink::new());
        Self {
            config,
            adapters,
            cache,
            budget,
            batching: BatchingConfig::default(),
            rules: ReconcileRules::default(),
            pipeline,
            alerts: sink.clone(),
            summaries: sink,
            cycles: AtomicU64::new(0),
            is_running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    pub fn with_batching(mut self, batching: BatchingConfig) -> Self {
        self.batching = batching;
        self
    }

    pub fn with_rules(mut self, rules: ReconcileRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_sinks(mut self, alerts: Arc<dyn AlertSink>, summaries: Arc<dyn SummarySink>) -> Self {
        self.alerts = alerts;
        self.summaries = summaries;
        self
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Repeat cycles on the poll interval until `stop` or `max_cycles`
    pub async fn run(&self, max_cycles: Option<u64>) {
        self.is_running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Starting discovery loop - poll interval {:?}, deadline {:?}, providers {:?}",
            self.config.poll_interval(),
            self.config.deadline(),
            self.config.discovery_providers
        );

        let mut completed = 0u64;
        while self.is_running.load(Ordering::SeqCst) {
            self.run_once().await;
            completed += 1;
            if max_cycles.is_some_and(|max| completed >= max) {
                break;
            }
            if !self.is_running.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                _ = self.shutdown.notified() => {}
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        tracing::info!("Discovery loop stopped after {} cycles", completed);
    }

    /// Stop after the cycle in progress
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        tracing::info!("Stop signal sent to discovery loop");
    }

    /// Run one cycle end to end
    pub async fn run_once(&self) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        let deadline = started + self.config.deadline();

        let cache_before = self.cache.stats();
        let cost_before = self.budget.lifetime_cost();
        let errors_before = self.error_counts();

        let mut correlator = Correlator::new(self.rules.clone());
        let coordinator = Arc::new(BatchCoordinator::new(self.adapters.clone(), self.batching.clone()));
        let mut stages = Vec::with_capacity(3);

        let work = self.execute(&mut correlator, &coordinator, &mut stages);
        let outcome = match tokio::time::timeout_at(deadline, work).await {
            Ok(Ok(())) => CycleOutcome::Completed,
            Ok(Err(cause)) => CycleOutcome::Aborted { cause },
            Err(_) => {
                tracing::warn!("Cycle {} hit its {:?} deadline", cycle, self.config.deadline());
                CycleOutcome::TimedOut
            }
        };
        coordinator.close();

        if outcome == CycleOutcome::TimedOut {
            for token in correlator.tokens_mut() {
                if !token.stage().is_terminal() {
                    token.flags.insert(TokenFlag::CycleTimeout);
                }
            }
        }

        let published = match outcome {
            CycleOutcome::Aborted { .. } => Vec::new(),
            _ => {
                let ranked = rank_for_alerts(&correlator);
                self.alerts.publish(&ranked).await;
                ranked
            }
        };

        let mut summary = CycleSummary::empty(cycle, outcome);
        summary.tokens_discovered = correlator.len();
        for token in correlator.tokens().values() {
            match token.stage() {
                Stage::Rejected => {
                    if let Some(reason) = token.rejection() {
                        *summary.rejected_by_reason.entry(reason).or_insert(0) += 1;
                    }
                    let from = token.rejected_from().unwrap_or(Stage::Discovered);
                    *summary.tokens_rejected_by_stage.entry(from.to_string()).or_insert(0) += 1;
                }
                Stage::FullyScored => {
                    summary.tokens_fully_scored += 1;
                    if token.flags.contains(&TokenFlag::HighConviction) {
                        summary.high_conviction += 1;
                    }
                }
                _ => {}
            }
            if token.flags.contains(&TokenFlag::CycleTimeout) {
                summary.partial_results += 1;
            }
        }
        summary.total_cost = self.budget.lifetime_cost().saturating_sub(cost_before);
        summary.cache_hit_rate = self.cache.stats().since(&cache_before).hit_rate();
        summary.provider_error_counts = self
            .error_counts()
            .into_iter()
            .map(|(provider, count)| {
                let before = errors_before.get(&provider).copied().unwrap_or(0);
                (provider, count.saturating_sub(before))
            })
            .collect();
        summary.budget_alerts = self.budget.check_thresholds();
        summary.duration_ms = started.elapsed().as_millis() as u64;

        let purged = self.cache.purge_expired();
        if purged > 0 {
            tracing::debug!("Purged {} expired cache entries", purged);
        }

        self.summaries.report(&summary).await;

        let mut tokens: Vec<MergedToken> = correlator.into_tokens().into_values().collect();
        tokens.sort_by(compare_rank);
        CycleReport {
            summary,
            published,
            stages,
            tokens,
        }
    }

    async fn execute(
        &self,
        correlator: &mut Correlator,
        coordinator: &Arc<BatchCoordinator>,
        stages: &mut Vec<StageReport>,
    ) -> Result<(), AbortReason> {
        self.discover(correlator).await?;
        self.fill_gaps(correlator, coordinator).await;

        stages.push(self.pipeline.run_quick(correlator));
        stages.push(self.pipeline.run_medium(correlator, coordinator).await);
        stages.push(self.pipeline.run_full(correlator, coordinator).await);
        Ok(())
    }

    /// Concurrent listings from every discovery provider, ingested as they land
    async fn discover(&self, correlator: &mut Correlator) -> Result<(), AbortReason> {
        let params = ListParams {
            limit: self.config.discovery_limit,
        };
        let mut set = JoinSet::new();
        for provider in &self.config.discovery_providers {
            match self.adapters.get(provider) {
                Some(adapter) => {
                    let adapter = Arc::clone(adapter);
                    let params = params.clone();
                    set.spawn(async move { (adapter.provider(), adapter.fetch_list(&params).await) });
                }
                None => tracing::warn!("No adapter configured for discovery provider {}", provider),
            }
        }
        if set.is_empty() {
            return Err(AbortReason::InvalidConfiguration(
                "no discovery provider has a configured adapter".to_string(),
            ));
        }

        let mut reachable = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((provider, Ok(records))) => {
                    reachable += 1;
                    tracing::info!("{} listed {} tokens", provider, records.len());
                    correlator.ingest_all(records);
                }
                Ok((provider, Err(e))) => tracing::warn!("Discovery from {} failed: {}", provider, e),
                Err(e) => tracing::error!("Discovery task failed: {}", e),
            }
        }

        if reachable == 0 {
            tracing::error!("All discovery providers unreachable");
            return Err(AbortReason::AllProvidersUnreachable);
        }
        tracing::info!("Correlated {} unique tokens from {} providers", correlator.len(), reachable);
        Ok(())
    }

    /// Low-priority market lookups for tokens missing liquidity or volume
    async fn fill_gaps(&self, correlator: &mut Correlator, coordinator: &Arc<BatchCoordinator>) {
        let Some(provider) = self.config.gap_fill_provider else { return };
        let gaps = correlator.gaps();
        if gaps.is_empty() {
            return;
        }

        let requests: Vec<BatchRequest> = gaps
            .into_iter()
            .map(|address| BatchRequest::new(address, provider, FieldSet::Market, Priority::Low))
            .collect();
        let total = requests.len();
        let mut filled = 0;
        for (_, resolution) in coordinator.request_all(requests).await {
            if let Resolution::Found(record) = resolution {
                if correlator.enrich(&record) {
                    filled += 1;
                }
            }
        }
        tracing::debug!("Gap fill from {}: {}/{} tokens", provider, filled, total);
    }

    fn error_counts(&self) -> BTreeMap<Provider, u64> {
        self.adapters
            .iter()
            .map(|(provider, adapter)| (*provider, adapter.error_count()))
            .collect()
    }
}

/// Fully scored tokens by score, then partial results, each tie broken by
/// discovery rank
fn rank_for_alerts(correlator: &Correlator) -> Vec<ScoredToken> {
    let mut scored: Vec<&MergedToken> = correlator
        .tokens()
        .values()
        .filter(|t| t.stage() == Stage::FullyScored)
        .collect();
    scored.sort_by(|a, b| {
        let (sa, sb) = (a.score().unwrap_or(0.0), b.score().unwrap_or(0.0));
        sb.total_cmp(&sa).then_with(|| compare_rank(a, b))
    });

    let mut partial: Vec<&MergedToken> = correlator
        .tokens()
        .values()
        .filter(|t| t.flags.contains(&TokenFlag::CycleTimeout))
        .collect();
    partial.sort_by(|a, b| compare_rank(a, b));

    scored.into_iter().chain(partial).map(ScoredToken::from).collect()
}
