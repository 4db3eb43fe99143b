//! Log Sink
//!
//! Default alert and summary sink: writes ranked tokens and cycle summaries
//! through `tracing`. Stands in for a real notification channel.

use async_trait::async_trait;

use crate::domain::{Label, Metric};
use crate::ports::{AlertSink, CycleOutcome, CycleSummary, ScoredToken, SummarySink};

/// `tracing`-backed sink
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    /// Also log tokens below the alert threshold
    pub include_low_conviction: bool,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertSink for LogSink {
    async fn publish(&self, tokens: &[ScoredToken]) {
        let high = tokens.iter().filter(|t| t.is_high_conviction()).count();
        tracing::info!("Publishing {} ranked tokens ({} high conviction)", tokens.len(), high);

        for (rank, token) in tokens.iter().enumerate() {
            if !token.is_high_conviction() && !self.include_low_conviction && !token.is_partial() {
                continue;
            }
            let symbol = token.labels.get(&Label::Symbol).map(String::as_str).unwrap_or("?");
            let liquidity = token.normalized_metrics.get(&Metric::LiquidityUsd).copied().unwrap_or(0.0);
            let score = token
                .score
                .map(|s| format!("{:.1}", s))
                .unwrap_or_else(|| "-".to_string());

            if token.is_partial() {
                tracing::warn!(
                    "#{} {} ({}) partial result at {} [cycle timeout], liquidity ${:.0}, {} sources",
                    rank + 1,
                    symbol,
                    token.address,
                    token.stage,
                    liquidity,
                    token.sources.len()
                );
            } else {
                tracing::info!(
                    "#{} {} ({}) score {} liquidity ${:.0} on {} platforms",
                    rank + 1,
                    symbol,
                    token.address,
                    score,
                    liquidity,
                    token.sources.len()
                );
            }
        }
    }
}

#[async_trait]
impl SummarySink for LogSink {
    async fn report(&self, summary: &CycleSummary) {
        let line = format!(
            "Cycle {} {}: discovered={} rejected={} scored={} high_conviction={} partial={} cost={} cache_hit={:.1}% in {}ms",
            summary.cycle,
            summary.outcome,
            summary.tokens_discovered,
            summary.total_rejected(),
            summary.tokens_fully_scored,
            summary.high_conviction,
            summary.partial_results,
            summary.total_cost,
            summary.cache_hit_rate * 100.0,
            summary.duration_ms
        );
        match summary.outcome {
            CycleOutcome::Completed => tracing::info!("{}", line),
            CycleOutcome::TimedOut => tracing::warn!("{}", line),
            CycleOutcome::Aborted { .. } => tracing::error!("{}", line),
        }

        for (stage, count) in &summary.tokens_rejected_by_stage {
            tracing::debug!("  rejected at {}: {}", stage, count);
        }
        for (reason, count) in &summary.rejected_by_reason {
            tracing::debug!("  rejected for {}: {}", reason, count);
        }
        for (provider, errors) in &summary.provider_error_counts {
            if *errors > 0 {
                tracing::warn!("  {} errors: {}", provider, errors);
            }
        }
        for level in &summary.budget_alerts {
            tracing::warn!("  budget alert: {}% of daily budget used", level);
        }
    }
}
