//! Correlator
//!
//! Merges the per-cycle stream of provider records into one `MergedToken`
//! per canonical address. Every provider's observation of every field is
//! kept, and the reconciled view is recomputed from the full observation set
//! after each upsert, so arrival order never changes the result.
//!
//! Reconciliation:
//! - numeric: most recently fetched value (ties -> provider order); when
//!   providers disagree by more than the tolerance, the median
//! - labels: first writer (earliest fetch, ties -> provider order), unless a
//!   provider is authoritative for that label

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::merged::{LabelObservation, Observation};
use crate::domain::{Address, Label, MergedToken, Metric, Provider, TokenRecord};

/// Default relative disagreement before falling back to the median
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Field reconciliation rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileRules {
    /// `(max - min) / |median|` above which the median wins
    pub tolerance: f64,
    /// Provider whose value always wins for a label
    pub authoritative: BTreeMap<Label, Provider>,
}

impl Default for ReconcileRules {
    fn default() -> Self {
        let authoritative = [
            Label::RiskLevel,
            Label::RiskFlags,
            Label::MintAuthority,
            Label::FreezeAuthority,
        ]
        .into_iter()
        .map(|label| (label, Provider::RugCheck))
        .collect();

        Self {
            tolerance: DEFAULT_TOLERANCE,
            authoritative,
        }
    }
}

impl ReconcileRules {
    /// Reconciled value of one metric from its per-provider observations
    pub fn reconcile_metric(&self, observations: &BTreeMap<Provider, Observation>) -> Option<f64> {
        let values: Vec<f64> = observations.values().map(|o| o.value).collect();
        if values.len() <= 1 {
            return values.first().copied();
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let median = Data::new(values).median();

        let disagree = if median.abs() > f64::EPSILON {
            (max - min) / median.abs() > self.tolerance
        } else {
            max - min > f64::EPSILON
        };
        if disagree {
            return Some(median);
        }

        // BTreeMap iterates in provider order, so the first max wins ties
        let mut latest: Option<(DateTime<Utc>, f64)> = None;
        for obs in observations.values() {
            if latest.map_or(true, |(at, _)| obs.fetched_at > at) {
                latest = Some((obs.fetched_at, obs.value));
            }
        }
        latest.map(|(_, value)| value)
    }

    /// Reconciled value of one label
    pub fn reconcile_label(
        &self,
        label: Label,
        observations: &BTreeMap<Provider, LabelObservation>,
    ) -> Option<String> {
        if let Some(authority) = self.authoritative.get(&label) {
            if let Some(obs) = observations.get(authority) {
                return Some(obs.value.clone());
            }
        }

        let mut first: Option<&LabelObservation> = None;
        for obs in observations.values() {
            if first.map_or(true, |f| obs.fetched_at < f.fetched_at) {
                first = Some(obs);
            }
        }
        first.map(|obs| obs.value.clone())
    }
}

/// Per-cycle merge state, keyed by canonical address
#[derive(Debug, Clone, Default)]
pub struct Correlator {
    rules: ReconcileRules,
    tokens: BTreeMap<Address, MergedToken>,
}

impl Correlator {
    pub fn new(rules: ReconcileRules) -> Self {
        Self {
            rules,
            tokens: BTreeMap::new(),
        }
    }

    pub fn rules(&self) -> &ReconcileRules {
        &self.rules
    }

    /// Upsert a discovery record: counts the provider as a source
    pub fn ingest(&mut self, record: TokenRecord) {
        let token = self
            .tokens
            .entry(record.address.clone())
            .or_insert_with(|| MergedToken::new(record.address.clone()));
        token.sources.insert(record.provider);
        Self::merge_fields(&self.rules, token, &record);
    }

    pub fn ingest_all(&mut self, records: impl IntoIterator<Item = TokenRecord>) {
        for record in records {
            self.ingest(record);
        }
    }

    /// Merge a later-stage record into an existing token without touching
    /// its sources. Returns false if the token is unknown this cycle.
    pub fn enrich(&mut self, record: &TokenRecord) -> bool {
        match self.tokens.get_mut(&record.address) {
            Some(token) => {
                Self::merge_fields(&self.rules, token, record);
                true
            }
            None => false,
        }
    }

    fn merge_fields(rules: &ReconcileRules, token: &mut MergedToken, record: &TokenRecord) {
        let fields = record.fields();

        let mut touched_metrics = BTreeSet::new();
        for (metric, value) in fields.metrics {
            if !value.is_finite() {
                continue;
            }
            let slot = token.metric_obs.entry(metric).or_default();
            let incoming = Observation {
                value,
                fetched_at: record.fetched_at,
            };
            // Repeat reports from one provider: keep the newest (value breaks ties)
            let keep = match slot.get(&record.provider) {
                Some(existing) => {
                    (incoming.fetched_at, incoming.value.to_bits())
                        > (existing.fetched_at, existing.value.to_bits())
                }
                None => true,
            };
            if keep {
                slot.insert(record.provider, incoming);
                touched_metrics.insert(metric);
            }
        }

        let mut touched_labels = BTreeSet::new();
        for (label, value) in fields.labels {
            let slot = token.label_obs.entry(label).or_default();
            let incoming = LabelObservation {
                value,
                fetched_at: record.fetched_at,
            };
            // Repeat reports from one provider: keep the earliest (value breaks ties)
            let keep = match slot.get(&record.provider) {
                Some(existing) => {
                    (incoming.fetched_at, &incoming.value) < (existing.fetched_at, &existing.value)
                }
                None => true,
            };
            if keep {
                slot.insert(record.provider, incoming);
                touched_labels.insert(label);
            }
        }

        for metric in touched_metrics {
            if let Some(value) = token.metric_obs.get(&metric).and_then(|obs| rules.reconcile_metric(obs)) {
                token.normalized_metrics.insert(metric, value);
            }
        }
        for label in touched_labels {
            if let Some(value) = token
                .label_obs
                .get(&label)
                .and_then(|obs| rules.reconcile_label(label, obs))
            {
                token.labels.insert(label, value);
            }
        }
    }

    pub fn get(&self, address: &Address) -> Option<&MergedToken> {
        self.tokens.get(address)
    }

    pub fn get_mut(&mut self, address: &Address) -> Option<&mut MergedToken> {
        self.tokens.get_mut(address)
    }

    pub fn tokens(&self) -> &BTreeMap<Address, MergedToken> {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> impl Iterator<Item = &mut MergedToken> {
        self.tokens.values_mut()
    }

    pub fn into_tokens(self) -> BTreeMap<Address, MergedToken> {
        self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens missing liquidity or 24h volume after discovery
    pub fn gaps(&self) -> Vec<Address> {
        self.tokens
            .values()
            .filter(|t| t.metric(Metric::LiquidityUsd).is_none() || t.metric(Metric::Volume24hUsd).is_none())
            .map(|t| t.address.clone())
            .collect()
    }

    /// Tokens ordered by platform count, then liquidity, then address
    pub fn ranked(&self) -> Vec<&MergedToken> {
        let mut ranked: Vec<&MergedToken> = self.tokens.values().collect();
        ranked.sort_by(|a, b| compare_rank(a, b));
        ranked
    }
}

/// Discovery ranking order: more platforms, deeper liquidity, lower address
pub fn compare_rank(a: &MergedToken, b: &MergedToken) -> std::cmp::Ordering {
    b.platform_count()
        .cmp(&a.platform_count())
        .then_with(|| b.liquidity().total_cmp(&a.liquidity()))
        .then_with(|| a.address.cmp(&b.address))
}
