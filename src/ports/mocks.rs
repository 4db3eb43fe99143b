//! Scriptable test doubles for the provider and sink ports
//!
//! `ScriptedClient` answers from canned records and can be told to fail
//! batches, return partial batches or fail individual lookups a set number of
//! times. Every call is recorded so tests can assert on call patterns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::provider::{ListParams, ProviderClient, ProviderError, ProviderErrorKind};
use super::sinks::{AlertSink, CycleSummary, ScoredToken, SummarySink};
use crate::domain::{
    Address, BirdeyeFields, DexScreenerFields, FieldSet, GeckoTerminalFields, Provider,
    ProviderPayload, RugCheckFields, TokenRecord,
};

/// A call observed by `ScriptedClient`
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    List,
    One(Address, FieldSet),
    Batch(Vec<Address>, FieldSet),
}

/// Provider client answering from canned data
#[derive(Debug)]
pub struct ScriptedClient {
    provider: Provider,
    listing: Vec<TokenRecord>,
    tokens: HashMap<Address, TokenRecord>,
    list_failure: Option<ProviderErrorKind>,
    batch_failure: Option<ProviderErrorKind>,
    batch_subset: Option<usize>,
    unknown_in_batch: HashSet<Address>,
    delay: Option<Duration>,
    one_failures: Mutex<HashMap<Address, VecDeque<ProviderErrorKind>>>,
    calls: Mutex<Vec<ClientCall>>,
}

impl ScriptedClient {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            listing: Vec::new(),
            tokens: HashMap::new(),
            list_failure: None,
            batch_failure: None,
            batch_subset: None,
            unknown_in_batch: HashSet::new(),
            delay: None,
            one_failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Records returned by `list`; also answer `one` / `batch`
    pub fn with_listing(mut self, records: Vec<TokenRecord>) -> Self {
        for record in &records {
            self.tokens.insert(record.address.clone(), record.clone());
        }
        self.listing = records;
        self
    }

    /// Record answering `one` / `batch` for its address
    pub fn with_token(mut self, record: TokenRecord) -> Self {
        self.tokens.insert(record.address.clone(), record);
        self
    }

    pub fn with_list_failure(mut self, kind: ProviderErrorKind) -> Self {
        self.list_failure = Some(kind);
        self
    }

    pub fn with_batch_failure(mut self, kind: ProviderErrorKind) -> Self {
        self.batch_failure = Some(kind);
        self
    }

    /// Batches answer only the first `n` known addresses
    pub fn with_batch_subset(mut self, n: usize) -> Self {
        self.batch_subset = Some(n);
        self
    }

    /// Address left out of batch answers but still served by `one`
    pub fn omitted_from_batch(mut self, address: &Address) -> Self {
        self.unknown_in_batch.insert(address.clone());
        self
    }

    /// `one(address)` fails with these kinds, in order, before succeeding
    pub fn failing_one(mut self, address: &Address, kinds: Vec<ProviderErrorKind>) -> Self {
        self.one_failures
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.clone(), kinds.into());
        self
    }

    /// Simulated network latency on every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn list_calls(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, ClientCall::List)).count()
    }

    pub fn one_calls(&self) -> Vec<Address> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ClientCall::One(a, _) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn batch_calls(&self) -> Vec<Vec<Address>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ClientCall::Batch(a, _) => Some(a),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ClientCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    async fn latency(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn fail(&self, kind: ProviderErrorKind) -> ProviderError {
        ProviderError::new(self.provider, kind, "scripted failure")
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn list(&self, params: &ListParams) -> Result<Vec<TokenRecord>, ProviderError> {
        self.record(ClientCall::List);
        self.latency().await;
        if let Some(kind) = self.list_failure {
            return Err(self.fail(kind));
        }
        Ok(self.listing.iter().take(params.limit).cloned().collect())
    }

    async fn one(&self, address: &Address, fields: FieldSet) -> Result<Option<TokenRecord>, ProviderError> {
        self.record(ClientCall::One(address.clone(), fields));
        self.latency().await;

        let scripted = self
            .one_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(address)
            .and_then(VecDeque::pop_front);
        if let Some(kind) = scripted {
            return Err(self.fail(kind).with_address(address));
        }
        Ok(self.tokens.get(address).cloned())
    }

    async fn batch(&self, addresses: &[Address], fields: FieldSet) -> Result<Vec<TokenRecord>, ProviderError> {
        self.record(ClientCall::Batch(addresses.to_vec(), fields));
        self.latency().await;
        if let Some(kind) = self.batch_failure {
            return Err(self.fail(kind));
        }

        let known = addresses
            .iter()
            .filter(|a| !self.unknown_in_batch.contains(*a))
            .filter_map(|a| self.tokens.get(a).cloned());
        Ok(match self.batch_subset {
            Some(n) => known.take(n).collect(),
            None => known.collect(),
        })
    }
}

/// Sink that keeps everything it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    published: Mutex<Vec<Vec<ScoredToken>>>,
    summaries: Mutex<Vec<CycleSummary>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Vec<ScoredToken>> {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn summaries(&self) -> Vec<CycleSummary> {
        self.summaries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn publish(&self, tokens: &[ScoredToken]) {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).push(tokens.to_vec());
    }
}

#[async_trait]
impl SummarySink for RecordingSink {
    async fn report(&self, summary: &CycleSummary) {
        self.summaries.lock().unwrap_or_else(|e| e.into_inner()).push(summary.clone());
    }
}

// ============================================================================
// Record fixtures
// ============================================================================

/// Normalized address from a literal
pub fn addr(raw: &str) -> Address {
    Address::normalize(raw).unwrap_or_else(|| panic!("blank fixture address"))
}

/// Discovery-level record with liquidity and 24h volume in the provider's shape
pub fn market_record(
    provider: Provider,
    address: &str,
    liquidity: f64,
    volume_24h: f64,
    fetched_at: DateTime<Utc>,
) -> TokenRecord {
    let payload = match provider {
        Provider::DexScreener => ProviderPayload::DexScreener(DexScreenerFields {
            liquidity_usd: Some(liquidity),
            volume_24h: Some(volume_24h),
            ..Default::default()
        }),
        Provider::GeckoTerminal => ProviderPayload::GeckoTerminal(GeckoTerminalFields {
            reserve_usd: Some(liquidity),
            volume_24h: Some(volume_24h),
            ..Default::default()
        }),
        Provider::Birdeye => ProviderPayload::Birdeye(BirdeyeFields {
            liquidity: Some(liquidity),
            volume_24h_usd: Some(volume_24h),
            ..Default::default()
        }),
        Provider::RugCheck => ProviderPayload::RugCheck(RugCheckFields::default()),
    };
    TokenRecord::new(addr(address), payload, fetched_at)
}
