//! Batch Coordinator
//!
//! Turns pending per-token `BatchRequest`s into provider calls:
//! 1. group by `(provider, field_set, priority)`
//! 2. serve what the cache already holds
//! 3. batch when the group is large enough or batching saves cost, in chunks
//!    of at most the provider's `max_batch_size`
//! 4. addresses a batch did not return are re-queued as individual calls;
//!    a failed batch falls back to individual calls for the whole chunk
//!
//! Every request ends `Found`, or `Unavailable` with the reason. None are
//! dropped. Requests arrive through a short collection window (`request`),
//! or are dispatched directly (`dispatch`).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use crate::adapters::provider::ProviderAdapter;
use crate::domain::{Address, BatchRequest, FieldSet, GroupKey, Priority, Provider, TokenRecord};
use crate::ports::{ProviderError, ProviderErrorKind};

/// Collection window and batching policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Flush a group this long after its first request
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Flush a group as soon as this many requests are pending
    #[serde(default = "default_flush_size")]
    pub flush_size: usize,
    /// Always batch groups of at least this size
    #[serde(default = "default_always_batch_at")]
    pub always_batch_at: usize,
}

fn default_window_ms() -> u64 {
    50
}

fn default_flush_size() -> usize {
    50
}

fn default_always_batch_at() -> usize {
    5
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            flush_size: default_flush_size(),
            always_batch_at: default_always_batch_at(),
        }
    }
}

impl BatchingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Why a request could not be served
#[derive(Debug, Clone, PartialEq)]
pub enum Unavailable {
    /// The provider does not know the token
    NotFound,
    /// Retries and fallbacks exhausted, or refused by the budget
    Failed(ProviderError),
    /// Requested after the cycle deadline
    CycleClosed,
    /// No adapter configured for the provider
    NoAdapter(Provider),
}

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unavailable::NotFound => f.write_str("not found"),
            Unavailable::Failed(err) => write!(f, "{}", err),
            Unavailable::CycleClosed => f.write_str("cycle closed"),
            Unavailable::NoAdapter(provider) => write!(f, "no adapter for {}", provider),
        }
    }
}

/// Final outcome of one request
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(TokenRecord),
    Unavailable(Unavailable),
}

impl Resolution {
    pub fn record(&self) -> Option<&TokenRecord> {
        match self {
            Resolution::Found(record) => Some(record),
            Resolution::Unavailable(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// Call counters for one coordinator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub batch_calls: u64,
    pub individual_calls: u64,
    pub cache_served: u64,
    /// Addresses a batch left out, re-queued individually
    pub requeued: u64,
    /// Failed batches replaced by individual calls
    pub fallbacks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    batch_calls: AtomicU64,
    individual_calls: AtomicU64,
    cache_served: AtomicU64,
    requeued: AtomicU64,
    fallbacks: AtomicU64,
}

type Waiter = (BatchRequest, oneshot::Sender<Resolution>);

#[derive(Default)]
struct PendingGroup {
    waiters: Vec<Waiter>,
    generation: u64,
}

/// Groups, batches and resolves per-token requests for one cycle
pub struct BatchCoordinator {
    adapters: HashMap<Provider, Arc<ProviderAdapter>>,
    config: BatchingConfig,
    pending: Mutex<HashMap<GroupKey, PendingGroup>>,
    closed: AtomicBool,
    counters: Counters,
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("providers", &self.adapters.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish()
    }
}

impl BatchCoordinator {
    pub fn new(adapters: HashMap<Provider, Arc<ProviderAdapter>>, config: BatchingConfig) -> Self {
        Self {
            adapters,
            config,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<GroupKey, PendingGroup>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            batch_calls: self.counters.batch_calls.load(Ordering::Relaxed),
            individual_calls: self.counters.individual_calls.load(Ordering::Relaxed),
            cache_served: self.counters.cache_served.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop admitting requests. Requests still waiting in a collection window
    /// resolve as `CycleClosed`; dispatches already running finish normally.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<Waiter> = self
            .lock_pending()
            .drain()
            .flat_map(|(_, group)| group.waiters)
            .collect();
        if !drained.is_empty() {
            tracing::debug!("Coordinator closed with {} queued requests", drained.len());
        }
        for (_, tx) in drained {
            let _ = tx.send(Resolution::Unavailable(Unavailable::CycleClosed));
        }
    }

    /// Queue one request into its group's collection window and await it
    pub async fn request(self: &Arc<Self>, request: BatchRequest) -> Resolution {
        if self.is_closed() {
            return Resolution::Unavailable(Unavailable::CycleClosed);
        }

        let key = request.group_key();
        let (tx, rx) = oneshot::channel();
        let mut start_timer = None;
        let mut flush_now = None;
        {
            let mut pending = self.lock_pending();
            if self.is_closed() {
                return Resolution::Unavailable(Unavailable::CycleClosed);
            }
            let group = pending.entry(key).or_default();
            if group.waiters.is_empty() {
                group.generation += 1;
                start_timer = Some(group.generation);
            }
            group.waiters.push((request, tx));
            if group.waiters.len() >= self.config.flush_size.max(1) {
                flush_now = Some(std::mem::take(&mut group.waiters));
            }
        }

        if let Some(waiters) = flush_now {
            self.spawn_flush(key, waiters);
        } else if let Some(generation) = start_timer {
            let this = Arc::clone(self);
            let window = self.config.window();
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let waiters = {
                    let mut pending = this.lock_pending();
                    match pending.get_mut(&key) {
                        Some(group) if group.generation == generation => std::mem::take(&mut group.waiters),
                        _ => Vec::new(),
                    }
                };
                if !waiters.is_empty() {
                    this.flush(key, waiters).await;
                }
            });
        }

        rx.await
            .unwrap_or(Resolution::Unavailable(Unavailable::CycleClosed))
    }

    /// Queue many requests; resolutions come back in input order
    pub async fn request_all(self: &Arc<Self>, requests: Vec<BatchRequest>) -> Vec<(BatchRequest, Resolution)> {
        let mut set = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            let this = Arc::clone(self);
            set.spawn(async move {
                let resolution = this.request(request.clone()).await;
                (index, request, resolution)
            });
        }

        let mut results = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!("Request task failed: {}", e),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);
        results.into_iter().map(|(_, req, res)| (req, res)).collect()
    }

    fn spawn_flush(self: &Arc<Self>, key: GroupKey, waiters: Vec<Waiter>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.flush(key, waiters).await });
    }

    async fn flush(&self, key: GroupKey, waiters: Vec<Waiter>) {
        let (provider, fields, priority) = key;
        let mut addresses: Vec<Address> = waiters.iter().map(|(r, _)| r.token_address.clone()).collect();
        addresses.sort();
        addresses.dedup();

        tracing::debug!("Flushing {} {} requests for {}", waiters.len(), fields, provider);
        let resolved = self.resolve_group(provider, fields, priority, addresses).await;
        for (request, tx) in waiters {
            let resolution = resolved
                .get(&request.token_address)
                .cloned()
                .unwrap_or(Resolution::Unavailable(Unavailable::NotFound));
            let _ = tx.send(resolution);
        }
    }

    /// Resolve requests immediately, bypassing the collection window
    pub async fn dispatch(&self, requests: Vec<BatchRequest>) -> Vec<(BatchRequest, Resolution)> {
        let mut groups: BTreeMap<GroupKey, Vec<Address>> = BTreeMap::new();
        for request in &requests {
            groups
                .entry(request.group_key())
                .or_default()
                .push(request.token_address.clone());
        }

        let mut resolved: HashMap<GroupKey, HashMap<Address, Resolution>> = HashMap::new();
        for (key, mut addresses) in groups {
            addresses.sort();
            addresses.dedup();
            let (provider, fields, priority) = key;
            let results = self.resolve_group(provider, fields, priority, addresses).await;
            resolved.insert(key, results);
        }

        requests
            .into_iter()
            .map(|request| {
                let resolution = resolved
                    .get(&request.group_key())
                    .and_then(|group| group.get(&request.token_address))
                    .cloned()
                    .unwrap_or(Resolution::Unavailable(Unavailable::NotFound));
                (request, resolution)
            })
            .collect()
    }

    /// Batch or individual decision for a group of `n` misses
    pub fn should_batch(&self, adapter: &ProviderAdapter, n: usize) -> bool {
        if n <= 1 || adapter.max_batch_size() <= 1 {
            return false;
        }
        let n = n.min(adapter.max_batch_size());
        n >= self.config.always_batch_at || adapter.cost_model().savings(n, adapter.base_cost()) > 0
    }

    async fn resolve_group(
        &self,
        provider: Provider,
        fields: FieldSet,
        priority: Priority,
        addresses: Vec<Address>,
    ) -> HashMap<Address, Resolution> {
        let mut resolved = HashMap::with_capacity(addresses.len());
        let Some(adapter) = self.adapters.get(&provider).cloned() else {
            for address in addresses {
                resolved.insert(address, Resolution::Unavailable(Unavailable::NoAdapter(provider)));
            }
            return resolved;
        };

        let mut misses = Vec::with_capacity(addresses.len());
        for address in addresses {
            match adapter.cached_one(&address, fields) {
                Some(Some(record)) => {
                    self.counters.cache_served.fetch_add(1, Ordering::Relaxed);
                    resolved.insert(address, Resolution::Found(record));
                }
                Some(None) => {
                    self.counters.cache_served.fetch_add(1, Ordering::Relaxed);
                    resolved.insert(address, Resolution::Unavailable(Unavailable::NotFound));
                }
                None => misses.push(address),
            }
        }

        let mut individual = Vec::new();
        if self.should_batch(&adapter, misses.len()) {
            for chunk in misses.chunks(adapter.max_batch_size()) {
                if chunk.len() == 1 {
                    individual.extend_from_slice(chunk);
                    continue;
                }
                self.counters.batch_calls.fetch_add(1, Ordering::Relaxed);
                match adapter.fetch_batch(chunk, fields, priority).await {
                    Ok(mut found) => {
                        let mut left_out = 0;
                        for address in chunk {
                            match found.remove(address) {
                                Some(record) => {
                                    resolved.insert(address.clone(), Resolution::Found(record));
                                }
                                None => {
                                    left_out += 1;
                                    individual.push(address.clone());
                                }
                            }
                        }
                        if left_out > 0 {
                            self.counters.requeued.fetch_add(left_out, Ordering::Relaxed);
                            tracing::debug!(
                                "{} batch returned {}/{}, re-queueing the rest",
                                provider,
                                chunk.len() as u64 - left_out,
                                chunk.len()
                            );
                        }
                    }
                    Err(err) if err.kind == ProviderErrorKind::BudgetRefused => {
                        for address in chunk {
                            resolved.insert(
                                address.clone(),
                                Resolution::Unavailable(Unavailable::Failed(err.clone().with_address(address))),
                            );
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            "{} batch of {} failed ({}), falling back to individual calls",
                            provider,
                            chunk.len(),
                            err
                        );
                        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                        individual.extend_from_slice(chunk);
                    }
                }
            }
        } else {
            individual = misses;
        }

        if !individual.is_empty() && self.is_closed() {
            tracing::debug!(
                "{} closed before {} individual {} calls, leaving them unserved",
                provider,
                individual.len(),
                fields
            );
            for address in individual.drain(..) {
                resolved.insert(address, Resolution::Unavailable(Unavailable::CycleClosed));
            }
        }

        if !individual.is_empty() {
            let mut set = JoinSet::new();
            for address in individual {
                let adapter = Arc::clone(&adapter);
                self.counters.individual_calls.fetch_add(1, Ordering::Relaxed);
                set.spawn(async move {
                    let result = adapter.fetch_one(&address, fields, priority).await;
                    (address, result)
                });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((address, Ok(Some(record)))) => {
                        resolved.insert(address, Resolution::Found(record));
                    }
                    Ok((address, Ok(None))) => {
                        resolved.insert(address, Resolution::Unavailable(Unavailable::NotFound));
                    }
                    Ok((address, Err(err))) => {
                        tracing::debug!("{} unavailable from {}: {}", address, provider, err);
                        resolved.insert(address, Resolution::Unavailable(Unavailable::Failed(err)));
                    }
                    Err(e) => tracing::error!("Individual fetch task failed: {}", e),
                }
            }
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cache::RecordCache;
    use crate::adapters::provider::AdapterSettings;
    use crate::adapters::rate_limiter::{RateLimitQuota, RateLimiter};
    use crate::domain::budget::DEFAULT_DAILY_BUDGET;
    use crate::domain::{BudgetConfig, BudgetMonitor};
    use crate::ports::mocks::{addr, market_record, ScriptedClient};
    use crate::ports::ProviderClient;
    use chrono::Utc;

    struct Harness {
        client: Arc<ScriptedClient>,
        coordinator: Arc<BatchCoordinator>,
        budget: Arc<BudgetMonitor>,
    }

    fn addresses(n: usize) -> Vec<Address> {
        (0..n).map(|i| addr(&format!("tok{:02}", i))).collect()
    }

    fn scripted(n: usize) -> ScriptedClient {
        addresses(n).iter().fold(ScriptedClient::new(Provider::Birdeye), |client, a| {
            client.with_token(market_record(Provider::Birdeye, a.as_str(), 10_000.0, 1_000.0, Utc::now()))
        })
    }

    fn harness(client: ScriptedClient, max_batch_size: usize, config: BatchingConfig) -> Harness {
        let client = Arc::new(client);
        let limiter = RateLimiter::new()
            .with_quota(Provider::Birdeye, RateLimitQuota::per_minute(6000))
            .unwrap();
        let budget = Arc::new(BudgetMonitor::new(BudgetConfig::default()));
        let adapter = ProviderAdapter::new(
            client.clone() as Arc<dyn ProviderClient>,
            AdapterSettings {
                base_cost: 10,
                max_batch_size,
                retry_base_delay: Duration::from_millis(1),
                ..Default::default()
            },
            Arc::new(limiter),
            Arc::new(RecordCache::new()),
            budget.clone(),
        );
        let adapters = HashMap::from([(Provider::Birdeye, Arc::new(adapter))]);
        Harness {
            client,
            coordinator: Arc::new(BatchCoordinator::new(adapters, config)),
            budget,
        }
    }

    fn requests(n: usize, priority: Priority) -> Vec<BatchRequest> {
        addresses(n)
            .into_iter()
            .map(|a| BatchRequest::new(a, Provider::Birdeye, FieldSet::Market, priority))
            .collect()
    }

    #[tokio::test]
    async fn test_partial_batch_requeues_missing() {
        let h = harness(scripted(10).with_batch_subset(7), 20, BatchingConfig::default());
        let results = h.coordinator.dispatch(requests(10, Priority::Normal)).await;

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|(_, r)| r.is_found()));
        assert_eq!(h.client.batch_calls().len(), 1);
        assert_eq!(h.client.one_calls().len(), 3);
        let stats = h.coordinator.stats();
        assert_eq!(stats.requeued, 3);
        assert_eq!(stats.individual_calls, 3);
    }

    #[tokio::test]
    async fn test_unknown_tokens_resolve_unavailable() {
        // Only 8 of the 10 exist anywhere
        let h = harness(scripted(8), 20, BatchingConfig::default());
        let results = h.coordinator.dispatch(requests(10, Priority::Normal)).await;

        assert_eq!(results.len(), 10);
        let missing: Vec<_> = results
            .iter()
            .filter(|(_, r)| matches!(r, Resolution::Unavailable(Unavailable::NotFound)))
            .collect();
        assert_eq!(missing.len(), 2);
    }

    #[tokio::test]
    async fn test_total_batch_failure_falls_back() {
        let client = scripted(6).with_batch_failure(ProviderErrorKind::Transient);
        let h = harness(client, 20, BatchingConfig::default());
        let results = h.coordinator.dispatch(requests(6, Priority::Normal)).await;

        assert!(results.iter().all(|(_, r)| r.is_found()));
        assert_eq!(h.client.one_calls().len(), 6);
        assert_eq!(h.coordinator.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_individual_failure_surfaces_per_token() {
        let client = scripted(3)
            .with_batch_failure(ProviderErrorKind::Client)
            .failing_one(&addr("tok01"), vec![ProviderErrorKind::Client]);
        let h = harness(client, 20, BatchingConfig::default());
        let results = h.coordinator.dispatch(requests(3, Priority::Normal)).await;

        let failed: Vec<_> = results
            .iter()
            .filter(|(_, r)| matches!(r, Resolution::Unavailable(Unavailable::Failed(_))))
            .map(|(req, _)| req.token_address.clone())
            .collect();
        assert_eq!(failed, vec![addr("tok01")]);
    }

    #[tokio::test]
    async fn test_chunks_never_exceed_max_batch_size() {
        let h = harness(scripted(10), 4, BatchingConfig::default());
        let results = h.coordinator.dispatch(requests(10, Priority::Normal)).await;

        assert!(results.iter().all(|(_, r)| r.is_found()));
        let sizes: Vec<usize> = h.client.batch_calls().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(h.client.one_calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_request_goes_individual() {
        let h = harness(scripted(1), 20, BatchingConfig::default());
        let results = h.coordinator.dispatch(requests(1, Priority::Normal)).await;
        assert!(results[0].1.is_found());
        assert!(h.client.batch_calls().is_empty());
        assert_eq!(h.client.one_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_results_written_through_cache() {
        let h = harness(scripted(5), 20, BatchingConfig::default());
        h.coordinator.dispatch(requests(5, Priority::Normal)).await;
        h.coordinator.dispatch(requests(5, Priority::Normal)).await;

        assert_eq!(h.client.batch_calls().len(), 1);
        assert_eq!(h.coordinator.stats().cache_served, 5);
        // ceil(5^0.8 * 10) = 37, billed once
        assert_eq!(h.budget.lifetime_cost(), 37);
    }

    #[tokio::test]
    async fn test_batching_decision() {
        let h = harness(scripted(0), 20, BatchingConfig::default());
        let adapter = h.coordinator.adapters[&Provider::Birdeye].clone();
        assert!(!h.coordinator.should_batch(&adapter, 1));
        // ceil(2^0.8 * 10) = 18 < 20
        assert!(h.coordinator.should_batch(&adapter, 2));

        let h = harness(scripted(0), 1, BatchingConfig::default());
        let adapter = h.coordinator.adapters[&Provider::Birdeye].clone();
        assert!(!h.coordinator.should_batch(&adapter, 10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_flushes_after_timer() {
        let config = BatchingConfig {
            window_ms: 100,
            flush_size: 50,
            always_batch_at: 2,
        };
        let h = harness(scripted(3), 20, config);
        let start = tokio::time::Instant::now();
        let results = h.coordinator.request_all(requests(3, Priority::Normal)).await;

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(results.iter().all(|(_, r)| r.is_found()));
        assert_eq!(h.client.batch_calls(), vec![addresses(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_flushes_at_size() {
        let config = BatchingConfig {
            window_ms: 60_000,
            flush_size: 4,
            always_batch_at: 2,
        };
        let h = harness(scripted(4), 20, config);
        let start = tokio::time::Instant::now();
        let results = h.coordinator.request_all(requests(4, Priority::Normal)).await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(results.len(), 4);
        assert_eq!(h.client.batch_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_resolves_queued_and_refuses_new() {
        let config = BatchingConfig {
            window_ms: 60_000,
            ..Default::default()
        };
        let h = harness(scripted(2), 20, config);
        let coordinator = h.coordinator.clone();
        let queued = tokio::spawn(async move { coordinator.request_all(requests(2, Priority::Normal)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.coordinator.close();
        let results = queued.await.unwrap();
        assert!(results
            .iter()
            .all(|(_, r)| matches!(r, Resolution::Unavailable(Unavailable::CycleClosed))));

        let late = h.coordinator.request(requests(1, Priority::High).remove(0)).await;
        assert_eq!(late, Resolution::Unavailable(Unavailable::CycleClosed));
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_batch_skips_individual_calls() {
        let slow = |client: ScriptedClient| client.with_delay(Duration::from_millis(100));
        for client in [
            slow(scripted(10).with_batch_subset(7)),
            slow(scripted(10).with_batch_failure(ProviderErrorKind::Client)),
        ] {
            let h = harness(client, 20, BatchingConfig::default());
            let coordinator = h.coordinator.clone();
            let running = tokio::spawn(async move { coordinator.dispatch(requests(10, Priority::Normal)).await });
            tokio::time::sleep(Duration::from_millis(50)).await;

            h.coordinator.close();
            let results = running.await.unwrap();

            assert_eq!(results.len(), 10);
            assert_eq!(h.client.batch_calls().len(), 1);
            assert!(h.client.one_calls().is_empty());
            assert_eq!(h.coordinator.stats().individual_calls, 0);
            let closed = results
                .iter()
                .filter(|(_, r)| matches!(r, Resolution::Unavailable(Unavailable::CycleClosed)))
                .count();
            let found = results.iter().filter(|(_, r)| r.is_found()).count();
            assert_eq!(closed + found, 10);
            assert!(closed >= 3);
        }
    }

    fn mixed_priorities() -> Vec<BatchRequest> {
        let mut requests = requests(6, Priority::High);
        for request in requests.iter_mut().take(3) {
            request.priority = Priority::Low;
        }
        requests
    }

    fn assert_low_refused_high_served(h: &Harness, results: &[(BatchRequest, Resolution)]) {
        for (request, resolution) in results {
            match request.priority {
                Priority::Low => assert!(
                    matches!(resolution, Resolution::Unavailable(Unavailable::Failed(err))
                        if err.kind == ProviderErrorKind::BudgetRefused),
                    "low request for {} should be refused, got {:?}",
                    request.token_address,
                    resolution
                ),
                _ => assert!(resolution.is_found()),
            }
        }
        // Only the high-priority half reached the provider
        let batches = h.client.batch_calls();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], addresses(6)[3..].to_vec());
        assert!(h.client.one_calls().is_empty());
    }

    #[tokio::test]
    async fn test_degraded_dispatch_admits_by_own_priority() {
        let h = harness(scripted(6), 20, BatchingConfig::default());
        h.budget.record_cost(DEFAULT_DAILY_BUDGET);
        assert!(h.budget.is_degraded());

        let results = h.coordinator.dispatch(mixed_priorities()).await;
        assert_eq!(results.len(), 6);
        assert_low_refused_high_served(&h, &results);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_window_admits_by_own_priority() {
        let config = BatchingConfig {
            window_ms: 100,
            flush_size: 50,
            always_batch_at: 2,
        };
        let h = harness(scripted(6), 20, config);
        h.budget.record_cost(DEFAULT_DAILY_BUDGET);

        let results = h.coordinator.request_all(mixed_priorities()).await;
        assert_eq!(results.len(), 6);
        assert_low_refused_high_served(&h, &results);
    }

    #[tokio::test]
    async fn test_missing_adapter() {
        let h = harness(scripted(1), 20, BatchingConfig::default());
        let request = BatchRequest::new(addr("x"), Provider::RugCheck, FieldSet::Security, Priority::High);
        let results = h.coordinator.dispatch(vec![request]).await;
        assert_eq!(
            results[0].1,
            Resolution::Unavailable(Unavailable::NoAdapter(Provider::RugCheck))
        );
    }
}
