//! Provider Adapter
//!
//! Wraps one `ProviderClient` with the shared cache, the provider's rate
//! limiter bucket, a max-in-flight semaphore, the retry policy and budget
//! accounting. The cache is the outer layer: a hit never touches the network,
//! the limiter or the budget.
//!
//! Retry policy per network call:
//! - transient (5xx, timeout, connection): up to `max_retries` retries with
//!   exponential backoff and jitter
//! - 429: penalize the provider's bucket, then one retry after backoff
//! - anything else: surfaced immediately

use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::adapters::cache::{CacheKey, DataClass, RecordCache};
use crate::adapters::rate_limiter::RateLimiter;
use crate::domain::{
    Address, BudgetMonitor, CallKind, CostModel, FieldSet, Priority, Provider, TokenRecord,
};
use crate::ports::{ListParams, ProviderClient, ProviderError, ProviderErrorKind};

/// Per-provider adapter settings
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSettings {
    /// Compute units billed for one individual call
    pub base_cost: u64,
    /// Largest batch the provider accepts
    pub max_batch_size: usize,
    /// Concurrent network calls allowed
    pub max_in_flight: usize,
    /// Retries for transient failures
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub retry_base_delay: Duration,
    /// Bucket cooldown applied on HTTP 429
    pub rate_limit_cooldown: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            base_cost: 1,
            max_batch_size: 1,
            max_in_flight: 4,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            rate_limit_cooldown: Duration::from_secs(5),
        }
    }
}

/// Cache-fronted, rate-limited, retrying access to one provider
pub struct ProviderAdapter {
    provider: Provider,
    client: Arc<dyn ProviderClient>,
    settings: AdapterSettings,
    limiter: Arc<RateLimiter>,
    cache: Arc<RecordCache>,
    budget: Arc<BudgetMonitor>,
    cost_model: CostModel,
    in_flight: Semaphore,
    errors: AtomicU64,
    network_calls: AtomicU64,
}

impl std::fmt::Debug for ProviderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAdapter")
            .field("provider", &self.provider)
            .field("settings", &self.settings)
            .field("errors", &self.errors)
            .finish()
    }
}

impl ProviderAdapter {
    pub fn new(
        client: Arc<dyn ProviderClient>,
        settings: AdapterSettings,
        limiter: Arc<RateLimiter>,
        cache: Arc<RecordCache>,
        budget: Arc<BudgetMonitor>,
    ) -> Self {
        Self {
            provider: client.provider(),
            in_flight: Semaphore::new(settings.max_in_flight.max(1)),
            client,
            settings,
            limiter,
            cache,
            budget,
            cost_model: CostModel::new(),
            errors: AtomicU64::new(0),
            network_calls: AtomicU64::new(0),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn base_cost(&self) -> u64 {
        self.settings.base_cost
    }

    pub fn max_batch_size(&self) -> usize {
        self.settings.max_batch_size.max(1)
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    /// Errors surfaced to callers since startup (budget refusals excluded)
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Network attempts made since startup
    pub fn network_calls(&self) -> u64 {
        self.network_calls.load(Ordering::Relaxed)
    }

    fn list_key(&self, params: &ListParams) -> CacheKey {
        CacheKey::new(self.provider, "list", format!("limit={}", params.limit), DataClass::Listing)
    }

    fn one_key(&self, address: &Address, fields: FieldSet) -> CacheKey {
        CacheKey::new(
            self.provider,
            format!("token/{}", fields),
            address.key(),
            DataClass::for_field_set(fields),
        )
    }

    /// Discovery listing. Billed as one individual call.
    pub async fn fetch_list(&self, params: &ListParams) -> Result<Vec<TokenRecord>, ProviderError> {
        let key = self.list_key(params);
        self.cache
            .get_or_fetch(&key, || async {
                let cost = self.cost_model.individual_cost(self.settings.base_cost);
                self.admit(Priority::High, CallKind::Individual, cost, None)?;
                let records = self.call(None, || self.client.list(params)).await?;
                self.budget.record_cost(cost);
                tracing::debug!("{} listed {} tokens", self.provider, records.len());
                Ok(records)
            })
            .await
    }

    /// One token; `Ok(None)` when the provider does not know it
    ///
    /// Concurrent callers share one flight per token. A caller that joined a
    /// flight whose leader was refused by the budget re-checks admission at
    /// its own priority and, if admitted, fetches once more.
    pub async fn fetch_one(
        &self,
        address: &Address,
        fields: FieldSet,
        priority: Priority,
    ) -> Result<Option<TokenRecord>, ProviderError> {
        let key = self.one_key(address, fields);
        let cost = self.cost_model.individual_cost(self.settings.base_cost);
        let mut retried = false;

        loop {
            let mut led = false;
            let result = self
                .cache
                .get_or_fetch(&key, || {
                    led = true;
                    async move {
                        self.admit(priority, CallKind::Individual, cost, Some(address))?;
                        let record = self.call(Some(address), || self.client.one(address, fields)).await?;
                        self.budget.record_cost(cost);
                        Ok(record.into_iter().collect::<Vec<_>>())
                    }
                })
                .await;

            match result {
                Err(err)
                    if err.kind == ProviderErrorKind::BudgetRefused
                        && !led
                        && !retried
                        && self.budget.admit(priority, CallKind::Individual, cost) =>
                {
                    tracing::debug!(
                        "{} shared refusal for {}, retrying at {} priority",
                        self.provider,
                        address,
                        priority
                    );
                    retried = true;
                }
                other => return other.map(|records| records.into_iter().next()),
            }
        }
    }

    /// Cached answer for one token without touching the network
    ///
    /// `Some(None)` means the provider is known not to have the token.
    pub fn cached_one(&self, address: &Address, fields: FieldSet) -> Option<Option<TokenRecord>> {
        self.cache
            .get(&self.one_key(address, fields))
            .map(|records| records.into_iter().next())
    }

    /// One batch call over `addresses` (at most `max_batch_size`)
    ///
    /// Returned records are written through the cache under their per-token
    /// keys. Addresses the provider did not return are absent from the map.
    pub async fn fetch_batch(
        &self,
        addresses: &[Address],
        fields: FieldSet,
        priority: Priority,
    ) -> Result<HashMap<Address, TokenRecord>, ProviderError> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }
        if addresses.len() > self.max_batch_size() {
            return Err(ProviderError::new(
                self.provider,
                ProviderErrorKind::Config,
                format!(
                    "batch of {} exceeds max batch size {}",
                    addresses.len(),
                    self.max_batch_size()
                ),
            ));
        }

        let cost = self.cost_model.batch_cost(self.settings.base_cost, addresses.len());
        self.admit(priority, CallKind::Batch, cost, None)?;
        let records = self.call(None, || self.client.batch(addresses, fields)).await?;
        self.budget.record_cost(cost);

        let mut found: HashMap<Address, TokenRecord> = HashMap::with_capacity(records.len());
        for record in records {
            if addresses.contains(&record.address) {
                found.entry(record.address.clone()).or_insert(record);
            }
        }
        for (address, record) in &found {
            self.cache.set(self.one_key(address, fields), vec![record.clone()]);
        }

        tracing::debug!(
            "{} batch {}: {}/{} returned for {} units",
            self.provider,
            fields,
            found.len(),
            addresses.len(),
            cost
        );
        Ok(found)
    }

    fn admit(
        &self,
        priority: Priority,
        kind: CallKind,
        cost: u64,
        address: Option<&Address>,
    ) -> Result<(), ProviderError> {
        if self.budget.admit(priority, kind, cost) {
            return Ok(());
        }
        tracing::debug!(
            "{} {:?} call ({} priority, {} units) refused in degraded mode",
            self.provider,
            kind,
            priority,
            cost
        );
        let err = ProviderError::new(self.provider, ProviderErrorKind::BudgetRefused, "daily budget exhausted");
        Err(match address {
            Some(a) => err.with_address(a),
            None => err,
        })
    }

    /// One logical call: limiter + semaphore per attempt, retried per policy
    async fn call<T, F, Fut>(&self, address: Option<&Address>, request: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        let mut rate_limit_retried = false;

        loop {
            let result = {
                // Tokens first, so a slot is never held while waiting on the bucket
                self.limiter
                    .acquire(self.provider)
                    .await
                    .map_err(|e| ProviderError::new(self.provider, ProviderErrorKind::Config, e.to_string()))?;
                let _slot = self.in_flight.acquire().await.map_err(|_| {
                    ProviderError::new(self.provider, ProviderErrorKind::Config, "adapter closed")
                })?;
                self.network_calls.fetch_add(1, Ordering::Relaxed);
                request().await
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.kind {
                ProviderErrorKind::Transient if attempt < self.settings.max_retries => {
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        "{} transient failure ({}), retrying in {:?} (attempt {}/{})",
                        self.provider,
                        err.reason,
                        backoff,
                        attempt + 1,
                        self.settings.max_retries
                    );
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
                ProviderErrorKind::RateLimited if !rate_limit_retried => {
                    self.limiter.penalize(self.provider, self.settings.rate_limit_cooldown);
                    rate_limit_retried = true;
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                _ => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("{} call failed: {}", self.provider, err);
                    return Err(match (err.address.is_none(), address) {
                        (true, Some(a)) => err.with_address(a),
                        _ => err,
                    });
                }
            }
        }
    }

    /// `base * 2^attempt` plus up to 25% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.settings.retry_base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(10));
        let jitter = if exp >= 4 {
            rand::thread_rng().gen_range(0..=exp / 4)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }
}
