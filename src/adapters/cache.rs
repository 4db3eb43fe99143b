//! Shared Response Cache
//!
//! TTL cache shared by every provider adapter and the batch coordinator.
//! - TTL comes from the entry's data class: volatile prices expire in
//!   seconds, security flags and creation metadata live for hours
//! - Expired entries are purged lazily when read
//! - Size bound with least-recently-used eviction
//! - `get_or_fetch` is single-flight: concurrent callers for one key share
//!   a single fetch, including its error
//!
//! Errors are never stored. If the fetching caller is cancelled, a waiting
//! caller takes over the fetch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::{FieldSet, Provider, TokenRecord};
use crate::ports::ProviderError;

/// Volatility class of cached data, selects the TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClass {
    Price,
    Market,
    Listing,
    Activity,
    Security,
    Metadata,
}

impl DataClass {
    pub const ALL: [DataClass; 6] = [
        DataClass::Price,
        DataClass::Market,
        DataClass::Listing,
        DataClass::Activity,
        DataClass::Security,
        DataClass::Metadata,
    ];

    pub fn default_ttl(&self) -> Duration {
        match self {
            DataClass::Price => Duration::from_secs(30),
            DataClass::Market => Duration::from_secs(120),
            DataClass::Listing => Duration::from_secs(60),
            DataClass::Activity => Duration::from_secs(300),
            DataClass::Security => Duration::from_secs(6 * 3600),
            DataClass::Metadata => Duration::from_secs(24 * 3600),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataClass::Price => "price",
            DataClass::Market => "market",
            DataClass::Listing => "listing",
            DataClass::Activity => "activity",
            DataClass::Security => "security",
            DataClass::Metadata => "metadata",
        }
    }

    /// Class used for per-token lookups of a field set
    pub fn for_field_set(fields: FieldSet) -> Self {
        match fields {
            FieldSet::Market => DataClass::Market,
            FieldSet::Activity | FieldSet::Holders => DataClass::Activity,
            FieldSet::Security => DataClass::Security,
        }
    }
}

impl fmt::Display for DataClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TTL per data class
#[derive(Debug, Clone, PartialEq)]
pub struct TtlTable {
    ttls: HashMap<DataClass, Duration>,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            ttls: DataClass::ALL.iter().map(|c| (*c, c.default_ttl())).collect(),
        }
    }
}

impl TtlTable {
    pub fn with_ttl(mut self, class: DataClass, ttl: Duration) -> Self {
        self.ttls.insert(class, ttl);
        self
    }

    pub fn ttl(&self, class: DataClass) -> Duration {
        self.ttls.get(&class).copied().unwrap_or_else(|| class.default_ttl())
    }
}

/// Cache key: provider + endpoint + params, tagged with its data class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider: Provider,
    pub endpoint: String,
    pub params: String,
    pub data_class: DataClass,
}

impl CacheKey {
    pub fn new(
        provider: Provider,
        endpoint: impl Into<String>,
        params: impl Into<String>,
        data_class: DataClass,
    ) -> Self {
        Self {
            provider,
            endpoint: endpoint.into(),
            params: params.into(),
            data_class,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}?{}", self.provider, self.endpoint, self.params)
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    last_access: Instant,
}

#[derive(Debug, Clone)]
enum Flight<V, E> {
    Pending,
    Done(Result<V, E>),
}

/// Counters since the cache was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that waited on another caller's fetch (counted as hits)
    pub coalesced: u64,
    pub entries: usize,
    pub expired_evictions: u64,
    pub lru_evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Counter deltas relative to an earlier snapshot
    pub fn since(&self, earlier: &CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits.saturating_sub(earlier.hits),
            misses: self.misses.saturating_sub(earlier.misses),
            coalesced: self.coalesced.saturating_sub(earlier.coalesced),
            entries: self.entries,
            expired_evictions: self.expired_evictions.saturating_sub(earlier.expired_evictions),
            lru_evictions: self.lru_evictions.saturating_sub(earlier.lru_evictions),
        }
    }
}

#[derive(Debug)]
struct Inner<V, E> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    inflight: HashMap<CacheKey, watch::Sender<Flight<V, E>>>,
    stats: CacheStats,
}

enum Join<'a, V: Clone, E: Clone> {
    Hit(V),
    Lead(FlightGuard<'a, V, E>),
    Follow(watch::Receiver<Flight<V, E>>),
}

/// Leader's claim on an in-flight key; releases the claim if dropped early
struct FlightGuard<'a, V: Clone, E: Clone> {
    cache: &'a TtlCache<V, E>,
    key: CacheKey,
    completed: bool,
}

impl<V: Clone, E: Clone> FlightGuard<'_, V, E> {
    fn complete(mut self, result: &Result<V, E>) {
        let mut inner = self.cache.lock();
        if let Ok(value) = result {
            self.cache.store(&mut inner, self.key.clone(), value.clone(), None);
        }
        if let Some(tx) = inner.inflight.remove(&self.key) {
            tx.send_replace(Flight::Done(result.clone()));
        }
        self.completed = true;
    }
}

impl<V: Clone, E: Clone> Drop for FlightGuard<'_, V, E> {
    fn drop(&mut self) {
        if !self.completed {
            // Dropping the sender wakes followers so one of them can lead
            self.cache.lock().inflight.remove(&self.key);
        }
    }
}

/// Single-flight TTL cache
#[derive(Debug)]
pub struct TtlCache<V, E> {
    ttls: TtlTable,
    max_entries: usize,
    inner: Mutex<Inner<V, E>>,
}

/// Cache of provider responses (`one` lookups hold zero or one record)
pub type RecordCache = TtlCache<Vec<TokenRecord>, ProviderError>;

impl<V: Clone, E: Clone> TtlCache<V, E> {
    /// Default max cache entries
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    pub fn new() -> Self {
        Self::with_config(TtlTable::default(), Self::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_config(ttls: TtlTable, max_entries: usize) -> Self {
        Self {
            ttls,
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                inflight: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V, E>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ttl_for(&self, class: DataClass) -> Duration {
        self.ttls.ttl(class)
    }

    /// Fresh value, or `None` (expired entries are purged here)
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut inner = self.lock();
        let value = Self::lookup(&mut inner, key, Instant::now());
        if value.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        value
    }

    /// Peek without touching hit/miss counters
    pub fn peek(&self, key: &CacheKey) -> Option<V> {
        let mut inner = self.lock();
        Self::lookup(&mut inner, key, Instant::now())
    }

    /// Store with the TTL of the key's data class
    pub fn set(&self, key: CacheKey, value: V) {
        let mut inner = self.lock();
        self.store(&mut inner, key, value, None);
    }

    /// Store with an explicit TTL
    pub fn set_with_ttl(&self, key: CacheKey, value: V, ttl: Duration) {
        let mut inner = self.lock();
        self.store(&mut inner, key, value, Some(ttl));
    }

    /// Return the cached value or run `fetch` once for all concurrent callers
    pub async fn get_or_fetch<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let guard = loop {
            match self.join(key) {
                Join::Hit(value) => return Ok(value),
                Join::Lead(guard) => break guard,
                Join::Follow(rx) => {
                    if let Some(result) = Self::wait(rx).await {
                        return result;
                    }
                    tracing::debug!("Cache fetch for {} abandoned, retrying", key);
                }
            }
        };

        let result = fetch().await;
        guard.complete(&result);
        result
    }

    fn join(&self, key: &CacheKey) -> Join<'_, V, E> {
        let mut inner = self.lock();
        if let Some(value) = Self::lookup(&mut inner, key, Instant::now()) {
            inner.stats.hits += 1;
            return Join::Hit(value);
        }
        if let Some(tx) = inner.inflight.get(key) {
            let rx = tx.subscribe();
            inner.stats.hits += 1;
            inner.stats.coalesced += 1;
            return Join::Follow(rx);
        }

        let (tx, _) = watch::channel(Flight::Pending);
        inner.inflight.insert(key.clone(), tx);
        inner.stats.misses += 1;
        Join::Lead(FlightGuard {
            cache: self,
            key: key.clone(),
            completed: false,
        })
    }

    /// Leader's result, or `None` if the leader went away without one
    async fn wait(mut rx: watch::Receiver<Flight<V, E>>) -> Option<Result<V, E>> {
        loop {
            if let Flight::Done(result) = &*rx.borrow_and_update() {
                return Some(result.clone());
            }
            if rx.changed().await.is_err() {
                return match &*rx.borrow() {
                    Flight::Done(result) => Some(result.clone()),
                    Flight::Pending => None,
                };
            }
        }
    }

    fn lookup(inner: &mut Inner<V, E>, key: &CacheKey, now: Instant) -> Option<V> {
        let expires_at = inner.entries.get(key)?.expires_at;
        if expires_at <= now {
            inner.entries.remove(key);
            inner.stats.expired_evictions += 1;
            return None;
        }
        let entry = inner.entries.get_mut(key)?;
        entry.last_access = now;
        Some(entry.value.clone())
    }

    fn store(&self, inner: &mut Inner<V, E>, key: CacheKey, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or_else(|| self.ttls.ttl(key.data_class));

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_entries {
            let before = inner.entries.len();
            inner.entries.retain(|_, entry| entry.expires_at > now);
            inner.stats.expired_evictions += (before - inner.entries.len()) as u64;

            if inner.entries.len() >= self.max_entries {
                if let Some(lru) = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(k, _)| k.clone())
                {
                    inner.entries.remove(&lru);
                    inner.stats.lru_evictions += 1;
                }
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
                last_access: now,
            },
        );
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Drop every expired entry now
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - inner.entries.len();
        inner.stats.expired_evictions += purged as u64;
        purged
    }

    /// Entries held, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }
}

impl<V: Clone, E: Clone> Default for TtlCache<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type TestCache = TtlCache<u32, String>;

    fn key(name: &str, class: DataClass) -> CacheKey {
        CacheKey::new(Provider::DexScreener, "tokens", name, class)
    }

    #[test]
    fn test_default_ttls() {
        let table = TtlTable::default();
        assert_eq!(table.ttl(DataClass::Price), Duration::from_secs(30));
        assert_eq!(table.ttl(DataClass::Security), Duration::from_secs(21_600));
        let table = table.with_ttl(DataClass::Price, Duration::from_secs(5));
        assert_eq!(table.ttl(DataClass::Price), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_never_returned_after_expiry() {
        let cache = TestCache::new();
        let k = key("a", DataClass::Price);
        cache.set(k.clone(), 7);
        assert_eq!(cache.get(&k), Some(7));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get(&k), Some(7));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&k), None);
        assert_eq!(cache.len(), 0, "expired entry purged on read");
        assert_eq!(cache.stats().expired_evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_expiry() {
        let cache = TestCache::new();
        let k = key("a", DataClass::Price);
        cache.set(k.clone(), 1);
        tokio::time::advance(Duration::from_secs(20)).await;
        cache.set(k.clone(), 2);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(cache.get(&k), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_at_capacity() {
        let cache = TestCache::with_config(TtlTable::default(), 2);
        let (a, b, c) = (
            key("a", DataClass::Metadata),
            key("b", DataClass::Metadata),
            key("c", DataClass::Metadata),
        );
        cache.set(a.clone(), 1);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.set(b.clone(), 2);
        tokio::time::advance(Duration::from_millis(10)).await;
        // Touch a so b becomes least recently used
        assert_eq!(cache.get(&a), Some(1));
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.set(c.clone(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek(&b), None);
        assert_eq!(cache.peek(&a), Some(1));
        assert_eq!(cache.stats().lru_evictions, 1);
    }

    #[tokio::test]
    async fn test_single_flight_ten_callers() {
        let cache = Arc::new(TestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("hot", DataClass::Market);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let calls = calls.clone();
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&k, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<u32, String>(42)
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_error_shared_but_not_cached() {
        let cache = Arc::new(TestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("bad", DataClass::Market);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&k, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err::<u32, String>("HTTP 503".into())
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), Err("HTTP 503".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());

        // Next caller fetches again
        let result = cache.get_or_fetch(&k, || async { Ok::<u32, String>(9) }).await;
        assert_eq!(result, Ok(9));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_leader_hands_over() {
        let cache = Arc::new(TestCache::new());
        let k = key("slow", DataClass::Market);

        let leader = {
            let cache = cache.clone();
            let k = k.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&k, || async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok::<u32, String>(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = {
            let cache = cache.clone();
            let k = k.clone();
            tokio::spawn(async move { cache.get_or_fetch(&k, || async { Ok::<u32, String>(2) }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        leader.abort();
        let result = tokio::time::timeout(Duration::from_secs(1), follower)
            .await
            .expect("follower finished")
            .unwrap();
        assert_eq!(result, Ok(2));
        assert_eq!(cache.peek(&k), Some(2));
    }

    #[test]
    fn test_hit_rate_and_delta() {
        let cache = TestCache::new();
        let k = key("a", DataClass::Metadata);
        assert_eq!(cache.get(&k), None);
        let before = cache.stats();
        cache.set(k.clone(), 1);
        cache.get(&k);
        cache.get(&k);
        cache.get(&k);

        let stats = cache.stats();
        approx::assert_relative_eq!(stats.hit_rate(), 0.75);
        let delta = stats.since(&before);
        assert_eq!(delta.hits, 3);
        assert_eq!(delta.misses, 0);
        approx::assert_relative_eq!(delta.hit_rate(), 1.0);
    }

    #[test]
    fn test_field_set_classes() {
        assert_eq!(DataClass::for_field_set(FieldSet::Market), DataClass::Market);
        assert_eq!(DataClass::for_field_set(FieldSet::Security), DataClass::Security);
        assert_eq!(DataClass::for_field_set(FieldSet::Holders), DataClass::Activity);
    }
}
