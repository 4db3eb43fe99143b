//! Runtime wiring
//!
//! Turns a validated `Config` into a ready `DiscoveryCycle`: one shared rate
//! limiter, cache and budget monitor, and one HTTP adapter per enabled provider.

use std::collections::HashMap;
use std::sync::Arc;

use super::loader::{Config, ConfigError};
use crate::adapters::cache::RecordCache;
use crate::adapters::provider::{HttpProviderClient, ProviderAdapter};
use crate::adapters::rate_limiter::RateLimiter;
use crate::adapters::sinks::LogSink;
use crate::application::{DiscoveryCycle, ScoringPipeline};
use crate::domain::{BudgetMonitor, Provider};
use crate::ports::ProviderClient;

/// Shared infrastructure built from one configuration
pub struct Runtime {
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<RecordCache>,
    pub budget: Arc<BudgetMonitor>,
}

impl Runtime {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut limiter = RateLimiter::new();
        for (provider, section) in config.enabled_providers() {
            limiter
                .register(provider, section.quota())
                .map_err(|e| ConfigError::ValidationError(format!("{}: {}", provider, e)))?;
        }

        Ok(Self {
            limiter: Arc::new(limiter),
            cache: Arc::new(RecordCache::with_config(
                config.cache.ttl_table(),
                config.cache.max_entries,
            )),
            budget: Arc::new(BudgetMonitor::new(config.budget.to_budget_config())),
        })
    }

    /// Wrap `client` in the cache/rate limit/budget layer configured for its provider
    pub fn adapter(&self, config: &Config, client: Arc<dyn ProviderClient>) -> Result<Arc<ProviderAdapter>, ConfigError> {
        let provider = client.provider();
        let section = config
            .providers
            .get(&provider)
            .filter(|s| s.enabled)
            .ok_or_else(|| ConfigError::ValidationError(format!("{} is not an enabled provider", provider)))?;

        Ok(Arc::new(ProviderAdapter::new(
            client,
            section.adapter_settings(),
            self.limiter.clone(),
            self.cache.clone(),
            self.budget.clone(),
        )))
    }
}

/// HTTP clients for every enabled provider
pub fn http_clients(config: &Config) -> Result<Vec<Arc<dyn ProviderClient>>, ConfigError> {
    config
        .enabled_providers()
        .map(|(provider, section)| {
            if section.get_api_key(provider).is_none() && provider == Provider::Birdeye {
                tracing::warn!("{} has no API key (set {})", provider, provider.api_key_env());
            }
            HttpProviderClient::new(provider, section.endpoints(provider))
                .map(|client| Arc::new(client) as Arc<dyn ProviderClient>)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))
        })
        .collect()
}

/// Assemble a discovery cycle over the given clients
pub fn build_cycle_with_clients(
    config: &Config,
    clients: Vec<Arc<dyn ProviderClient>>,
) -> Result<DiscoveryCycle, ConfigError> {
    let runtime = Runtime::from_config(config)?;

    let mut adapters = HashMap::new();
    for client in clients {
        let adapter = runtime.adapter(config, client)?;
        adapters.insert(adapter.provider(), adapter);
    }

    let pipeline = ScoringPipeline::new(config.scoring.clone())?;
    let sink = Arc::new(LogSink {
        include_low_conviction: config.logging.include_low_conviction,
    });

    tracing::info!(
        "Built discovery cycle with {} providers, daily budget {} units",
        adapters.len(),
        config.budget.daily_budget
    );

    Ok(DiscoveryCycle::new(
        config.cycle.clone(),
        adapters,
        runtime.cache,
        runtime.budget,
        pipeline,
    )
    .with_batching(config.batching.clone())
    .with_rules(config.correlation.rules())
    .with_sinks(sink.clone(), sink))
}

/// Assemble a discovery cycle against the live provider APIs
pub fn build_cycle(config: &Config) -> Result<DiscoveryCycle, ConfigError> {
    build_cycle_with_clients(config, http_clients(config)?)
}
