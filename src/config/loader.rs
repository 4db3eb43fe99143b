//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching the config/scout.toml structure.
//! Every section is optional; missing keys take the documented defaults.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::adapters::cache::{DataClass, TtlTable};
use crate::adapters::provider::{AdapterSettings, HttpEndpoints};
use crate::adapters::rate_limiter::RateLimitQuota;
use crate::application::batch_coordinator::BatchingConfig;
use crate::application::correlator::{ReconcileRules, DEFAULT_TOLERANCE};
use crate::application::cycle::CycleConfig;
use crate::application::pipeline::ScoringConfig;
use crate::domain::budget::{DEFAULT_ALERT_LEVELS, DEFAULT_DAILY_BUDGET, DEFAULT_RESERVE_PCT};
use crate::domain::{BudgetConfig, FieldSet, Label, Provider};

/// Main configuration structure matching config/scout.toml
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub correlation: CorrelationSection,
    /// `[providers.<name>]` tables
    #[serde(default)]
    pub providers: BTreeMap<Provider, ProviderSection>,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Daily compute budget section
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSection {
    /// Compute units per UTC day
    #[serde(default = "default_daily_budget")]
    pub daily_budget: u64,
    /// Percent-of-budget levels that raise an alert once per day
    #[serde(default = "default_alert_levels")]
    pub alert_levels: Vec<u8>,
    /// High-priority allowance past the budget, in percent
    #[serde(default = "default_reserve_pct")]
    pub reserve_pct: f64,
}

fn default_daily_budget() -> u64 {
    DEFAULT_DAILY_BUDGET
}

fn default_alert_levels() -> Vec<u8> {
    DEFAULT_ALERT_LEVELS.to_vec()
}

fn default_reserve_pct() -> f64 {
    DEFAULT_RESERVE_PCT
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            daily_budget: default_daily_budget(),
            alert_levels: default_alert_levels(),
            reserve_pct: default_reserve_pct(),
        }
    }
}

impl BudgetSection {
    pub fn to_budget_config(&self) -> BudgetConfig {
        BudgetConfig {
            daily_budget: self.daily_budget,
            alert_levels: self.alert_levels.clone(),
            reserve_pct: self.reserve_pct,
        }
    }
}

/// Shared cache section
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// TTL overrides in seconds, keyed by data class
    #[serde(default)]
    pub ttl_secs: BTreeMap<DataClass, u64>,
}

fn default_max_entries() -> usize {
    10_000
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: BTreeMap::new(),
        }
    }
}

impl CacheSection {
    pub fn ttl_table(&self) -> TtlTable {
        self.ttl_secs
            .iter()
            .fold(TtlTable::default(), |table, (class, secs)| {
                table.with_ttl(*class, Duration::from_secs(*secs))
            })
    }
}

/// Cross-provider reconciliation section
#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationSection {
    /// Relative spread above which the median replaces the latest value
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Label -> provider whose value always wins
    #[serde(default = "default_authoritative")]
    pub authoritative: BTreeMap<Label, Provider>,
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_authoritative() -> BTreeMap<Label, Provider> {
    ReconcileRules::default().authoritative
}

impl Default for CorrelationSection {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            authoritative: default_authoritative(),
        }
    }
}

impl CorrelationSection {
    pub fn rules(&self) -> ReconcileRules {
        ReconcileRules {
            tolerance: self.tolerance,
            authoritative: self.authoritative.clone(),
        }
    }
}

/// One `[providers.<name>]` table
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Token bucket: calls allowed per `period_secs`
    #[serde(default = "default_calls_per_period")]
    pub calls_per_period: u32,
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Compute units billed per individual call
    #[serde(default = "default_base_cost")]
    pub base_cost: u64,
    /// Largest batch the provider accepts (1 = no batching)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Bucket cooldown after an HTTP 429
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Overrides the provider's public API base URL
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub list_path: Option<String>,
    #[serde(default)]
    pub one_path: Option<String>,
    #[serde(default)]
    pub batch_path: Option<String>,
    #[serde(default)]
    pub field_paths: BTreeMap<FieldSet, String>,
    /// Falls back to the `<PROVIDER>_API_KEY` environment variable
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_header: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_calls_per_period() -> u32 {
    60
}

fn default_period_secs() -> u64 {
    60
}

fn default_base_cost() -> u64 {
    1
}

fn default_max_batch_size() -> usize {
    1
}

fn default_max_in_flight() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_rate_limit_cooldown_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_network() -> String {
    "solana".to_string()
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            enabled: true,
            calls_per_period: default_calls_per_period(),
            period_secs: default_period_secs(),
            base_cost: default_base_cost(),
            max_batch_size: default_max_batch_size(),
            max_in_flight: default_max_in_flight(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
            timeout_secs: default_timeout_secs(),
            base_url: None,
            network: default_network(),
            list_path: None,
            one_path: None,
            batch_path: None,
            field_paths: BTreeMap::new(),
            api_key: None,
            api_key_header: None,
            headers: BTreeMap::new(),
        }
    }
}

/// Public API layout used when a provider table leaves a path out
struct BuiltinEndpoints {
    base_url: &'static str,
    list_path: Option<&'static str>,
    one_path: &'static str,
    batch_path: Option<&'static str>,
    api_key_header: &'static str,
}

fn builtin_endpoints(provider: Provider) -> BuiltinEndpoints {
    match provider {
        Provider::DexScreener => BuiltinEndpoints {
            base_url: "https://api.dexscreener.com",
            list_path: Some("/latest/dex/search?q={network}"),
            one_path: "/tokens/v1/{network}/{address}",
            batch_path: Some("/tokens/v1/{network}/{addresses}"),
            api_key_header: "X-API-KEY",
        },
        Provider::GeckoTerminal => BuiltinEndpoints {
            base_url: "https://api.geckoterminal.com/api/v2",
            list_path: Some("/networks/{network}/new_pools?page=1"),
            one_path: "/networks/{network}/tokens/{address}/pools?page=1",
            batch_path: Some("/networks/{network}/tokens/multi/{addresses}"),
            api_key_header: "X-API-KEY",
        },
        Provider::Birdeye => BuiltinEndpoints {
            base_url: "https://public-api.birdeye.so",
            list_path: Some("/defi/tokenlist?sort_by=v24hUSD&sort_type=desc&offset=0&limit={limit}"),
            one_path: "/defi/token_overview?address={address}",
            batch_path: Some("/defi/multi_price?list_address={addresses}"),
            api_key_header: "X-API-KEY",
        },
        Provider::RugCheck => BuiltinEndpoints {
            base_url: "https://api.rugcheck.xyz/v1",
            list_path: None,
            one_path: "/tokens/{address}/report",
            batch_path: None,
            api_key_header: "Authorization",
        },
    }
}

/// Configured path, builtin when absent, disabled when set to ""
fn resolve_path(configured: &Option<String>, builtin: Option<&str>) -> Option<String> {
    match configured {
        Some(path) if path.trim().is_empty() => None,
        Some(path) => Some(path.clone()),
        None => builtin.map(str::to_string),
    }
}

impl ProviderSection {
    pub fn quota(&self) -> RateLimitQuota {
        RateLimitQuota::new(self.calls_per_period, Duration::from_secs(self.period_secs))
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            base_cost: self.base_cost,
            max_batch_size: self.max_batch_size,
            max_in_flight: self.max_in_flight,
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            rate_limit_cooldown: Duration::from_secs(self.rate_limit_cooldown_secs),
        }
    }

    /// Get API key with environment variable fallback
    /// Checks `<PROVIDER>_API_KEY` if the config value is empty/None
    pub fn get_api_key(&self, provider: Provider) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var(provider.api_key_env()).ok().filter(|k| !k.is_empty())
    }

    /// HTTP layout for `provider`, builtin paths filling the gaps
    pub fn endpoints(&self, provider: Provider) -> HttpEndpoints {
        let builtin = builtin_endpoints(provider);
        HttpEndpoints {
            base_url: self.base_url.clone().unwrap_or_else(|| builtin.base_url.to_string()),
            network: self.network.clone(),
            list_path: resolve_path(&self.list_path, builtin.list_path),
            one_path: self.one_path.clone().unwrap_or_else(|| builtin.one_path.to_string()),
            field_paths: self.field_paths.clone(),
            batch_path: resolve_path(&self.batch_path, builtin.batch_path),
            api_key: self.get_api_key(provider),
            api_key_header: self
                .api_key_header
                .clone()
                .unwrap_or_else(|| builtin.api_key_header.to_string()),
            headers: self.headers.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also log fully scored tokens below the alert threshold
    #[serde(default)]
    pub include_low_conviction: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            include_low_conviction: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Config::from_toml_str(&content)
}

impl Config {
    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Enabled provider tables
    pub fn enabled_providers(&self) -> impl Iterator<Item = (Provider, &ProviderSection)> + '_ {
        self.providers
            .iter()
            .filter(|(_, section)| section.enabled)
            .map(|(provider, section)| (*provider, section))
    }

    fn is_enabled(&self, provider: Provider) -> bool {
        self.providers.get(&provider).is_some_and(|s| s.enabled)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Cycle
        if self.cycle.deadline_secs == 0 {
            return Err(ConfigError::ValidationError("deadline_secs must be > 0".to_string()));
        }
        if self.cycle.discovery_limit == 0 {
            return Err(ConfigError::ValidationError("discovery_limit must be > 0".to_string()));
        }
        if self.cycle.discovery_providers.is_empty() {
            return Err(ConfigError::ValidationError(
                "discovery_providers cannot be empty".to_string(),
            ));
        }
        for provider in &self.cycle.discovery_providers {
            if !self.is_enabled(*provider) {
                return Err(ConfigError::ValidationError(format!(
                    "discovery provider {} has no enabled [providers.{}] table",
                    provider, provider
                )));
            }
            let list_path = self.providers.get(provider).and_then(|s| s.endpoints(*provider).list_path);
            if list_path.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "discovery provider {} has no listing endpoint",
                    provider
                )));
            }
        }
        if let Some(provider) = self.cycle.gap_fill_provider {
            if !self.is_enabled(provider) {
                return Err(ConfigError::ValidationError(format!(
                    "gap_fill_provider {} is not an enabled provider",
                    provider
                )));
            }
        }

        // Budget
        if self.budget.daily_budget == 0 {
            return Err(ConfigError::ValidationError("daily_budget must be > 0".to_string()));
        }
        if let Some(level) = self.budget.alert_levels.iter().find(|l| **l == 0) {
            return Err(ConfigError::ValidationError(format!(
                "alert_levels must be > 0, got {}",
                level
            )));
        }
        if !(0.0..=100.0).contains(&self.budget.reserve_pct) {
            return Err(ConfigError::ValidationError(format!(
                "reserve_pct must be 0-100, got {}",
                self.budget.reserve_pct
            )));
        }

        // Cache
        if self.cache.max_entries == 0 {
            return Err(ConfigError::ValidationError("cache max_entries must be > 0".to_string()));
        }
        if let Some((class, _)) = self.cache.ttl_secs.iter().find(|(_, secs)| **secs == 0) {
            return Err(ConfigError::ValidationError(format!("ttl for {} must be > 0", class)));
        }

        // Batching
        if self.batching.flush_size == 0 || self.batching.always_batch_at == 0 {
            return Err(ConfigError::ValidationError(
                "flush_size and always_batch_at must be > 0".to_string(),
            ));
        }

        // Correlation
        if !self.correlation.tolerance.is_finite() || self.correlation.tolerance < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "tolerance must be >= 0, got {}",
                self.correlation.tolerance
            )));
        }

        // Providers
        for (provider, section) in self.enabled_providers() {
            if section.calls_per_period == 0 || section.period_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{}: calls_per_period and period_secs must be > 0",
                    provider
                )));
            }
            if section.base_cost == 0 {
                return Err(ConfigError::ValidationError(format!("{}: base_cost must be > 0", provider)));
            }
            if section.max_batch_size == 0 || section.max_in_flight == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{}: max_batch_size and max_in_flight must be > 0",
                    provider
                )));
            }
            if section.max_batch_size > 1 && section.endpoints(provider).batch_path.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "{}: max_batch_size {} needs a batch_path",
                    provider, section.max_batch_size
                )));
            }
        }
        for source in self.scoring.medium_sources.iter().chain(&self.scoring.full_sources) {
            if !self.is_enabled(source.provider) {
                tracing::warn!(
                    "Scoring source {} ({}) is not an enabled provider; that data will be unavailable",
                    source.provider,
                    source.field_set
                );
            }
        }

        // Scoring
        self.scoring.validate()?;

        // Logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging level must be trace/debug/info/warn/error, got {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}
