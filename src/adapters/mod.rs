//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Provider: HTTP clients and the cache/rate limit/budget adapter per data source
//! - Cache: shared TTL cache with single-flight fetches
//! - Rate limiter: per-provider token buckets
//! - Sinks: log-backed alert and summary sinks
//! - CLI: Command-line interface handlers

pub mod cache;
pub mod cli;
pub mod provider;
pub mod rate_limiter;
pub mod sinks;

pub use cache::{CacheKey, CacheStats, DataClass, RecordCache, TtlCache, TtlTable};
pub use cli::CliApp;
pub use provider::{AdapterSettings, HttpEndpoints, HttpProviderClient, ProviderAdapter};
pub use rate_limiter::{RateLimitError, RateLimitQuota, RateLimiter};
pub use sinks::LogSink;
