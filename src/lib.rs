//! Token Scout - multi-provider token discovery and scoring library
//!
//! Polls several market data providers for new tokens, merges their views
//! into one record per address and ranks them through a staged scoring
//! funnel, batching provider calls under a daily compute budget.
//!
//! # Modules
//!
//! - `domain`: Core business logic (TokenRecord, MergedToken, CostModel, BudgetMonitor, scoring)
//! - `ports`: Trait abstractions (ProviderClient, AlertSink, SummarySink)
//! - `adapters`: External implementations (HTTP providers, cache, rate limiter, CLI)
//! - `config`: Configuration loading, validation and wiring
//! - `application`: Batch coordinator, correlator, scoring pipeline and discovery cycle

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
