//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement.
//! Following hexagonal architecture, these traits abstract:
//! - Provider network clients (token listings, per-token and batch lookups)
//! - The alerting collaborator (ranked scored tokens)
//! - The observability collaborator (cycle summaries)

pub mod provider;
pub mod sinks;
pub mod mocks;

pub use provider::{ListParams, ProviderClient, ProviderError, ProviderErrorKind};
pub use sinks::{AbortReason, AlertSink, CycleOutcome, CycleSummary, ScoredToken, SummarySink};
