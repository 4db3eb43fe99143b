//! Configuration Module
//!
//! Loads and validates configuration from TOML files, and wires it into a
//! runnable discovery cycle.

pub mod builder;
pub mod loader;

pub use builder::{build_cycle, build_cycle_with_clients, http_clients, Runtime};
pub use loader::{
    load_config, BudgetSection, CacheSection, Config, ConfigError, CorrelationSection, LoggingSection,
    ProviderSection,
};
