//! Domain Layer - Core types and pure logic for the token scout
//!
//! This module contains pure domain types and logic with no network access.
//! All external interactions happen through the ports layer.
//!
//! - `token`: addresses, providers, per-provider payloads and the normalized schema
//! - `merged`: cross-provider merged tokens and the funnel stage state machine
//! - `request`: batch requests and priorities
//! - `cost_model`: sub-linear batch pricing
//! - `budget`: daily budget tracking, threshold alerts and degraded-mode admission
//! - `scoring`: funnel components, weight validation and score normalization

pub mod token;
pub mod merged;
pub mod request;
pub mod cost_model;
pub mod budget;
pub mod scoring;

pub use token::{
    Address, BirdeyeFields, DexScreenerFields, FieldSet, GeckoTerminalFields, Label, Metric,
    NormalizedFields, Provider, ProviderPayload, RiskItem, RiskSeverity, RugCheckFields, TokenRecord,
};
pub use merged::{InvalidTransition, MergedToken, RejectReason, Stage, TokenFlag};
pub use request::{BatchRequest, CallKind, GroupKey, Priority};
pub use cost_model::CostModel;
pub use budget::{BudgetConfig, BudgetMonitor, BudgetState, BudgetStatus};
pub use scoring::{Component, ComponentSpec, StageScore, WhaleActivity};
