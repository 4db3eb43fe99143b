//! Application Layer - Cycle orchestration
//!
//! - `batch_coordinator`: groups per-token requests into cost-aware provider calls
//! - `correlator`: merges per-provider records into one token per address
//! - `pipeline`: the quick -> medium -> full scoring funnel
//! - `cycle`: one deadline-bounded discovery cycle and the polling loop

pub mod batch_coordinator;
pub mod correlator;
pub mod pipeline;
pub mod cycle;

pub use batch_coordinator::{BatchCoordinator, BatchingConfig, CoordinatorStats, Resolution, Unavailable};
pub use correlator::{Correlator, ReconcileRules};
pub use pipeline::{QuickFilters, ScoringConfig, ScoringPipeline, SourceSpec, StageConfig, StageReport};
pub use cycle::{CycleConfig, CycleReport, DiscoveryCycle};
