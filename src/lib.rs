//! # duplisweep - cross-repository duplicate-detection automation engine
//!
//! Nightly (and on-demand) scans a registry of local git repositories for
//! duplicated code, groups the duplicates with a five-layer similarity
//! pipeline, and turns the surviving groups into ranked consolidation
//! suggestions. Work is driven by a cron-style [`scheduler::Scheduler`],
//! bounded by a priority [`queue::WorkerPool`], and observed through a
//! topic-based [`events::EventBus`].
//!
//! ## Architecture
//!
//! - [`scheduler`] ticks a cron schedule and asks the [`selector`] which
//!   repositories are due.
//! - [`config`] holds the repository registry (`repositories.json`),
//!   validated and persisted atomically.
//! - [`queue`] is the bounded-concurrency job queue workers pull from.
//! - [`git_tracker`] resolves commit/branch/dirty state for cache keys.
//! - [`cache`] stores [`types::ScanResult`]s keyed by repository + commit.
//! - [`pattern_gateway`] shells out to the external AST pattern matcher.
//! - [`block_extractor`] turns raw matches into [`types::CodeBlock`]s.
//! - [`similarity`] groups blocks into [`types::DuplicateGroup`]s.
//! - [`suggestion`] turns groups into [`types::ConsolidationSuggestion`]s.
//! - [`orchestrator`] and [`inter_project`] wire C6-C11 into one pipeline,
//!   per-repository and cross-repository respectively.
//! - [`events`] fans pipeline progress out to subscribers.
//! - [`report_coordinator`] fans a completed scan out to external report
//!   renderers (C14).

pub mod block_extractor;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod git_tracker;
pub mod inter_project;
pub mod orchestrator;
pub mod pattern_gateway;
pub mod queue;
pub mod report_coordinator;
pub mod scheduler;
pub mod selector;
pub mod similarity;
pub mod suggestion;
pub mod types;

/// Re-exports the pieces most call sites (the binaries, integration tests)
/// need without spelling out the full module path for each.
pub mod prelude {
    pub use crate::block_extractor::{BlockExtractor, BlockExtractorConfig};
    pub use crate::cache::{CacheBackendConfig, ScanCache};
    pub use crate::config::{ConfigRegistry, Priority, Repository, RepositoryGroup, SharedRegistry};
    pub use crate::error::{CacheError, ConfigError, GitError, PatternGatewayError, QueueError, RegistryError, SimilarityError};
    pub use crate::events::{Event, EventBus, Subscription, Topic};
    pub use crate::git_tracker::GitTracker;
    pub use crate::inter_project::InterProjectCoordinator;
    pub use crate::orchestrator::{PipelineExecutor, ScanOrchestrator};
    pub use crate::pattern_gateway::{PatternGateway, PatternGatewayConfig};
    pub use crate::queue::{JobExecutor, JobKind, ScanJob, WorkerPool, WorkerPoolConfig};
    pub use crate::report_coordinator::{ReportCoordinator, ReportCoordinatorConfig};
    pub use crate::scheduler::{CronSchedule, Scheduler};
    pub use crate::selector::{select_nightly, Candidate, GroupCandidate};
    pub use crate::similarity::{SimilarityConfig, SimilarityEngine};
    pub use crate::suggestion::{SuggestionConfig, SuggestionGenerator};
    pub use crate::types::*;
    pub use anyhow::Result;
}
