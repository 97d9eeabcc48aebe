//! # plotscout-runtime
//!
//! LLM-backed analysis for PlotScout.
//!
//! `plotscout-core` ranks areas deterministically. This crate runs the
//! collector, analyst and advisor stages over that ranking, each routed to
//! a capability class served by one or more interchangeable providers.
//!
//! - [`ProviderRouter`]: per-capability adapter lists with retry, timeout,
//!   fallback, a circuit breaker and a fingerprint-keyed response cache
//! - [`Pipeline`]: scores the snapshot, runs the stages in dependency order
//!   and resumes from a prior [`PipelineRun`]
//! - [`RunStore`]: persists the cache and the last run between invocations
//! - [`ReportSynthesizer`]: folds a run into the final report
//!
//! ## Example
//!
//! ```rust,ignore
//! use plotscout_runtime::{Pipeline, ProviderRegistry, ProviderRouter, ResponseCache, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_file("plotscout.yaml")?;
//! let cache = Arc::new(ResponseCache::new(config.cache.max_entries, config.cache.ttl));
//! let router = ProviderRouter::from_config(&config, &ProviderRegistry::with_defaults(), cache)?;
//! let pipeline = Pipeline::builder().router(Arc::new(router)).build()?;
//!
//! let run = pipeline.run(&snapshot, None, &CancellationToken::new()).await;
//! ```

pub mod agents;
pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod ledger;
pub mod pipeline;
pub mod providers;
pub mod resilience;
pub mod router;
pub mod run;
pub mod store;
pub mod synthesizer;

pub use agents::{AgentStage, SchemaValidationError, StageError, StageId};
pub use cache::{CachedResponse, ResponseCache};
pub use config::{ConfigError, RuntimeConfig};
pub use fingerprint::Fingerprint;
pub use ledger::{CallLedger, ProviderCallRecord};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use providers::{
    ChatMessage, LlmProvider, ProviderError, ProviderKind, ProviderRegistry, ScriptedProvider,
    ScriptedReply,
};
pub use resilience::{CallPolicy, CircuitBreakerConfig, LlmUsage};
pub use router::{CallScope, CapabilityRoute, ProviderRouter, RouterError};
pub use run::{PipelineRun, RunStatus, StageArtifact, StageStatus};
pub use store::{RunStore, StoreError};
pub use synthesizer::{RecommendationReport, ReportSynthesizer, Strategy};
