//! # Venture Sim
//!
//! The regenerate-and-rank core of a multi-stage business competition: teams submit
//! business-plan text, answers and expenses; a text-generation service turns that into
//! profiles, expense classifications, financial estimates and a stage-wide revenue
//! distribution, from which per-team financial statements and rankings are derived.
//!
//! ## Core Concepts
//!
//! - **StageKey**: `(event, team, stage)`, the unit of regenerable state
//! - **Fallback**: every generated shape has a deterministic substitute, so a response
//!   that cannot be understood never fails a run
//! - **Atomic overwrite**: a run writes all of its records in one batch that replaces
//!   prior state for the same keys, or writes nothing
//! - **Serialized runs**: runs of the same kind never interleave
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use venture_sim::*;
//!
//! let config = SimulationConfig::default();
//! let transport = ChatCompletionsTransport::from_env(&config.generation)?;
//! let store = Arc::new(SqliteStore::open("venture.db")?);
//! let pipeline = RegenerationPipeline::new(
//!     transport,
//!     store,
//!     Arc::new(ConcurrencyGuard::new()),
//!     &config,
//! )?;
//!
//! pipeline.analyze_team_stage(input).await?;
//! let outcome = pipeline.regenerate_stage_summary(1, 1, &[101, 102, 103]).await?;
//! for allocation in &outcome.allocations {
//!     println!("#{} team {}: {}", allocation.rank, allocation.key.team_id, allocation.allocated_amount);
//! }
//! ```

pub mod calculator;
pub mod config;
pub mod error;
pub mod fallback;
pub mod guard;
pub mod llm;
pub mod pipeline;
pub mod ranking;
pub mod schema;
pub mod store;

pub use calculator::{health_score, verify_snapshot, FinancialCalculator};
pub use config::SimulationConfig;
pub use error::{
    GenerationError, GenerationErrorKind, ParseError, ParseErrorKind, PersistenceError,
    ResponseError, Result, SimulationError, ValidationError,
};
pub use fallback::FallbackComputer;
pub use guard::{ConcurrencyGuard, ResourceCategory};
#[cfg(feature = "http")]
pub use llm::ChatCompletionsTransport;
pub use llm::{CompletionTransport, GenerationClient, PromptBuilder, PromptKind, TransportError};
pub use pipeline::{
    RegenerationPipeline, StageSummaryOutcome, TeamStageInput, TeamStageOutcome,
};
pub use ranking::{AllocationDraft, RankingEngine, TieBreak};
pub use schema::*;
pub use store::{MemoryStore, RecordKind, SqliteStore, StageStore, WriteBatch};
