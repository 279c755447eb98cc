//! # Surge Crew
//!
//! Hospital surge preparedness pipeline driven by role-specialised
//! language-model agents.
//!
//! This library provides:
//! - Credential and model pools with rotation and health tracking
//! - A resilient invoker (timeouts, backoff, transient/fatal classification)
//! - A sequential task graph runner that contains per-task failures
//! - Artifact sinks and JSON run records for audit and replay
//!
//! ## Architecture
//!
//! ```text
//!   TaskGraphRunner ──► Task ──► Agent ──► ResilientInvoker ──► Backend
//!         │                                  │        │
//!         ▼                                  ▼        ▼
//!   ArtifactSink                     CredentialPool  ModelPool
//! ```
//!
//! ## Task Flow
//! 1. Load the pipeline (YAML or built-in) and run inputs
//! 2. Run tasks in declared order, feeding predecessor outputs forward
//! 3. Skip or annotate tasks whose upstream analyses are unavailable
//! 4. Persist artifacts and the run record
//!
//! ## Modules
//! - `pool`: credential and model pools
//! - `invoker`: retry/rotation around one backend call
//! - `runner`: task graph execution
//! - `pipeline`: YAML definitions and run inputs
//! - `report`: run records

pub mod agents;
pub mod config;
pub mod invoker;
pub mod llm;
pub mod pipeline;
pub mod pool;
pub mod report;
pub mod runner;
pub mod sink;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, ConfigError};
pub use invoker::{Backoff, InvokeError, ResilientInvoker, RetryPolicy};
pub use pipeline::{PipelineConfig, RunInputs};
pub use report::RunRecord;
pub use runner::{RunError, RunOutcome, TaskGraphRunner};
pub use sink::{ArtifactSink, FsSink};
