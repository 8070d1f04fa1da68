//! Lumen - flow execution engine for declarative AI apps

pub mod binding;
pub mod capability;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod executor;
pub mod explain;
pub mod ir;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod replay;
pub mod sandbox;
pub mod schema;
pub mod security;
pub mod store;

pub use capability::{DecisionStatus, ToolDecision};
pub use concurrency::{check_flow, check_program, Violation};
pub use config::AppConfig;
pub use error::{Boundary, EngineError, ErrorCategory, FixSuggestion};
pub use executor::{Engine, ExecutionContext, RunResult, TraceStep};
pub use explain::{EventDraft, ExplainEntry, ExplainLog};
pub use ir::{Flow, Program, Statement};
pub use replay::{replay, ReplaySummary};
pub use sandbox::{SubprocessWorker, WorkerProcess};
pub use security::SecurityContext;
