//! Workflow engine for long-form generation.
//!
//! A workflow graph is ordered once, then each node is dispatched to the
//! handler for its kind, all of them reading and writing one shared
//! [`ExecutionContext`]. The [`Orchestrator`] drives a run from ordering to a
//! stored version snapshot and reports progress as [`ProgressEvent`]s.
//!
//! [`ProgressEvent`]: inkflow_core::types::ProgressEvent

pub mod backfill;
pub mod checkpoint;
pub mod compensation;
pub mod context;
pub mod graph;
pub mod handlers;
pub mod orchestrator;
pub mod prompts;
pub mod run_log;
pub mod store;

pub use checkpoint::{CheckpointStore, RunCheckpoint};
pub use context::ExecutionContext;
pub use graph::{order, Edge, Graph, Node, NodeKind};
pub use handlers::{HandlerEnv, HandlerRegistry, NodeHandler, NodeOutcome};
pub use orchestrator::{
    compose_document, NodeState, Orchestrator, RunFailure, RunReport, RunRequest, RunState,
};
pub use prompts::PromptLibrary;
pub use run_log::RunLogger;
pub use store::SqliteProjectStore;
