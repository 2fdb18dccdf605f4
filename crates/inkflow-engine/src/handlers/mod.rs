//! Node handlers.
//!
//! Every node kind has one handler. The registry dispatches by kind name, and
//! the chapter writer re-enters the registry to run its per-chapter summary
//! through the same agent machinery as any other node.

pub mod agent;
pub mod chapter;
pub mod data;
pub mod llm;
pub mod tool;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use inkflow_core::config::EngineConfig;
use inkflow_core::error::{InkflowError, Result};
use inkflow_core::traits::{CardLookup, Generator, ProgressSink};
use inkflow_core::types::ProgressEvent;

use crate::context::ExecutionContext;
use crate::graph::{Graph, Node};
use crate::prompts::PromptLibrary;

pub use agent::AgentHandler;
pub use data::DataHandler;
pub use llm::LlmHandler;
pub use tool::ToolHandler;

/// What a node reports back once its output is in the context.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    /// One-line description for the progress stream.
    pub summary: String,
}

impl NodeOutcome {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
        }
    }
}

/// Executes one kind of node.
///
/// Handlers write their results straight into the context. A handler that
/// fails part-way leaves whatever it already wrote in place.
pub trait NodeHandler: Send + Sync + 'static {
    /// Node kind this handler serves.
    fn kind(&self) -> &'static str;

    /// Static configuration checks run before any node of the graph executes.
    fn validate(&self, node: &Node, env: &HandlerEnv) -> Result<()> {
        let _ = (node, env);
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        ctx: &'a mut ExecutionContext,
        env: &'a HandlerEnv,
    ) -> BoxFuture<'a, Result<NodeOutcome>>;
}

/// Collaborators and settings shared by every handler in a run.
#[derive(Clone)]
pub struct HandlerEnv {
    pub generator: Arc<dyn Generator>,
    pub cards: Arc<dyn CardLookup>,
    pub sink: Arc<dyn ProgressSink>,
    pub config: Arc<EngineConfig>,
    pub prompts: Arc<PromptLibrary>,
    pub registry: Arc<HandlerRegistry>,
}

impl HandlerEnv {
    /// Environment with the built-in handler registry.
    pub fn new(
        generator: Arc<dyn Generator>,
        cards: Arc<dyn CardLookup>,
        sink: Arc<dyn ProgressSink>,
        config: EngineConfig,
        prompts: PromptLibrary,
    ) -> Self {
        Self {
            generator,
            cards,
            sink,
            config: Arc::new(config),
            prompts: Arc::new(prompts),
            registry: Arc::new(HandlerRegistry::with_builtins()),
        }
    }

    /// Log a non-fatal condition and surface it on the progress stream.
    pub fn warn(&self, node_id: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(node_id, message = %message, "Node warning");
        self.sink.emit(ProgressEvent::Warning {
            node_id: node_id.to_string(),
            message,
        });
    }

    /// Resolve content cards to their text, failing on the first unknown id.
    pub async fn resolve_cards(&self, card_ids: &[String]) -> Result<Vec<String>> {
        let mut texts = Vec::with_capacity(card_ids.len());
        for id in card_ids {
            let text = self
                .cards
                .resolve(id)
                .await?
                .ok_or_else(|| InkflowError::CardNotFound(id.clone()))?;
            texts.push(text);
        }
        Ok(texts)
    }
}

/// Registry of node handlers keyed by node kind.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous handler for its kind.
    pub fn register(&mut self, handler: impl NodeHandler) {
        self.handlers.insert(handler.kind().to_string(), Arc::new(handler));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Registry with the agent, llm, tool, and data handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(AgentHandler);
        registry.register(LlmHandler);
        registry.register(ToolHandler);
        registry.register(DataHandler);
        registry
    }

    /// Check every node has a handler and a usable configuration.
    pub fn preflight(&self, graph: &Graph, env: &HandlerEnv) -> Result<()> {
        for node in &graph.nodes {
            let handler = self
                .handlers
                .get(node.kind.name())
                .ok_or_else(|| unsupported(node))?;
            handler.validate(node, env)?;
        }
        Ok(())
    }

    /// Execute `node` with the handler for its kind.
    pub fn dispatch<'a>(
        &'a self,
        node: &'a Node,
        ctx: &'a mut ExecutionContext,
        env: &'a HandlerEnv,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        match self.handlers.get(node.kind.name()) {
            Some(handler) => handler.execute(node, ctx, env),
            None => Box::pin(async move { Err(unsupported(node)) }),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn unsupported(node: &Node) -> InkflowError {
    InkflowError::UnsupportedNodeKind {
        node_id: node.id.clone(),
        kind: node.kind.name().to_string(),
    }
}
