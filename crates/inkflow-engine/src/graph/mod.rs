//! Workflow graph model.
//!
//! A workflow is a set of `Node`s connected by dependency `Edge`s. The graph
//! is read-only input to a run: the engine orders it, dispatches each node to
//! its handler, and never writes back to it. Acyclicity is checked when the
//! order is computed, not when edges are added, so an editor may hold a
//! transient cycle.

pub mod edge;
pub mod node;
pub mod order;

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use inkflow_core::error::{InkflowError, Result};

pub use edge::Edge;
pub use node::{
    AgentConfig, AgentRole, AgentShape, DataConfig, LlmConfig, Node, NodeKind, PromptRef,
    ToolAction, ToolConfig,
};
pub use order::order;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| InkflowError::InvalidGraph(e.to_string()))
    }

    /// Load a graph from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Check node ids are unique and every edge endpoint exists.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(InkflowError::InvalidGraph(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(InkflowError::InvalidGraph(format!(
                        "edge {} references unknown node '{}'",
                        edge.id, endpoint
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Direct upstream node ids of `id`, in edge order.
    pub fn predecessors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.target == id)
            .map(|e| e.source.as_str())
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source == source && e.target == target)
    }

    /// First agent node playing `role`, in insertion order.
    pub fn find_role(&self, role: AgentRole) -> Option<&Node> {
        self.nodes.iter().find(|n| n.role() == Some(role))
    }
}
