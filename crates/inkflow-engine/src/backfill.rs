//! Dependency backfill.
//!
//! An editor pass reads the reviewer's and the quality evaluator's feedback.
//! Hand-edited or imported workflows sometimes carry those nodes without the
//! edges that would order them first. Before an editor runs, each gate whose
//! result is missing from the context is executed once, in place. The stored
//! graph is never rewritten and only these two roles are recognised.

use std::collections::HashSet;

use tracing::debug;

use crate::context::{keys, ExecutionContext};
use crate::graph::{AgentRole, Graph, Node};

/// Quality gates ahead of the editor and the context key each one fills.
pub const EDITOR_GATES: [(AgentRole, &str); 2] = [
    (AgentRole::Reviewer, keys::REVIEWER),
    (AgentRole::QualityEvaluator, keys::QUALITY_EVALUATION),
];

/// Gate nodes that must run before `node`, in gate order.
///
/// A gate is skipped when its result is already in the context, when the
/// graph has no node for it, or when that node already ran in this run.
pub fn plan<'g>(
    node: &Node,
    graph: &'g Graph,
    ctx: &ExecutionContext,
    completed: &HashSet<String>,
) -> Vec<&'g Node> {
    if node.role() != Some(AgentRole::Editor) {
        return Vec::new();
    }

    let mut gates = Vec::new();
    for (role, key) in EDITOR_GATES {
        let Some(gate) = graph.find_role(role) else {
            continue;
        };
        if ctx.contains(key) {
            if !graph.has_edge(&gate.id, &node.id) {
                debug!(editor = %node.id, gate = %gate.id, "Gate not wired to editor, but its result is present");
            }
            continue;
        }
        if completed.contains(&gate.id) || gate.id == node.id {
            continue;
        }
        debug!(editor = %node.id, gate = %gate.id, role = %role, "Backfilling missing gate result");
        gates.push(gate);
    }
    gates
}
