use std::collections::VecDeque;

use tracing::debug;

use inkflow_core::error::{InkflowError, Result};

use super::node::index;
use super::Graph;

/// Linearize the graph with Kahn's algorithm.
///
/// Zero in-degree nodes seed a FIFO queue in node-list order; a successor
/// joins the back of the queue once its last predecessor is placed, so the
/// same graph always yields the same order. A graph with a cycle yields `CyclicGraph` naming every node
/// that could not be placed.
pub fn order(graph: &Graph) -> Result<Vec<String>> {
    graph.validate()?;

    let ids = index(&graph.nodes);
    let n = graph.nodes.len();
    let mut in_degree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];

    for edge in &graph.edges {
        // Endpoints were checked by validate()
        let (Some(&from), Some(&to)) = (ids.get(edge.source.as_str()), ids.get(edge.target.as_str()))
        else {
            continue;
        };
        successors[from].push(to);
        in_degree[to] += 1;
    }

    let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(n);

    while let Some(current) = ready.pop_front() {
        ordered.push(current);
        for &next in &successors[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if ordered.len() < n {
        let unresolved: Vec<String> = (0..n)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| graph.nodes[i].id.clone())
            .collect();
        return Err(InkflowError::CyclicGraph { unresolved });
    }

    let ordered: Vec<String> = ordered.into_iter().map(|i| graph.nodes[i].id.clone()).collect();
    debug!(nodes = ordered.len(), "Computed execution order");
    Ok(ordered)
}
