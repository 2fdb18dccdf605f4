//! Run orchestrator.
//!
//! A run moves `Idle -> Ordering -> Running -> {Completed | Failed}`. Nodes
//! execute one at a time in topological order and every node moves
//! `Pending -> Active -> {Done | Errored}`, or to `Skipped` when a failed tool
//! sits upstream. The first unrecovered error ends the run; nothing after it
//! executes and nothing already written to the context is rolled back.
//!
//! Cancellation is checked between nodes only. An in-flight generation call
//! always finishes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use inkflow_core::error::{InkflowError, Result};
use inkflow_core::traits::ProjectStore;
use inkflow_core::types::{FailureKind, ProgressEvent, RunId, VersionSnapshot};

use crate::backfill;
use crate::checkpoint::{CheckpointStore, RunCheckpoint};
use crate::context::ExecutionContext;
use crate::graph::{order, Graph, Node};
use crate::handlers::{HandlerEnv, NodeOutcome};
use crate::prompts::project_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Ordering,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Active,
    Done,
    Errored,
    /// Not executed because a tool it depends on failed.
    Skipped,
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    /// Originating node, when the failure came from one.
    pub node_id: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

/// Everything a caller needs to start a run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub project_id: String,
    pub graph: Graph,
    /// Project metadata the run starts from.
    pub seed: ExecutionContext,
    pub cancel: CancellationToken,
}

impl RunRequest {
    pub fn new(project_id: impl Into<String>, graph: Graph) -> Self {
        Self {
            project_id: project_id.into(),
            graph,
            seed: ExecutionContext::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_seed(mut self, seed: ExecutionContext) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub state: RunState,
    /// Execution order; empty when ordering failed.
    pub order: Vec<String>,
    pub node_states: HashMap<String, NodeState>,
    pub context: ExecutionContext,
    pub final_content: Option<String>,
    pub snapshot: Option<VersionSnapshot>,
    pub failure: Option<RunFailure>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn node_state(&self, node_id: &str) -> Option<NodeState> {
        self.node_states.get(node_id).copied()
    }
}

/// Mutable state of one run. The graph is kept apart and only borrowed.
struct Progress {
    run_id: RunId,
    state: RunState,
    ctx: ExecutionContext,
    node_states: HashMap<String, NodeState>,
    /// Finished nodes in completion order; mirrored in `done`.
    completed: Vec<String>,
    done: HashSet<String>,
    /// Failed non-critical tools and everything downstream of them.
    blocked: HashSet<String>,
}

impl Progress {
    fn new(run_id: RunId, ctx: ExecutionContext, completed: Vec<String>) -> Self {
        Self {
            run_id,
            state: RunState::Idle,
            ctx,
            node_states: HashMap::new(),
            done: completed.iter().cloned().collect(),
            completed,
            blocked: HashSet::new(),
        }
    }

    fn transition(&mut self, to: RunState) {
        debug!(run_id = %self.run_id, from = ?self.state, to = ?to, "Run state transition");
        self.state = to;
    }

    fn mark(&mut self, node_id: &str, state: NodeState) {
        self.node_states.insert(node_id.to_string(), state);
    }
}

/// Executes workflow graphs against a handler environment and a project store.
pub struct Orchestrator {
    env: HandlerEnv,
    store: Arc<dyn ProjectStore>,
    checkpoints: Option<Arc<CheckpointStore>>,
}

impl Orchestrator {
    pub fn new(env: HandlerEnv, store: Arc<dyn ProjectStore>) -> Self {
        Self {
            env,
            store,
            checkpoints: None,
        }
    }

    /// Save progress after every completed node so a run can be resumed.
    pub fn with_checkpoints(mut self, checkpoints: Arc<CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn env(&self) -> &HandlerEnv {
        &self.env
    }

    /// Run a graph from its seed context.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let progress = Progress::new(RunId::new(), request.seed.clone(), Vec::new());
        self.execute(&request, progress).await
    }

    /// Continue the project's last interrupted run.
    ///
    /// Nodes recorded in the checkpoint are not executed again and the
    /// checkpointed context replaces the seed. Without a checkpoint this is a
    /// fresh run.
    pub async fn resume(&self, request: RunRequest) -> Result<RunReport> {
        let checkpoint = match &self.checkpoints {
            Some(store) => store.load_latest(&request.project_id)?,
            None => None,
        };
        let Some(cp) = checkpoint else {
            info!(project_id = %request.project_id, "No checkpoint to resume, starting fresh");
            return Ok(self.run(request).await);
        };

        info!(
            project_id = %request.project_id,
            run_id = %cp.run_id,
            completed = cp.completed.len(),
            "Resuming run from checkpoint"
        );
        let progress = Progress::new(RunId::from_str(&cp.run_id), cp.context, cp.completed);
        Ok(self.execute(&request, progress).await)
    }

    async fn execute(&self, request: &RunRequest, mut progress: Progress) -> RunReport {
        let started = Instant::now();
        let graph = &request.graph;

        progress.transition(RunState::Ordering);
        let order = match order(graph).and_then(|order| {
            self.env.registry.preflight(graph, &self.env)?;
            Ok(order)
        }) {
            Ok(order) => order,
            Err(e) => {
                let failure = self.fail(&mut progress, failing_node(&e), &e);
                return self.report(progress, Vec::new(), None, Some(failure), started);
            }
        };

        progress.transition(RunState::Running);
        for id in &order {
            let state = if progress.done.contains(id) {
                NodeState::Done
            } else {
                NodeState::Pending
            };
            progress.mark(id, state);
        }
        info!(
            run_id = %progress.run_id,
            project_id = %request.project_id,
            nodes = order.len(),
            resumed = progress.done.len(),
            "Run started"
        );

        for id in &order {
            if progress.done.contains(id) {
                continue;
            }
            let Some(node) = graph.node(id) else {
                let e = InkflowError::InvalidGraph(format!("ordered node '{}' missing from graph", id));
                let failure = self.fail(&mut progress, Some(id.clone()), &e);
                return self.report(progress, order.clone(), None, Some(failure), started);
            };

            if let Some(upstream) = graph.predecessors(id).find(|p| progress.blocked.contains(*p)) {
                let reason = format!("upstream node {} failed", upstream);
                info!(node_id = %id, reason = %reason, "Skipping node");
                progress.blocked.insert(id.clone());
                progress.mark(id, NodeState::Skipped);
                self.env.sink.emit(ProgressEvent::StepSkipped {
                    node_id: id.clone(),
                    reason,
                });
                continue;
            }

            let mut queue: Vec<&Node> = backfill::plan(node, graph, &progress.ctx, &progress.done)
                .into_iter()
                .filter(|gate| !progress.blocked.contains(&gate.id))
                .collect();
            queue.push(node);

            for next in queue {
                if request.cancel.is_cancelled() {
                    let failure = self.fail(&mut progress, None, &InkflowError::Cancelled);
                    return self.report(progress, order.clone(), None, Some(failure), started);
                }
                if next.id != node.id {
                    info!(node_id = %next.id, editor = %node.id, "Backfilling prerequisite");
                }

                match self.step(next, &mut progress).await {
                    Ok(_) => {
                        progress.completed.push(next.id.clone());
                        progress.done.insert(next.id.clone());
                        self.save_checkpoint(&request.project_id, &progress);
                    }
                    Err(e) if !next.is_critical() => {
                        warn!(node_id = %next.id, error = %e, "Non-critical tool failed, continuing");
                        progress.blocked.insert(next.id.clone());
                    }
                    Err(e) => {
                        let failure = self.fail(&mut progress, Some(next.id.clone()), &e);
                        return self.report(progress, order.clone(), None, Some(failure), started);
                    }
                }
            }
        }

        let content = compose_document(&progress.ctx);
        let snapshot = VersionSnapshot::new(content.clone());
        if let Err(e) = self.store.append_version(&request.project_id, &snapshot).await {
            let failure = self.fail(&mut progress, None, &e);
            return self.report(progress, order.clone(), None, Some(failure), started);
        }
        if let Some(checkpoints) = &self.checkpoints {
            if let Err(e) = checkpoints.delete(&request.project_id) {
                warn!(error = %e, "Failed to delete checkpoint");
            }
        }

        progress.transition(RunState::Completed);
        info!(
            run_id = %progress.run_id,
            version = %snapshot.id,
            chars = content.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run completed"
        );
        self.env.sink.emit(ProgressEvent::RunCompleted {
            final_content: content.clone(),
        });
        let mut report = self.report(progress, order, Some(content), None, started);
        report.snapshot = Some(snapshot);
        report
    }

    /// Execute one node, bracketed by its step events.
    async fn step(&self, node: &Node, progress: &mut Progress) -> Result<NodeOutcome> {
        progress.mark(&node.id, NodeState::Active);
        self.env.sink.emit(ProgressEvent::StepStarted {
            node_id: node.id.clone(),
        });
        let started = Instant::now();

        match self
            .env
            .registry
            .dispatch(node, &mut progress.ctx, &self.env)
            .await
        {
            Ok(outcome) => {
                debug!(
                    node_id = %node.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Node execution complete"
                );
                progress.mark(&node.id, NodeState::Done);
                self.env.sink.emit(ProgressEvent::StepCompleted {
                    node_id: node.id.clone(),
                    summary: outcome.summary.clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                error!(node_id = %node.id, error = %e, "Node failed");
                progress.mark(&node.id, NodeState::Errored);
                self.env.sink.emit(ProgressEvent::StepFailed {
                    node_id: node.id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn save_checkpoint(&self, project_id: &str, progress: &Progress) {
        let Some(checkpoints) = &self.checkpoints else {
            return;
        };
        let cp = RunCheckpoint {
            project_id: project_id.to_string(),
            run_id: progress.run_id.to_string(),
            completed: progress.completed.clone(),
            context: progress.ctx.clone(),
            timestamp: Utc::now(),
        };
        if let Err(e) = checkpoints.save(&cp) {
            warn!(error = %e, "Failed to save checkpoint");
        }
    }

    fn fail(&self, progress: &mut Progress, node_id: Option<String>, err: &InkflowError) -> RunFailure {
        progress.transition(RunState::Failed);
        let failure = RunFailure {
            node_id,
            kind: FailureKind::from(err),
            message: err.to_string(),
        };
        error!(
            run_id = %progress.run_id,
            node_id = ?failure.node_id,
            kind = ?failure.kind,
            error = %failure.message,
            "Run failed"
        );
        self.env.sink.emit(ProgressEvent::RunFailed {
            node_id: failure.node_id.clone(),
            kind: failure.kind,
            error: failure.message.clone(),
        });
        failure
    }

    fn report(
        &self,
        progress: Progress,
        order: Vec<String>,
        final_content: Option<String>,
        failure: Option<RunFailure>,
        started: Instant,
    ) -> RunReport {
        RunReport {
            run_id: progress.run_id,
            state: progress.state,
            order,
            node_states: progress.node_states,
            context: progress.ctx,
            final_content,
            snapshot: None,
            failure,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Node named by a configuration error raised before execution.
fn failing_node(err: &InkflowError) -> Option<String> {
    match err {
        InkflowError::UnsupportedNodeKind { node_id, .. }
        | InkflowError::MissingPromptConfiguration { node_id, .. } => Some(node_id.clone()),
        _ => None,
    }
}

/// Assemble the document a completed run leaves behind.
///
/// Chapters form a manuscript under the outline title. Without chapters the
/// editor's text is used, then a rendering of the outline, then nothing.
pub fn compose_document(ctx: &ExecutionContext) -> String {
    let outline = ctx.outline();
    let title = outline
        .as_ref()
        .map(|o| o.title.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| project_name(ctx));

    let chapters = ctx.chapters();
    if !chapters.is_empty() {
        let mut doc = format!("# {}\n", title);
        for chapter in &chapters {
            doc.push_str(&format!(
                "\n## Chapter {}: {}\n\n{}\n",
                chapter.number, chapter.title, chapter.content
            ));
        }
        return doc;
    }

    if let Some(edited) = ctx.editor_result().filter(|s| !s.trim().is_empty()) {
        return edited.to_string();
    }

    match outline {
        Some(outline) => {
            let mut doc = format!("# {}\n", title);
            if !outline.synopsis.is_empty() {
                doc.push_str(&format!("\n{}\n", outline.synopsis));
            }
            if !outline.chapters.is_empty() {
                doc.push('\n');
                for chapter in &outline.chapters {
                    doc.push_str(&format!("{}. {}: {}\n", chapter.number, chapter.name, chapter.plot));
                }
            }
            doc
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Chapter;
    use crate::graph::{AgentRole, Edge, NodeKind, ToolAction, ToolConfig};
    use crate::testing::test_env_with;
    use inkflow_test_utils::{
        outline_value, InMemoryCards, MemoryProjectStore, MockGenerator, MockReply, RecordingSink,
    };

    fn orchestrator(generator: MockGenerator) -> (Orchestrator, Arc<RecordingSink>, Arc<MemoryProjectStore>) {
        let sink = Arc::new(RecordingSink::new());
        let store = Arc::new(MemoryProjectStore::new());
        let env = test_env_with(generator, sink.clone(), Arc::new(InMemoryCards::new()));
        (Orchestrator::new(env, store.clone()), sink, store)
    }

    fn tool(id: &str, critical: bool) -> Node {
        Node::new(
            id,
            id,
            NodeKind::Tool(ToolConfig {
                critical,
                action: ToolAction::Audio { text: "Narrate.".into() },
            }),
        )
    }

    #[tokio::test]
    async fn test_node_states_after_success() {
        let (orch, _sink, store) = orchestrator(MockGenerator::new());
        let graph = Graph::new(
            vec![Node::raw_text("a", "one"), Node::raw_text("b", "two")],
            vec![Edge::new("a", "b")],
        );

        let report = orch.run(RunRequest::new("p1", graph)).await;

        assert!(report.succeeded());
        assert_eq!(report.order, vec!["a", "b"]);
        assert_eq!(report.node_state("b"), Some(NodeState::Done));
        assert_eq!(store.history_len("p1"), 1);
    }

    #[tokio::test]
    async fn test_non_critical_tool_failure_skips_dependents() {
        let generator = MockGenerator::new().with_rule("Narrate", MockReply::Fail("503".into()));
        let (orch, sink, _store) = orchestrator(generator);
        let graph = Graph::new(
            vec![
                tool("voice", false),
                Node::raw_text("after", "x"),
                Node::raw_text("later", "y"),
                Node::raw_text("free", "z"),
            ],
            vec![Edge::new("voice", "after"), Edge::new("after", "later")],
        );

        let report = orch.run(RunRequest::new("p1", graph)).await;

        assert!(report.succeeded());
        assert_eq!(report.node_state("voice"), Some(NodeState::Errored));
        assert_eq!(report.node_state("after"), Some(NodeState::Skipped));
        assert_eq!(report.node_state("later"), Some(NodeState::Skipped));
        assert_eq!(report.node_state("free"), Some(NodeState::Done));
        assert_eq!(sink.count("step_skipped"), 2);
        assert_eq!(sink.count("run_completed"), 1);
    }

    #[tokio::test]
    async fn test_critical_tool_failure_fails_run() {
        let generator = MockGenerator::new().with_rule("Narrate", MockReply::Fail("503".into()));
        let (orch, sink, store) = orchestrator(generator);
        let graph = Graph::new(
            vec![tool("voice", true), Node::raw_text("after", "x")],
            vec![Edge::new("voice", "after")],
        );

        let report = orch.run(RunRequest::new("p1", graph)).await;

        assert_eq!(report.state, RunState::Failed);
        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.node_id.as_deref(), Some("voice"));
        assert_eq!(report.node_state("after"), Some(NodeState::Pending));
        assert_eq!(sink.names().last().map(String::as_str), Some("run_failed"));
        assert_eq!(store.history_len("p1"), 0);
    }

    #[tokio::test]
    async fn test_preflight_failure_runs_nothing() {
        let (orch, sink, _store) = orchestrator(MockGenerator::new());
        let graph = Graph::new(
            vec![
                Node::raw_text("a", "one"),
                Node::agent("c", AgentRole::Custom),
            ],
            vec![],
        );

        let report = orch.run(RunRequest::new("p1", graph)).await;

        assert_eq!(report.failure.unwrap().node_id.as_deref(), Some("c"));
        assert_eq!(sink.count("step_started"), 0);
        assert!(report.order.is_empty());
    }

    #[test]
    fn test_compose_manuscript() {
        let mut ctx = ExecutionContext::new();
        ctx.set("outlineData", outline_value(2));
        ctx.push_chapter(&Chapter {
            number: 1,
            title: "Part 1".into(),
            content: "It rained.".into(),
        });
        let doc = compose_document(&ctx);
        assert_eq!(doc, "# Test Novel\n\n## Chapter 1: Part 1\n\nIt rained.\n");
    }

    #[test]
    fn test_compose_fallbacks() {
        let mut ctx = ExecutionContext::new();
        assert_eq!(compose_document(&ctx), "");

        ctx.set("outlineData", outline_value(1));
        assert!(compose_document(&ctx).starts_with("# Test Novel\n"));

        ctx.set_str("editorResult", "Edited text.");
        assert_eq!(compose_document(&ctx), "Edited text.");
    }
}
