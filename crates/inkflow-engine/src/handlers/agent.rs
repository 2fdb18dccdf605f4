use futures::future::BoxFuture;
use tracing::{debug, info};

use inkflow_core::error::{InkflowError, Result};
use inkflow_core::types::{Generation, GenerationRequest};

use super::{chapter, HandlerEnv, NodeHandler, NodeOutcome};
use crate::compensation::{compensate, extract_json};
use crate::context::ExecutionContext;
use crate::graph::{AgentConfig, AgentRole, AgentShape, Node, NodeKind};
use crate::prompts::{render, role_schema, with_references};

/// Runs agent nodes: schema-validated roles, free-text roles, and the
/// chapter-writer loop.
pub struct AgentHandler;

impl NodeHandler for AgentHandler {
    fn kind(&self) -> &'static str {
        "agent"
    }

    fn validate(&self, node: &Node, env: &HandlerEnv) -> Result<()> {
        let config = agent_config(node)?;
        env.prompts
            .resolve(&node.id, config.role, config.prompt.as_ref())?;
        if config.role == AgentRole::ChapterWriter {
            env.prompts
                .resolve(&node.id, AgentRole::Summarizer, config.summary_prompt.as_ref())?;
        }
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        ctx: &'a mut ExecutionContext,
        env: &'a HandlerEnv,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let config = agent_config(node)?;
            info!(node_id = %node.id, role = %config.role, "Running agent node");
            match config.role.shape() {
                AgentShape::Structured => run_structured(node, config, ctx, env).await,
                AgentShape::FreeText => run_free_text(node, config, ctx, env).await,
                AgentShape::ChapterLoop => chapter::write_chapters(node, config, ctx, env).await,
            }
        })
    }
}

fn agent_config(node: &Node) -> Result<&AgentConfig> {
    match &node.kind {
        NodeKind::Agent(config) => Ok(config),
        other => Err(InkflowError::UnsupportedNodeKind {
            node_id: node.id.clone(),
            kind: other.name().to_string(),
        }),
    }
}

/// Render the node's prompt against the context and append its reference cards.
async fn build_prompt(
    node: &Node,
    config: &AgentConfig,
    ctx: &ExecutionContext,
    env: &HandlerEnv,
) -> Result<String> {
    let template = env
        .prompts
        .resolve(&node.id, config.role, config.prompt.as_ref())?;
    let references = env.resolve_cards(&config.reference_cards).await?;
    Ok(with_references(render(&template, ctx, &[]), &references))
}

fn request(prompt: String, config: &AgentConfig) -> GenerationRequest {
    GenerationRequest::new(prompt)
        .with_model(config.model_override.clone())
        .with_search_grounding(config.search_grounding)
}

fn store_citations(node: &Node, generation: &Generation, ctx: &mut ExecutionContext) {
    if generation.citations.is_empty() {
        return;
    }
    if let Ok(value) = serde_json::to_value(&generation.citations) {
        ctx.set(format!("citations:{}", node.id), value);
    }
}

async fn run_structured(
    node: &Node,
    config: &AgentConfig,
    ctx: &mut ExecutionContext,
    env: &HandlerEnv,
) -> Result<NodeOutcome> {
    let role = config.role;
    let schema = role_schema(role).ok_or_else(|| {
        InkflowError::Config(format!("role {} has no output schema", role))
    })?;
    let prompt = build_prompt(node, config, ctx, env).await?;
    let generation = env
        .generator
        .generate(request(prompt, config).with_schema(schema.clone()))
        .await?;

    let value = generation
        .fields
        .clone()
        .or_else(|| extract_json(&generation.text))
        .ok_or_else(|| {
            InkflowError::GenerationParse(format!(
                "node {}: {} output is not a JSON object",
                node.id, role
            ))
        })?;

    let (value, applied) = compensate(role, &schema, value, ctx);
    for fill in &applied {
        env.warn(&node.id, format!("{} compensation: {}", role, fill.message));
    }

    let summary = match role {
        AgentRole::OutlineGenerator => {
            let chapters = value["chapters"].as_array().map_or(0, Vec::len);
            format!("Outline \"{}\" with {} chapters", value["title"].as_str().unwrap_or_default(), chapters)
        }
        _ => format!("{} output ready", role),
    };

    let key = role.output_key(&node.id);
    debug!(node_id = %node.id, key = %key, compensations = applied.len(), "Storing structured output");
    ctx.set(key, value);
    store_citations(node, &generation, ctx);
    Ok(NodeOutcome::new(summary))
}

async fn run_free_text(
    node: &Node,
    config: &AgentConfig,
    ctx: &mut ExecutionContext,
    env: &HandlerEnv,
) -> Result<NodeOutcome> {
    let prompt = build_prompt(node, config, ctx, env).await?;
    let generation = env.generator.generate(request(prompt, config)).await?;
    let text = generation.text.trim().to_string();
    let chars = text.chars().count();

    ctx.set_str(config.role.output_key(&node.id), text);
    store_citations(node, &generation, ctx);
    Ok(NodeOutcome::new(format!("{} wrote {} characters", config.role, chars)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PromptRef;
    use crate::testing::{test_env, test_env_with};
    use inkflow_test_utils::{outline_value, InMemoryCards, MockGenerator, MockReply, RecordingSink};
    use serde_json::json;
    use std::sync::Arc;

    fn agent(id: &str, config: AgentConfig) -> Node {
        Node::new(id, id, NodeKind::Agent(config))
    }

    #[tokio::test]
    async fn test_outline_generator_writes_outline() {
        let generator = MockGenerator::new()
            .with_rule("outline", MockReply::Structured(outline_value(2)));
        let env = test_env(generator.clone());
        let mut ctx = ExecutionContext::new();
        ctx.set_str("projectName", "Test");

        let node = Node::agent("o", AgentRole::OutlineGenerator);
        let outcome = env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();

        assert_eq!(ctx.outline().unwrap().chapters.len(), 2);
        assert!(outcome.summary.contains("2 chapters"));
        let requests = generator.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].schema.is_some());
        assert!(requests[0].prompt.contains("\"Test\""));
    }

    #[tokio::test]
    async fn test_compensation_emits_warnings() {
        let generator = MockGenerator::new()
            .with_rule("outline", MockReply::Text("```json\n{\"synopsis\": \"x\"}\n```".into()));
        let sink = Arc::new(RecordingSink::new());
        let env = test_env_with(generator, sink.clone(), Arc::new(InMemoryCards::new()));
        let mut ctx = ExecutionContext::new();
        ctx.set_str("projectName", "Fallback");
        ctx.set("targetChapters", json!(2));

        let node = Node::agent("o", AgentRole::OutlineGenerator);
        env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();

        let outline = ctx.outline().unwrap();
        assert_eq!(outline.title, "Fallback");
        assert_eq!(outline.chapters.len(), 2);
        assert_eq!(sink.count("warning"), 2);
    }

    #[tokio::test]
    async fn test_structured_prose_is_generation_failure() {
        let generator = MockGenerator::new().with_rule("world", MockReply::Text("Just prose.".into()));
        let env = test_env(generator);
        let mut ctx = ExecutionContext::new();
        let node = Node::agent("w", AgentRole::WorldBuilder);
        let err = env.registry.dispatch(&node, &mut ctx, &env).await.unwrap_err();
        assert_eq!(inkflow_core::types::FailureKind::from(&err), inkflow_core::types::FailureKind::Generation);
        assert!(!ctx.contains("worldData"));
    }

    #[tokio::test]
    async fn test_free_text_roles_store_raw_text() {
        let generator = MockGenerator::new().with_rule("Review the novel", MockReply::Text("  Too slow.  ".into()));
        let env = test_env(generator);
        let mut ctx = ExecutionContext::new();
        let node = Node::agent("r", AgentRole::Reviewer);
        env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();
        assert_eq!(ctx.get_str("reviewerResult"), Some("Too slow."));
    }

    #[tokio::test]
    async fn test_reference_cards_and_inline_prompt() {
        let generator = MockGenerator::new();
        let cards = InMemoryCards::new().with_card("style", "Write like rain.");
        let env = test_env_with(generator.clone(), Arc::new(RecordingSink::new()), Arc::new(cards));
        let mut config = AgentConfig::new(AgentRole::Custom);
        config.prompt = Some(PromptRef::Inline("Describe {{projectName}}.".into()));
        config.reference_cards = vec!["style".into()];
        config.model_override = Some("gpt-4o".into());

        let mut ctx = ExecutionContext::new();
        ctx.set_str("projectName", "Dusk");
        env.registry.dispatch(&agent("c9", config), &mut ctx, &env).await.unwrap();

        let request = &generator.requests()[0];
        assert!(request.prompt.starts_with("Describe Dusk."));
        assert!(request.prompt.contains("Write like rain."));
        assert_eq!(request.model_override.as_deref(), Some("gpt-4o"));
        assert!(ctx.contains("custom:c9"));
    }

    #[tokio::test]
    async fn test_unknown_card_fails() {
        let env = test_env(MockGenerator::new());
        let mut config = AgentConfig::new(AgentRole::Editor);
        config.reference_cards = vec!["ghost".into()];
        let mut ctx = ExecutionContext::new();
        let err = env
            .registry
            .dispatch(&agent("e", config), &mut ctx, &env)
            .await
            .unwrap_err();
        assert!(matches!(err, InkflowError::CardNotFound(ref id) if id == "ghost"));
    }

    #[test]
    fn test_validate_custom_without_prompt() {
        let env = test_env(MockGenerator::new());
        let node = agent("c", AgentConfig::new(AgentRole::Custom));
        assert!(matches!(
            AgentHandler.validate(&node, &env),
            Err(InkflowError::MissingPromptConfiguration { .. })
        ));
        assert!(AgentHandler.validate(&Node::agent("e", AgentRole::Editor), &env).is_ok());
    }
}
