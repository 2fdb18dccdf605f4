use futures::future::BoxFuture;
use tracing::info;

use inkflow_core::error::{InkflowError, Result};
use inkflow_core::types::{GenerationRequest, OutputSchema};

use super::{HandlerEnv, NodeHandler, NodeOutcome};
use crate::compensation::{compensate, extract_json};
use crate::context::ExecutionContext;
use crate::graph::{AgentRole, LlmConfig, Node, NodeKind};
use crate::prompts::render;

/// Plain prompt node. Output goes under `output_key`, or `llm:<node_id>`.
pub struct LlmHandler;

impl NodeHandler for LlmHandler {
    fn kind(&self) -> &'static str {
        "llm"
    }

    fn validate(&self, node: &Node, _env: &HandlerEnv) -> Result<()> {
        prompt_of(node, llm_config(node)?).map(|_| ())
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        ctx: &'a mut ExecutionContext,
        env: &'a HandlerEnv,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let config = llm_config(node)?;
            let prompt = render(prompt_of(node, config)?, ctx, &[]);
            let key = config
                .output_key
                .clone()
                .unwrap_or_else(|| format!("llm:{}", node.id));

            let mut request = GenerationRequest::new(prompt)
                .with_model(config.model_override.clone())
                .with_search_grounding(config.search_grounding);
            let schema = config
                .schema
                .clone()
                .map(|s| OutputSchema::new(format!("{}_output", node.id), s));
            if let Some(schema) = &schema {
                request = request.with_schema(schema.clone());
            }

            info!(node_id = %node.id, key = %key, structured = schema.is_some(), "Running llm node");
            let generation = env.generator.generate(request).await?;

            let Some(schema) = schema else {
                let chars = generation.text.chars().count();
                ctx.set_str(key.clone(), generation.text.trim());
                return Ok(NodeOutcome::new(format!("{} characters into {}", chars, key)));
            };

            match generation.fields.or_else(|| extract_json(&generation.text)) {
                Some(value) => {
                    let (value, applied) = compensate(AgentRole::Custom, &schema, value, ctx);
                    for fill in &applied {
                        env.warn(&node.id, format!("llm compensation: {}", fill.message));
                    }
                    ctx.set(key.clone(), value);
                    Ok(NodeOutcome::new(format!("structured output into {}", key)))
                }
                None => {
                    env.warn(&node.id, "structured output was not JSON; stored raw text");
                    ctx.set_str(key.clone(), generation.text.trim());
                    Ok(NodeOutcome::new(format!("raw text into {}", key)))
                }
            }
        })
    }
}

fn llm_config(node: &Node) -> Result<&LlmConfig> {
    match &node.kind {
        NodeKind::Llm(config) => Ok(config),
        other => Err(InkflowError::UnsupportedNodeKind {
            node_id: node.id.clone(),
            kind: other.name().to_string(),
        }),
    }
}

fn prompt_of<'a>(node: &Node, config: &'a LlmConfig) -> Result<&'a str> {
    config
        .prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| InkflowError::MissingPromptConfiguration {
            node_id: node.id.clone(),
            role: "LLM".to_string(),
        })
}
