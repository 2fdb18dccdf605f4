use futures::future::BoxFuture;
use tracing::debug;

use inkflow_core::error::{InkflowError, Result};

use super::{HandlerEnv, NodeHandler, NodeOutcome};
use crate::context::ExecutionContext;
use crate::graph::{DataConfig, Node, NodeKind};

/// Exposes a data node's payload to the context. Never calls the generator.
///
/// The payload is stored under `data:<node_id>` and appended to the shared
/// source material that role prompts read.
pub struct DataHandler;

impl NodeHandler for DataHandler {
    fn kind(&self) -> &'static str {
        "data"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        ctx: &'a mut ExecutionContext,
        env: &'a HandlerEnv,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeKind::Data(config) = &node.kind else {
                return Err(InkflowError::UnsupportedNodeKind {
                    node_id: node.id.clone(),
                    kind: node.kind.name().to_string(),
                });
            };

            let (text, source) = match config {
                DataConfig::RawText { text } => (text.clone(), "raw text".to_string()),
                DataConfig::Cards { card_ids } => {
                    let texts = env.resolve_cards(card_ids).await?;
                    (texts.join("\n\n"), format!("{} cards", card_ids.len()))
                }
                DataConfig::File { file_name, content } => (
                    content.clone(),
                    file_name.clone().unwrap_or_else(|| "file".to_string()),
                ),
            };

            let chars = text.chars().count();
            debug!(node_id = %node.id, chars, source = %source, "Exposing data node payload");
            ctx.set_str(data_key(&node.id), text.clone());
            ctx.push_source_material(text);
            Ok(NodeOutcome::new(format!("{} characters from {}", chars, source)))
        })
    }
}

/// Context key holding a data node's payload.
pub fn data_key(node_id: &str) -> String {
    format!("data:{}", node_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_env, test_env_with};
    use inkflow_test_utils::{InMemoryCards, MockGenerator, RecordingSink};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_raw_text_exposed() {
        let generator = MockGenerator::new();
        let env = test_env(generator.clone());
        let mut ctx = ExecutionContext::new();
        let node = Node::raw_text("src", "Once upon a time");

        let outcome = env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();

        assert_eq!(ctx.get_str("data:src"), Some("Once upon a time"));
        assert_eq!(ctx.source_material(), vec!["Once upon a time"]);
        assert_eq!(outcome.summary, "16 characters from raw text");
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cards_joined_in_order() {
        let cards = InMemoryCards::new()
            .with_card("scene-1", "Rain.")
            .with_card("scene-2", "Thunder.");
        let env = test_env_with(MockGenerator::new(), Arc::new(RecordingSink::new()), Arc::new(cards));
        let node = Node::new(
            "cards",
            "Scenes",
            NodeKind::Data(DataConfig::Cards {
                card_ids: vec!["scene-2".into(), "scene-1".into()],
            }),
        );
        let mut ctx = ExecutionContext::new();
        env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();
        assert_eq!(ctx.get_str("data:cards"), Some("Thunder.\n\nRain."));
    }

    #[tokio::test]
    async fn test_missing_card_fails() {
        let env = test_env(MockGenerator::new());
        let node = Node::new(
            "cards",
            "Scenes",
            NodeKind::Data(DataConfig::Cards {
                card_ids: vec!["nope".into()],
            }),
        );
        let mut ctx = ExecutionContext::new();
        let err = env.registry.dispatch(&node, &mut ctx, &env).await.unwrap_err();
        assert!(matches!(err, InkflowError::CardNotFound(_)));
        assert!(!ctx.contains("data:cards"));
    }

    #[tokio::test]
    async fn test_file_content() {
        let env = test_env(MockGenerator::new());
        let node = Node::new(
            "f",
            "Notes",
            NodeKind::Data(DataConfig::File {
                file_name: Some("notes.md".into()),
                content: "# Notes".into(),
            }),
        );
        let mut ctx = ExecutionContext::new();
        let outcome = env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();
        assert_eq!(outcome.summary, "7 characters from notes.md");
    }
}
