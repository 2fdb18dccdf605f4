//! Chapter-writer loop.
//!
//! Writes the outline one chapter at a time. Each chapter is conditioned on
//! the summary of the previous chapter rather than its full text, and that
//! summary comes from a summarizer agent dispatched through the registry.
//! A chapter and its summary are recorded together, so a failure at chapter
//! `i` leaves exactly `i` of each in the context.

use tracing::{debug, info};

use inkflow_core::error::{InkflowError, Result};
use inkflow_core::types::{GenerationRequest, ProgressEvent};

use super::{HandlerEnv, NodeOutcome};
use crate::context::{keys, Chapter, ChapterSummary, ExecutionContext};
use crate::graph::{AgentConfig, AgentRole, Node, NodeKind};
use crate::prompts::{render, with_references};

pub(crate) async fn write_chapters(
    node: &Node,
    config: &AgentConfig,
    ctx: &mut ExecutionContext,
    env: &HandlerEnv,
) -> Result<NodeOutcome> {
    let outline = ctx
        .outline()
        .filter(|o| !o.chapters.is_empty())
        .ok_or_else(|| InkflowError::MissingContext {
            node_id: node.id.clone(),
            key: keys::OUTLINE.to_string(),
        })?;

    let template = env
        .prompts
        .resolve(&node.id, AgentRole::ChapterWriter, config.prompt.as_ref())?;
    let references = env.resolve_cards(&config.reference_cards).await?;
    let summarizer = summarizer_node(node, config);

    let target_words = ctx.words_per_chapter(env.config.words_per_chapter);
    let min_words = target_words * 4 / 5;
    let max_words = target_words * 6 / 5;

    ctx.clear_chapters();
    let mut previous_summary = env.config.first_chapter_placeholder.clone();
    let mut total_chars = 0usize;

    for (i, planned) in outline.chapters.iter().enumerate() {
        let number = if planned.number > 0 { planned.number } else { i + 1 };
        let title = if planned.name.trim().is_empty() {
            format!("Chapter {}", number)
        } else {
            planned.name.clone()
        };
        let tone = ctx.chapter_tone(number).unwrap_or_default().to_string();

        let extra = [
            ("chapterNumber", number.to_string()),
            ("chapterName", title.clone()),
            ("chapterPlot", planned.plot.clone()),
            ("previousChapterSummary", previous_summary.clone()),
            ("chapterTone", tone),
            ("targetWords", target_words.to_string()),
            ("minWords", min_words.to_string()),
            ("maxWords", max_words.to_string()),
        ];
        let prompt = with_references(render(&template, ctx, &extra), &references);

        info!(node_id = %node.id, chapter = number, of = outline.chapters.len(), "Writing chapter");
        let generation = env
            .generator
            .generate(
                GenerationRequest::new(prompt)
                    .with_model(config.model_override.clone())
                    .with_search_grounding(config.search_grounding),
            )
            .await
            .map_err(|e| in_chapter(number, e))?;
        let content = generation.text.trim().to_string();

        ctx.set_str(keys::CURRENT_CHAPTER, content.clone());
        env.registry
            .dispatch(&summarizer, ctx, env)
            .await
            .map_err(|e| in_chapter(number, e))?;
        let summary = ctx.chapter_summary().unwrap_or_default().to_string();

        let chars = content.chars().count();
        total_chars += chars;
        ctx.push_chapter(&Chapter {
            number,
            title: title.clone(),
            content,
        });
        ctx.push_chapter_summary(&ChapterSummary {
            number,
            summary: summary.clone(),
        });
        debug!(node_id = %node.id, chapter = number, chars, "Chapter recorded");
        env.sink.emit(ProgressEvent::ChapterCompleted {
            node_id: node.id.clone(),
            chapter: number,
            title,
            chars,
        });

        previous_summary = summary;
    }

    ctx.remove(keys::CURRENT_CHAPTER);
    Ok(NodeOutcome::new(format!(
        "{} chapters, {} characters",
        outline.chapters.len(),
        total_chars
    )))
}

/// The summarizer agent a chapter writer delegates to.
fn summarizer_node(node: &Node, config: &AgentConfig) -> Node {
    let mut summary = AgentConfig::new(AgentRole::Summarizer);
    summary.prompt = config.summary_prompt.clone();
    summary.model_override = config.model_override.clone();
    Node::new(
        format!("{}#summary", node.id),
        format!("{} summary", node.name),
        NodeKind::Agent(summary),
    )
}

fn in_chapter(number: usize, err: InkflowError) -> InkflowError {
    match err {
        InkflowError::Generation(msg) => InkflowError::Generation(format!("chapter {}: {}", number, msg)),
        InkflowError::GenerationParse(msg) => {
            InkflowError::GenerationParse(format!("chapter {}: {}", number, msg))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_env, test_env_with};
    use inkflow_test_utils::{outline_value, InMemoryCards, MockGenerator, MockReply, RecordingSink};
    use serde_json::json;
    use std::sync::Arc;

    fn seeded(chapters: usize) -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.set_str("projectName", "Test");
        ctx.set("outlineData", outline_value(chapters));
        ctx
    }

    fn writer() -> Node {
        Node::agent("writer", AgentRole::ChapterWriter)
    }

    #[tokio::test]
    async fn test_writes_every_chapter_with_summaries() {
        let generator = MockGenerator::new()
            .with_rule("Summarize the following chapter", MockReply::Text("short".into()))
            .with_rule("Write chapter", MockReply::Text("Body text.".into()));
        let sink = Arc::new(RecordingSink::new());
        let env = test_env_with(generator.clone(), sink.clone(), Arc::new(InMemoryCards::new()));
        let mut ctx = seeded(3);

        let outcome = env.registry.dispatch(&writer(), &mut ctx, &env).await.unwrap();

        assert_eq!(ctx.chapters().len(), 3);
        assert_eq!(ctx.chapter_summaries().len(), 3);
        assert_eq!(ctx.chapters()[1].title, "Part 2");
        assert!(!ctx.contains("currentChapter"));
        assert_eq!(sink.count("chapter_completed"), 3);
        assert_eq!(outcome.summary, "3 chapters, 30 characters");
        // One write and one summary call per chapter
        assert_eq!(generator.calls_matching("Write chapter"), 3);
        assert_eq!(generator.calls_matching("Summarize the following chapter"), 3);
    }

    #[tokio::test]
    async fn test_chapter_requests_carry_node_options() {
        let generator = MockGenerator::new();
        let env = test_env(generator.clone());
        let mut config = AgentConfig::new(AgentRole::ChapterWriter);
        config.search_grounding = true;
        config.model_override = Some("gpt-4o-mini".into());
        let node = Node::new("writer", "writer", NodeKind::Agent(config));
        let mut ctx = seeded(2);

        env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();

        let writes: Vec<_> = generator
            .requests()
            .into_iter()
            .filter(|r| r.prompt.starts_with("Write chapter"))
            .collect();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|r| r.search_grounding));
        assert!(writes.iter().all(|r| r.model_override.as_deref() == Some("gpt-4o-mini")));
    }

    #[tokio::test]
    async fn test_previous_summary_threads_forward() {
        let generator = MockGenerator::new()
            .with_rule("Summarize the following chapter", MockReply::Echo)
            .with_rule("Write chapter 1 ", MockReply::Text("FIRST-CHAPTER-BODY".into()))
            .with_rule("Write chapter", MockReply::Text("later".into()));
        let env = test_env(generator.clone());
        let mut ctx = seeded(2);

        env.registry.dispatch(&writer(), &mut ctx, &env).await.unwrap();

        let prompts: Vec<String> = generator
            .requests()
            .into_iter()
            .map(|r| r.prompt)
            .filter(|p| p.starts_with("Write chapter"))
            .collect();
        assert!(prompts[0].contains(&env.config.first_chapter_placeholder));
        // The summarizer echoes its prompt, which embeds chapter 1's text
        assert!(prompts[1].contains("FIRST-CHAPTER-BODY"));
    }

    #[tokio::test]
    async fn test_failure_keeps_completed_chapters() {
        let generator = MockGenerator::new()
            .with_rule("Summarize the following chapter", MockReply::Text("short".into()))
            .with_rule("Write chapter 3 ", MockReply::Fail("HTTP 500".into()))
            .with_rule("Write chapter", MockReply::Text("Body.".into()));
        let env = test_env(generator);
        let mut ctx = seeded(5);

        let err = env.registry.dispatch(&writer(), &mut ctx, &env).await.unwrap_err();

        assert!(err.to_string().contains("chapter 3"));
        assert_eq!(ctx.chapters().len(), 2);
        assert_eq!(ctx.chapter_summaries().len(), 2);
    }

    #[tokio::test]
    async fn test_summary_failure_does_not_record_chapter() {
        let generator = MockGenerator::new()
            .with_rule("Summarize the following chapter", MockReply::Fail("HTTP 503".into()))
            .with_rule("Write chapter", MockReply::Text("Body.".into()));
        let env = test_env(generator);
        let mut ctx = seeded(2);

        assert!(env.registry.dispatch(&writer(), &mut ctx, &env).await.is_err());
        assert!(ctx.chapters().is_empty());
        assert!(ctx.chapter_summaries().is_empty());
    }

    #[tokio::test]
    async fn test_missing_outline() {
        let env = test_env(MockGenerator::new());
        let mut ctx = ExecutionContext::new();
        let err = env.registry.dispatch(&writer(), &mut ctx, &env).await.unwrap_err();
        assert!(matches!(err, InkflowError::MissingContext { ref key, .. } if key == "outlineData"));
    }

    #[tokio::test]
    async fn test_tone_and_length_in_prompt() {
        let generator = MockGenerator::new();
        let env = test_env(generator.clone());
        let mut ctx = seeded(1);
        ctx.set("chapterTones", json!({ "1": "quiet dread" }));
        ctx.set("wordsPerChapter", json!(1000));

        env.registry.dispatch(&writer(), &mut ctx, &env).await.unwrap();

        let prompt = &generator.requests()[0].prompt;
        assert!(prompt.contains("Tone: quiet dread"));
        assert!(prompt.contains("between 800 and 1200"));
    }
}
