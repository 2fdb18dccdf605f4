use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use inkflow_core::error::{InkflowError, Result};
use inkflow_core::types::{GenerationRequest, MediaKind};

use super::{HandlerEnv, NodeHandler, NodeOutcome};
use crate::compensation::strip_code_fences;
use crate::context::ExecutionContext;
use crate::graph::{Node, NodeKind, ToolAction};
use crate::prompts::render;

const MAX_OUTPUT_CHARS: usize = 30_000;

/// Runs tool nodes: scripts, image and audio generation, and passthroughs.
///
/// Results are stored under `tool:<node_id>`. Whether a failure aborts the
/// run is decided by the orchestrator from the node's `critical` flag.
pub struct ToolHandler;

impl NodeHandler for ToolHandler {
    fn kind(&self) -> &'static str {
        "tool"
    }

    fn validate(&self, node: &Node, env: &HandlerEnv) -> Result<()> {
        if let ToolAction::Script { code, prompt } = action(node)? {
            if code.is_none() && prompt.is_none() {
                return Err(InkflowError::MissingPromptConfiguration {
                    node_id: node.id.clone(),
                    role: "SCRIPT".to_string(),
                });
            }
            if env.config.script_command.is_empty() {
                return Err(InkflowError::Config("engine.script_command is empty".into()));
            }
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
            let key = tool_key(&node.id);
            match action(node)? {
                ToolAction::Script { code, prompt } => {
                    let code = match (code, prompt) {
                        (Some(code), _) => code.clone(),
                        (None, Some(prompt)) => generate_code(node, prompt, ctx, env).await?,
                        (None, None) => {
                            return Err(InkflowError::MissingPromptConfiguration {
                                node_id: node.id.clone(),
                                role: "SCRIPT".to_string(),
                            })
                        }
                    };
                    let output = run_script(&code, ctx, env).await?;
                    let chars = output.chars().count();
                    ctx.set_str(key, output);
                    Ok(NodeOutcome::new(format!("script produced {} characters", chars)))
                }
                ToolAction::Image { prompt } => {
                    let prompt = render(prompt, ctx, &[]);
                    let asset = env.generator.generate_media(MediaKind::Image, prompt).await?;
                    let summary = format!("image ({})", asset.mime_type);
                    ctx.set(key, serde_json::to_value(&asset)?);
                    Ok(NodeOutcome::new(summary))
                }
                ToolAction::Audio { text } => {
                    let text = render(text, ctx, &[]);
                    let asset = env.generator.generate_media(MediaKind::Audio, text).await?;
                    let summary = format!("audio ({})", asset.mime_type);
                    ctx.set(key, serde_json::to_value(&asset)?);
                    Ok(NodeOutcome::new(summary))
                }
                ToolAction::Passthrough { tool } => {
                    env.warn(&node.id, format!("tool '{}' has no implementation; passed through", tool));
                    Ok(NodeOutcome::new(format!("{} passed through", tool)))
                }
            }
        })
    }
}

/// Context key holding a tool node's result.
pub fn tool_key(node_id: &str) -> String {
    format!("tool:{}", node_id)
}

fn action(node: &Node) -> Result<&ToolAction> {
    match &node.kind {
        NodeKind::Tool(config) => Ok(&config.action),
        other => Err(InkflowError::UnsupportedNodeKind {
            node_id: node.id.clone(),
            kind: other.name().to_string(),
        }),
    }
}

async fn generate_code(
    node: &Node,
    prompt: &str,
    ctx: &ExecutionContext,
    env: &HandlerEnv,
) -> Result<String> {
    let prompt = format!(
        "{}\n\nReply with only the code, no explanation.",
        render(prompt, ctx, &[])
    );
    info!(node_id = %node.id, "Generating script code");
    let generation = env.generator.generate(GenerationRequest::new(prompt)).await?;
    Ok(strip_code_fences(&generation.text))
}

/// Run `code` with the configured interpreter.
///
/// The context is written to stdin as JSON; stdout is the result. A non-zero
/// exit or a timeout is an error.
async fn run_script(code: &str, ctx: &ExecutionContext, env: &HandlerEnv) -> Result<String> {
    let (program, args) = env
        .config
        .script_command
        .split_first()
        .ok_or_else(|| InkflowError::Config("engine.script_command is empty".into()))?;
    let input = serde_json::to_vec(&ctx.to_value())?;
    let timeout_secs = env.config.tool_timeout_secs;
    let tool_error = |message: String| InkflowError::ToolExecution {
        tool: "script".to_string(),
        message,
    };

    debug!(program = %program, bytes = code.len(), "Running script");
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .arg(code)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| tool_error(e.to_string()))?;

    // Stdin is fed concurrently with the wait, inside the timeout
    let stdin = child.stdin.take();
    let feed = async move {
        if let Some(mut stdin) = stdin {
            // A script that never reads stdin closes the pipe early
            if let Err(e) = stdin.write_all(&input).await {
                debug!(error = %e, "Script did not consume context input");
            }
        }
    };
    let exchange = async move {
        let (_, output) = tokio::join!(feed, child.wait_with_output());
        output
    };

    let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), exchange).await {
        Ok(result) => result.map_err(|e| tool_error(e.to_string()))?,
        Err(_) => {
            return Err(InkflowError::ToolTimeout {
                tool: "script".to_string(),
                timeout_secs,
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(tool_error(format!("exit code {}: {}", code, stderr.trim())));
    }

    let mut content = stdout.trim().to_string();
    if content.chars().count() > MAX_OUTPUT_CHARS {
        content = content.chars().take(MAX_OUTPUT_CHARS).collect();
        content.push_str("\n... (output truncated)");
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ToolConfig;
    use crate::testing::{test_env, test_env_config};
    use inkflow_core::config::EngineConfig;
    use inkflow_test_utils::{MockGenerator, MockReply};

    fn tool(id: &str, action: ToolAction) -> Node {
        Node::new(id, id, NodeKind::Tool(ToolConfig { critical: false, action }))
    }

    fn shell_config() -> EngineConfig {
        EngineConfig {
            script_command: vec!["sh".into(), "-c".into()],
            tool_timeout_secs: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_script_stdout_stored() {
        let env = test_env_config(MockGenerator::new(), shell_config());
        let node = tool("t", ToolAction::Script { code: Some("echo hello".into()), prompt: None });
        let mut ctx = ExecutionContext::new();
        env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();
        assert_eq!(ctx.get_str("tool:t"), Some("hello"));
    }

    #[tokio::test]
    async fn test_script_reads_context_from_stdin() {
        let env = test_env_config(MockGenerator::new(), shell_config());
        let node = tool("t", ToolAction::Script { code: Some("cat".into()), prompt: None });
        let mut ctx = ExecutionContext::new();
        ctx.set_str("projectName", "Dusk");
        env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();
        assert!(ctx.get_str("tool:t").unwrap().contains("\"projectName\":\"Dusk\""));
    }

    #[tokio::test]
    async fn test_script_nonzero_exit() {
        let env = test_env_config(MockGenerator::new(), shell_config());
        let node = tool("t", ToolAction::Script { code: Some("echo bad >&2; exit 3".into()), prompt: None });
        let mut ctx = ExecutionContext::new();
        let err = env.registry.dispatch(&node, &mut ctx, &env).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool execution failed: script: exit code 3: bad");
        assert!(!ctx.contains("tool:t"));
    }

    #[tokio::test]
    async fn test_script_timeout() {
        let mut config = shell_config();
        config.tool_timeout_secs = 1;
        let env = test_env_config(MockGenerator::new(), config);
        let node = tool("t", ToolAction::Script { code: Some("sleep 5".into()), prompt: None });
        let mut ctx = ExecutionContext::new();
        let err = env.registry.dispatch(&node, &mut ctx, &env).await.unwrap_err();
        assert!(matches!(err, InkflowError::ToolTimeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_script_timeout_with_unread_large_context() {
        let mut config = shell_config();
        config.tool_timeout_secs = 1;
        let env = test_env_config(MockGenerator::new(), config);
        let node = tool("t", ToolAction::Script { code: Some("sleep 4; echo finished".into()), prompt: None });
        let mut ctx = ExecutionContext::new();
        // Well past any pipe buffer
        ctx.set_str("chapterDraft", "x".repeat(300_000));

        let started = std::time::Instant::now();
        let err = env.registry.dispatch(&node, &mut ctx, &env).await.unwrap_err();

        assert!(matches!(err, InkflowError::ToolTimeout { timeout_secs: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!ctx.contains("tool:t"));
    }

    #[tokio::test]
    async fn test_script_echoes_large_context() {
        let env = test_env_config(MockGenerator::new(), shell_config());
        let node = tool("t", ToolAction::Script { code: Some("wc -c".into()), prompt: None });
        let mut ctx = ExecutionContext::new();
        ctx.set_str("chapterDraft", "x".repeat(300_000));
        env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();
        let bytes: usize = ctx.get_str("tool:t").unwrap().trim().parse().unwrap();
        assert!(bytes > 300_000);
    }

    #[tokio::test]
    async fn test_generated_script() {
        let generator = MockGenerator::new()
            .with_rule("Count", MockReply::Text("```sh\necho 42\n```".into()));
        let env = test_env_config(generator, shell_config());
        let node = tool("t", ToolAction::Script { code: None, prompt: Some("Count the chapters.".into()) });
        let mut ctx = ExecutionContext::new();
        env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();
        assert_eq!(ctx.get_str("tool:t"), Some("42"));
    }

    #[tokio::test]
    async fn test_image_asset_stored() {
        let generator = MockGenerator::new();
        let env = test_env(generator.clone());
        let node = tool("cover", ToolAction::Image { prompt: "Cover for {{projectName}}".into() });
        let mut ctx = ExecutionContext::new();
        ctx.set_str("projectName", "Dusk");
        let outcome = env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();
        assert_eq!(ctx.get("tool:cover").unwrap()["kind"], "image");
        assert_eq!(outcome.summary, "image (image/png)");
        assert_eq!(generator.media_prompts(), vec!["Cover for Dusk"]);
    }

    #[tokio::test]
    async fn test_media_failure_propagates() {
        let generator = MockGenerator::new().with_rule("Narrate", MockReply::Fail("HTTP 500".into()));
        let env = test_env(generator);
        let node = tool("voice", ToolAction::Audio { text: "Narrate this.".into() });
        let mut ctx = ExecutionContext::new();
        assert!(env.registry.dispatch(&node, &mut ctx, &env).await.is_err());
    }

    #[tokio::test]
    async fn test_passthrough_warns() {
        let env = test_env(MockGenerator::new());
        let node = tool("p", ToolAction::Passthrough { tool: "web_scraper".into() });
        let mut ctx = ExecutionContext::new();
        let outcome = env.registry.dispatch(&node, &mut ctx, &env).await.unwrap();
        assert_eq!(outcome.summary, "web_scraper passed through");
        assert!(ctx.data().is_empty());
    }

    #[test]
    fn test_validate_script_without_code_or_prompt() {
        let env = test_env(MockGenerator::new());
        let node = tool("t", ToolAction::Script { code: None, prompt: None });
        assert!(ToolHandler.validate(&node, &env).is_err());
    }
}
