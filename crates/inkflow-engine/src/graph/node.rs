use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A node in the workflow graph.
///
/// The node's kind is fixed at construction and carries only the
/// configuration relevant to that kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawNode")]
pub struct Node {
    /// Unique identifier within the graph.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub kind: NodeKind,
}

/// Kind-specific node configuration.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Agent(AgentConfig),
    Llm(LlmConfig),
    Tool(ToolConfig),
    Data(DataConfig),
    /// A kind this engine has no handler for. Rejected before a run starts.
    Unsupported { kind: String },
}

impl NodeKind {
    /// Name used to look up the handler for this kind.
    pub fn name(&self) -> &str {
        match self {
            Self::Agent(_) => "agent",
            Self::Llm(_) => "llm",
            Self::Tool(_) => "tool",
            Self::Data(_) => "data",
            Self::Unsupported { kind } => kind,
        }
    }
}

/// Roles an agent node can play in the novel pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRole {
    Coordinator,
    OutlineGenerator,
    WorldBuilder,
    CharacterDesigner,
    Reviewer,
    QualityEvaluator,
    Editor,
    Summarizer,
    ChapterWriter,
    Custom,
}

/// How an agent role is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentShape {
    /// One generation call with a structured-output schema, then field compensation.
    Structured,
    /// One generation call, raw text stored.
    FreeText,
    /// The chapter-writer sub-loop.
    ChapterLoop,
}

impl AgentRole {
    pub fn shape(self) -> AgentShape {
        match self {
            Self::Coordinator | Self::OutlineGenerator | Self::WorldBuilder | Self::CharacterDesigner => {
                AgentShape::Structured
            }
            Self::ChapterWriter => AgentShape::ChapterLoop,
            Self::Reviewer | Self::QualityEvaluator | Self::Editor | Self::Summarizer | Self::Custom => {
                AgentShape::FreeText
            }
        }
    }

    /// Context key this role writes its result under.
    pub fn output_key(self, node_id: &str) -> String {
        match self {
            Self::Coordinator => "coordinatorData".to_string(),
            Self::OutlineGenerator => "outlineData".to_string(),
            Self::WorldBuilder => "worldData".to_string(),
            Self::CharacterDesigner => "characterData".to_string(),
            Self::Reviewer => "reviewerResult".to_string(),
            Self::QualityEvaluator => "qualityEvaluationResult".to_string(),
            Self::Editor => "editorResult".to_string(),
            Self::Summarizer => "chapterSummary".to_string(),
            Self::ChapterWriter => "chapters".to_string(),
            Self::Custom => format!("custom:{}", node_id),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coordinator => "COORDINATOR",
            Self::OutlineGenerator => "OUTLINE_GENERATOR",
            Self::WorldBuilder => "WORLD_BUILDER",
            Self::CharacterDesigner => "CHARACTER_DESIGNER",
            Self::Reviewer => "REVIEWER",
            Self::QualityEvaluator => "QUALITY_EVALUATOR",
            Self::Editor => "EDITOR",
            Self::Summarizer => "SUMMARIZER",
            Self::ChapterWriter => "CHAPTER_WRITER",
            Self::Custom => "CUSTOM",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a prompt template: inline text or a named entry in `[prompts]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptRef {
    Inline(String),
    Named { template: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub role: AgentRole,
    #[serde(default)]
    pub prompt: Option<PromptRef>,
    /// Prompt used for the per-chapter summary call of a chapter writer.
    #[serde(default)]
    pub summary_prompt: Option<PromptRef>,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub search_grounding: bool,
    /// Content cards injected into the prompt as reference material.
    #[serde(default)]
    pub reference_cards: Vec<String>,
}

impl AgentConfig {
    pub fn new(role: AgentRole) -> Self {
        Self {
            role,
            prompt: None,
            summary_prompt: None,
            model_override: None,
            search_grounding: false,
            reference_cards: vec![],
        }
    }
}

/// A plain prompt node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub output_key: Option<String>,
    /// JSON Schema for structured output.
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub search_grounding: bool,
}

#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// A failing critical tool aborts the run instead of skipping its dependents.
    pub critical: bool,
    pub action: ToolAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolAction {
    /// Inline code, or code generated from a prompt, run by the script interpreter.
    Script {
        code: Option<String>,
        prompt: Option<String>,
    },
    Image { prompt: String },
    Audio { text: String },
    /// A tool subtype without an implementation. Completes without effect.
    Passthrough { tool: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DataConfig {
    RawText { text: String },
    Cards { card_ids: Vec<String> },
    File {
        #[serde(default)]
        file_name: Option<String>,
        content: String,
    },
}

/// Wire shape of a node before its kind-specific configuration is checked.
#[derive(Deserialize)]
struct RawNode {
    id: String,
    #[serde(default)]
    name: String,
    kind: String,
    #[serde(default)]
    config: serde_json::Value,
}

#[derive(Deserialize)]
struct RawTool {
    #[serde(default)]
    tool: String,
    #[serde(default)]
    critical: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl TryFrom<RawNode> for Node {
    type Error = String;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let config = match raw.config {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };
        let invalid = |e: serde_json::Error| format!("node {}: invalid {} config: {}", raw.id, raw.kind, e);

        let kind = match raw.kind.as_str() {
            "agent" => NodeKind::Agent(serde_json::from_value(config).map_err(invalid)?),
            "llm" => NodeKind::Llm(serde_json::from_value(config).map_err(invalid)?),
            "data" => NodeKind::Data(serde_json::from_value(config).map_err(invalid)?),
            "tool" => {
                let tool: RawTool = serde_json::from_value(config).map_err(invalid)?;
                NodeKind::Tool(tool_config(&raw.id, tool)?)
            }
            other => NodeKind::Unsupported {
                kind: other.to_string(),
            },
        };

        Ok(Node {
            name: if raw.name.is_empty() { raw.id.clone() } else { raw.name },
            id: raw.id,
            kind,
        })
    }
}

fn tool_config(node_id: &str, raw: RawTool) -> Result<ToolConfig, String> {
    let missing = |field: &str| format!("node {}: {} tool requires '{}'", node_id, raw.tool, field);
    let action = match raw.tool.as_str() {
        "script" => ToolAction::Script {
            code: raw.code.clone(),
            prompt: raw.prompt.clone(),
        },
        "image" => ToolAction::Image {
            prompt: raw.prompt.clone().ok_or_else(|| missing("prompt"))?,
        },
        "audio" => ToolAction::Audio {
            text: raw.text.clone().or_else(|| raw.prompt.clone()).ok_or_else(|| missing("text"))?,
        },
        other => ToolAction::Passthrough {
            tool: other.to_string(),
        },
    };
    Ok(ToolConfig {
        critical: raw.critical,
        action,
    })
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn agent(id: impl Into<String>, role: AgentRole) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, NodeKind::Agent(AgentConfig::new(role)))
    }

    pub fn raw_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, NodeKind::Data(DataConfig::RawText { text: text.into() }))
    }

    /// The agent role, if this is an agent node.
    pub fn role(&self) -> Option<AgentRole> {
        match &self.kind {
            NodeKind::Agent(config) => Some(config.role),
            _ => None,
        }
    }

    /// Whether a failure of this node aborts the run.
    pub fn is_critical(&self) -> bool {
        match &self.kind {
            NodeKind::Tool(config) => config.critical,
            _ => true,
        }
    }
}

/// Index of nodes by id.
pub(crate) fn index(nodes: &[Node]) -> HashMap<&str, usize> {
    nodes.iter().enumerate().map(|(i, n)| (n.id.as_str(), i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> Node {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_parse_agent_node() {
        let node = parse(serde_json::json!({
            "id": "outline",
            "name": "Outline",
            "kind": "agent",
            "config": { "role": "OUTLINE_GENERATOR", "prompt": { "template": "noir" } },
            "position": { "x": 10, "y": 20 }
        }));
        assert_eq!(node.role(), Some(AgentRole::OutlineGenerator));
        match node.kind {
            NodeKind::Agent(config) => {
                assert_eq!(config.prompt, Some(PromptRef::Named { template: "noir".into() }));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_parse_tool_subtypes() {
        let node = parse(serde_json::json!({
            "id": "t1", "kind": "tool",
            "config": { "tool": "script", "code": "print(1)", "critical": true }
        }));
        assert!(node.is_critical());
        assert_eq!(node.name, "t1");

        let node = parse(serde_json::json!({
            "id": "t2", "kind": "tool", "config": { "tool": "web_scraper" }
        }));
        assert!(!node.is_critical());
        match node.kind {
            NodeKind::Tool(ToolConfig { action, .. }) => {
                assert_eq!(action, ToolAction::Passthrough { tool: "web_scraper".into() });
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_image_tool_requires_prompt() {
        let result: Result<Node, _> = serde_json::from_value(serde_json::json!({
            "id": "img", "kind": "tool", "config": { "tool": "image" }
        }));
        assert!(result.unwrap_err().to_string().contains("requires 'prompt'"));
    }

    #[test]
    fn test_unknown_kind_is_unsupported() {
        let node = parse(serde_json::json!({ "id": "c", "kind": "condition" }));
        assert!(matches!(node.kind, NodeKind::Unsupported { ref kind } if kind == "condition"));
        assert_eq!(node.kind.name(), "condition");
    }

    #[test]
    fn test_data_sources() {
        let node = parse(serde_json::json!({
            "id": "d", "kind": "data",
            "config": { "source": "cards", "card_ids": ["c1", "c2"] }
        }));
        match node.kind {
            NodeKind::Data(DataConfig::Cards { card_ids }) => assert_eq!(card_ids.len(), 2),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_role_keys_and_shapes() {
        assert_eq!(AgentRole::OutlineGenerator.output_key("n"), "outlineData");
        assert_eq!(AgentRole::Custom.output_key("n7"), "custom:n7");
        assert_eq!(AgentRole::WorldBuilder.shape(), AgentShape::Structured);
        assert_eq!(AgentRole::Editor.shape(), AgentShape::FreeText);
        assert_eq!(AgentRole::ChapterWriter.shape(), AgentShape::ChapterLoop);
    }
}
