use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InkflowError;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structured-output specification attached to a generation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSchema {
    /// Schema name sent to the provider.
    pub name: String,
    /// JSON Schema document.
    pub schema: serde_json::Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Top-level required field names declared by the schema.
    pub fn required_fields(&self) -> Vec<&str> {
        self.schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|fields| fields.iter().filter_map(|f| f.as_str()).collect())
            .unwrap_or_default()
    }
}

/// A single call into the generation capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<OutputSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    #[serde(default)]
    pub search_grounding: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model_override = model;
        self
    }

    pub fn with_search_grounding(mut self, enabled: bool) -> Self {
        self.search_grounding = enabled;
        self
    }
}

/// A source cited by a grounded generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

/// Output of a generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    /// Parsed structured fields when a schema was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn structured(text: impl Into<String>, fields: serde_json::Value) -> Self {
        Self {
            text: text.into(),
            fields: Some(fields),
            citations: vec![],
        }
    }
}

/// Media produced by image/audio tool nodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaAsset {
    pub kind: MediaKind,
    pub mime_type: String,
    /// Base64-encoded payload, or a URL when the provider returns one.
    pub data: String,
}

/// Immutable snapshot of a generated document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionSnapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

impl VersionSnapshot {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            content: content.into(),
        }
    }
}

/// Coarse classification carried by `RunFailed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CyclicGraph,
    Configuration,
    Generation,
    Tool,
    Cancelled,
    Storage,
    Other,
}

impl From<&InkflowError> for FailureKind {
    fn from(err: &InkflowError) -> Self {
        match err {
            InkflowError::CyclicGraph { .. } => Self::CyclicGraph,
            InkflowError::InvalidGraph(_)
            | InkflowError::UnsupportedNodeKind { .. }
            | InkflowError::MissingPromptConfiguration { .. }
            | InkflowError::MissingContext { .. }
            | InkflowError::CardNotFound(_)
            | InkflowError::Config(_)
            | InkflowError::ConfigNotFound(_) => Self::Configuration,
            InkflowError::Generation(_) | InkflowError::GenerationParse(_) => Self::Generation,
            InkflowError::ToolExecution { .. } | InkflowError::ToolTimeout { .. } => Self::Tool,
            InkflowError::Cancelled => Self::Cancelled,
            InkflowError::Database(_) => Self::Storage,
            InkflowError::Io(_) | InkflowError::Json(_) => Self::Other,
        }
    }
}

/// Progress event emitted by the run orchestrator.
///
/// Events are ordered and are the only channel through which a run talks to
/// the outside world while it executes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StepStarted {
        node_id: String,
    },
    StepCompleted {
        node_id: String,
        summary: String,
    },
    StepFailed {
        node_id: String,
        error: String,
    },
    /// A node was not executed because an upstream tool failed.
    StepSkipped {
        node_id: String,
        reason: String,
    },
    /// Non-fatal condition worth surfacing, e.g. a field compensation.
    Warning {
        node_id: String,
        message: String,
    },
    /// One chapter of a chapter-writer loop finished.
    ChapterCompleted {
        node_id: String,
        chapter: usize,
        title: String,
        chars: usize,
    },
    RunCompleted {
        final_content: String,
    },
    RunFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        kind: FailureKind,
        error: String,
    },
}

impl ProgressEvent {
    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted { .. } | Self::RunFailed { .. })
    }

    /// Short machine-readable name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::StepSkipped { .. } => "step_skipped",
            Self::Warning { .. } => "warning",
            Self::ChapterCompleted { .. } => "chapter_completed",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunFailed { .. } => "run_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_fields() {
        let schema = OutputSchema::new(
            "outline",
            serde_json::json!({
                "type": "object",
                "required": ["title", "chapters"],
            }),
        );
        assert_eq!(schema.required_fields(), vec!["title", "chapters"]);

        let bare = OutputSchema::new("bare", serde_json::json!({"type": "object"}));
        assert!(bare.required_fields().is_empty());
    }

    #[test]
    fn test_progress_event_wire_shape() {
        let event = ProgressEvent::RunFailed {
            node_id: None,
            kind: FailureKind::Cancelled,
            error: "Run cancelled".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "run_failed");
        assert_eq!(json["kind"], "cancelled");
        assert!(json.get("node_id").is_none());
        assert!(event.is_terminal());
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            FailureKind::from(&InkflowError::Cancelled),
            FailureKind::Cancelled
        );
        assert_eq!(
            FailureKind::from(&InkflowError::Generation("boom".into())),
            FailureKind::Generation
        );
        assert_eq!(
            FailureKind::from(&InkflowError::UnsupportedNodeKind {
                node_id: "x".into(),
                kind: "condition".into()
            }),
            FailureKind::Configuration
        );
    }

    #[test]
    fn test_request_builder() {
        let req = GenerationRequest::new("Write")
            .with_model(Some("gpt-4o".into()))
            .with_search_grounding(true);
        assert_eq!(req.prompt, "Write");
        assert_eq!(req.model_override.as_deref(), Some("gpt-4o"));
        assert!(req.search_grounding);
        assert!(req.schema.is_none());
    }
}
