use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{json, Value};

use inkflow_core::error::{InkflowError, Result};
use inkflow_core::types::OutputSchema;

use crate::context::{keys, ExecutionContext};
use crate::graph::{AgentRole, PromptRef};

/// Prompt templates: role defaults plus named templates from config.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    named: HashMap<String, String>,
}

impl PromptLibrary {
    pub fn new(named: HashMap<String, String>) -> Self {
        Self { named }
    }

    /// Resolve the template a node runs with.
    ///
    /// An explicit reference wins; otherwise the role default. `Custom` has
    /// no default, and a named template must exist.
    pub fn resolve(&self, node_id: &str, role: AgentRole, prompt: Option<&PromptRef>) -> Result<String> {
        let missing = || InkflowError::MissingPromptConfiguration {
            node_id: node_id.to_string(),
            role: role.to_string(),
        };
        match prompt {
            Some(PromptRef::Inline(text)) if !text.trim().is_empty() => Ok(text.clone()),
            Some(PromptRef::Named { template }) => self.named.get(template).cloned().ok_or_else(missing),
            _ => default_template(role).map(str::to_string).ok_or_else(missing),
        }
    }
}

/// Built-in template for a role.
pub fn default_template(role: AgentRole) -> Option<&'static str> {
    let template = match role {
        AgentRole::Coordinator => {
            "You are the coordinator of a novel-writing team working on \"{{projectName}}\" \
             ({{genre}}).\n\nSource material:\n{{sourceMaterial}}\n\n\
             Decide the theme, the target audience, and the writing style, and list the \
             tasks the team must complete. Reply with JSON matching the schema."
        }
        AgentRole::OutlineGenerator => {
            "Write the outline of the novel \"{{projectName}}\" ({{genre}}) in \
             {{targetChapters}} chapters.\n\nSource material:\n{{sourceMaterial}}\n\n\
             Project direction:\n{{coordinatorData}}\n\n\
             Give the novel a title and a synopsis, and for every chapter its number, \
             a name, and its core plot. Reply with JSON matching the schema."
        }
        AgentRole::WorldBuilder => {
            "Build the world of the novel \"{{projectName}}\" ({{genre}}).\n\n\
             Outline:\n{{outlineData}}\n\nSource material:\n{{sourceMaterial}}\n\n\
             Describe the setting, its rules, and its key locations. \
             Reply with JSON matching the schema."
        }
        AgentRole::CharacterDesigner => {
            "Design the cast of the novel \"{{projectName}}\" ({{genre}}).\n\n\
             Outline:\n{{outlineData}}\n\nWorld:\n{{worldData}}\n\n\
             For each character give a name, a role in the story, and a description. \
             Reply with JSON matching the schema."
        }
        AgentRole::Reviewer => {
            "Review the novel \"{{projectName}}\".\n\nOutline:\n{{outlineData}}\n\n\
             Chapter summaries:\n{{chapterSummaries}}\n\n\
             Point out plot holes, pacing problems, and inconsistent characters."
        }
        AgentRole::QualityEvaluator => {
            "Evaluate the quality of the novel \"{{projectName}}\".\n\n\
             Outline:\n{{outlineData}}\n\nChapter summaries:\n{{chapterSummaries}}\n\n\
             Score structure, prose, and character work from 1 to 10 and justify each score."
        }
        AgentRole::Editor => {
            "You are the final editor of the novel \"{{projectName}}\".\n\n\
             Outline:\n{{outlineData}}\n\nReviewer feedback:\n{{reviewerResult}}\n\n\
             Quality evaluation:\n{{qualityEvaluationResult}}\n\n\
             Write the editorial notes and the revision plan for the manuscript."
        }
        AgentRole::Summarizer => {
            "Summarize the following chapter in at most 200 words. Keep every plot \
             point a later chapter depends on.\n\n{{currentChapter}}"
        }
        AgentRole::ChapterWriter => {
            "Write chapter {{chapterNumber}} of the novel \"{{projectName}}\" ({{genre}}).\n\n\
             Chapter name: {{chapterName}}\nCore plot: {{chapterPlot}}\n\n\
             Summary of the previous chapter:\n{{previousChapterSummary}}\n\n\
             World:\n{{worldData}}\n\nCharacters:\n{{characterData}}\n\n\
             Tone: {{chapterTone}}\n\n\
             Aim for about {{targetWords}} words (between {{minWords}} and {{maxWords}}). \
             Reply with the chapter text only."
        }
        AgentRole::Custom => return None,
    };
    Some(template)
}

/// Structured-output schema for a schema-validated role.
pub fn role_schema(role: AgentRole) -> Option<OutputSchema> {
    let schema = match role {
        AgentRole::Coordinator => json!({
            "type": "object",
            "properties": {
                "theme": { "type": "string" },
                "audience": { "type": "string" },
                "style": { "type": "string" },
                "tasks": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["theme", "audience", "style", "tasks"]
        }),
        AgentRole::OutlineGenerator => json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "synopsis": { "type": "string" },
                "chapters": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "number": { "type": "integer" },
                            "name": { "type": "string" },
                            "plot": { "type": "string" }
                        },
                        "required": ["number", "name", "plot"]
                    }
                }
            },
            "required": ["title", "synopsis", "chapters"]
        }),
        AgentRole::WorldBuilder => json!({
            "type": "object",
            "properties": {
                "setting": { "type": "string" },
                "rules": { "type": "array", "items": { "type": "string" } },
                "locations": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["setting", "rules", "locations"]
        }),
        AgentRole::CharacterDesigner => json!({
            "type": "object",
            "properties": {
                "characters": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "role": { "type": "string" },
                            "description": { "type": "string" }
                        },
                        "required": ["name", "role", "description"]
                    }
                }
            },
            "required": ["characters"]
        }),
        _ => return None,
    };
    Some(OutputSchema::new(role.as_str().to_lowercase(), schema))
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_:.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Render `{{key}}` placeholders.
///
/// `extra` is consulted before the context. Strings render verbatim, lists
/// of strings one per paragraph, other values as pretty JSON. Unknown keys
/// render empty.
pub fn render(template: &str, ctx: &ExecutionContext, extra: &[(&str, String)]) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            if let Some((_, value)) = extra.iter().find(|(k, _)| *k == key) {
                return value.clone();
            }
            ctx.get(key).map(render_value).unwrap_or_default()
        })
        .into_owned()
}

pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n\n"),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Append resolved reference cards to a rendered prompt.
pub fn with_references(prompt: String, references: &[String]) -> String {
    if references.is_empty() {
        return prompt;
    }
    let mut out = prompt;
    out.push_str("\n\n## Reference material\n");
    for reference in references {
        out.push('\n');
        out.push_str(reference);
        out.push('\n');
    }
    out
}

/// Fallback project name when the seed context has none.
pub fn project_name(ctx: &ExecutionContext) -> String {
    ctx.get_str(keys::PROJECT_NAME)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Untitled")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_placeholders() {
        let mut ctx = ExecutionContext::new();
        ctx.set_str("projectName", "Dusk");
        ctx.set("targetChapters", json!(3));
        let out = render(
            "{{projectName}} in {{ targetChapters }} chapters, {{missing}}!",
            &ctx,
            &[],
        );
        assert_eq!(out, "Dusk in 3 chapters, !");
    }

    #[test]
    fn test_extra_shadows_context() {
        let mut ctx = ExecutionContext::new();
        ctx.set_str("chapterNumber", "99");
        let out = render("Chapter {{chapterNumber}}", &ctx, &[("chapterNumber", "2".into())]);
        assert_eq!(out, "Chapter 2");
    }

    #[test]
    fn test_render_values() {
        assert_eq!(render_value(&json!(["a", "b"])), "a\n\nb");
        assert_eq!(render_value(&Value::Null), "");
        assert!(render_value(&json!({"title": "Dusk"})).contains("\"title\": \"Dusk\""));
    }

    #[test]
    fn test_resolve_prompt() {
        let mut named = HashMap::new();
        named.insert("noir".to_string(), "Noir outline for {{projectName}}".to_string());
        let library = PromptLibrary::new(named);

        let named_ref = PromptRef::Named { template: "noir".into() };
        assert!(library
            .resolve("n", AgentRole::OutlineGenerator, Some(&named_ref))
            .unwrap()
            .starts_with("Noir"));

        let inline = PromptRef::Inline("Just write.".into());
        assert_eq!(library.resolve("n", AgentRole::Custom, Some(&inline)).unwrap(), "Just write.");

        assert!(library.resolve("n", AgentRole::Editor, None).is_ok());
    }

    #[test]
    fn test_missing_prompt_configuration() {
        let library = PromptLibrary::default();
        assert!(matches!(
            library.resolve("n1", AgentRole::Custom, None),
            Err(InkflowError::MissingPromptConfiguration { .. })
        ));
        let unknown = PromptRef::Named { template: "nope".into() };
        assert!(matches!(
            library.resolve("n1", AgentRole::Editor, Some(&unknown)),
            Err(InkflowError::MissingPromptConfiguration { .. })
        ));
        let blank = PromptRef::Inline("   ".into());
        assert!(library.resolve("n1", AgentRole::Custom, Some(&blank)).is_err());
    }

    #[test]
    fn test_schemas_only_for_structured_roles() {
        let outline = role_schema(AgentRole::OutlineGenerator).unwrap();
        assert_eq!(outline.required_fields(), vec!["title", "synopsis", "chapters"]);
        assert!(role_schema(AgentRole::Editor).is_none());
    }

    #[test]
    fn test_with_references() {
        let out = with_references("Write.".into(), &["Style: terse".into()]);
        assert!(out.contains("## Reference material"));
        assert!(out.ends_with("Style: terse\n"));
        assert_eq!(with_references("Write.".into(), &[]), "Write.");
    }
}
