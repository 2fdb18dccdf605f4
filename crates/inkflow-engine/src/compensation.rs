//! Field compensation for schema-validated agent output.
//!
//! Generation may return JSON with required fields missing, wrapped in code
//! fences, or cut off mid-object. This module recovers what it can and fills
//! the gaps with best-effort defaults, recording every fill so the run can
//! surface it as a warning.

use serde_json::{Map, Value};

use inkflow_core::types::OutputSchema;

use crate::context::ExecutionContext;
use crate::graph::AgentRole;
use crate::prompts::project_name;

/// Chapter count used when neither the outline nor the seed gives one.
pub const DEFAULT_CHAPTER_COUNT: usize = 10;

/// One synthesized field.
#[derive(Debug, Clone, PartialEq)]
pub struct Compensation {
    pub field: String,
    pub message: String,
}

impl Compensation {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Recover a JSON object from generated text.
pub fn extract_json(text: &str) -> Option<Value> {
    let stripped = strip_code_fences(text);
    let candidate = match (stripped.find('{'), stripped.rfind('}')) {
        (Some(start), Some(end)) if end > start => &stripped[start..=end],
        (Some(start), _) => &stripped[start..],
        _ => return None,
    };

    if let Ok(value @ Value::Object(_)) = serde_json::from_str(candidate) {
        return Some(value);
    }
    match serde_json::from_str(&balance_braces(candidate)) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

pub(crate) fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // Skip the language tag line
        let content_start = after.find('\n').map_or(0, |p| p + 1);
        let after = &after[content_start..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    trimmed.to_string()
}

/// Close any braces and brackets left open by truncated output.
fn balance_braces(text: &str) -> String {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => closers.push('}'),
            '[' if !in_string => closers.push(']'),
            '}' | ']' if !in_string => {
                closers.pop();
            }
            _ => {}
        }
    }

    let mut out = text.trim_end().trim_end_matches(',').to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = closers.pop() {
        out.push(closer);
    }
    out
}

/// Fill missing required fields of `value` for `role`.
///
/// Returns the repaired object and the list of fills applied. A non-object
/// value is replaced by an empty object before filling.
pub fn compensate(
    role: AgentRole,
    schema: &OutputSchema,
    value: Value,
    ctx: &ExecutionContext,
) -> (Value, Vec<Compensation>) {
    let mut applied = Vec::new();
    let mut object = match value {
        Value::Object(map) => map,
        _ => {
            applied.push(Compensation::new("$", "output was not a JSON object"));
            Map::new()
        }
    };

    if role == AgentRole::OutlineGenerator {
        compensate_outline(&mut object, ctx, &mut applied);
    }

    let properties = schema.schema.get("properties");
    for field in schema.required_fields() {
        if is_present(object.get(field)) {
            continue;
        }
        let kind = properties
            .and_then(|p| p.get(field))
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("string");
        object.insert(field.to_string(), empty_of(kind));
        applied.push(Compensation::new(field, format!("missing '{}', using empty {}", field, kind)));
    }

    (Value::Object(object), applied)
}

fn compensate_outline(object: &mut Map<String, Value>, ctx: &ExecutionContext, applied: &mut Vec<Compensation>) {
    if !is_present(object.get("title")) {
        let title = project_name(ctx);
        applied.push(Compensation::new("title", format!("missing title, using project name '{}'", title)));
        object.insert("title".into(), Value::String(title));
    }

    let has_chapters = matches!(object.get("chapters"), Some(Value::Array(items)) if !items.is_empty());
    if !has_chapters {
        let count = ctx.target_chapters().filter(|&n| n > 0).unwrap_or(DEFAULT_CHAPTER_COUNT);
        applied.push(Compensation::new(
            "chapters",
            format!("missing chapter list, using {} placeholder chapters", count),
        ));
        let placeholders = (1..=count)
            .map(|n| serde_json::json!({ "number": n, "name": format!("Chapter {}", n), "plot": "" }))
            .collect();
        object.insert("chapters".into(), Value::Array(placeholders));
        return;
    }
    let Some(Value::Array(chapters)) = object.get_mut("chapters") else {
        return;
    };

    for (i, chapter) in chapters.iter_mut().enumerate() {
        let position = i + 1;
        if !chapter.is_object() {
            *chapter = Value::Object(Map::new());
        }
        let Some(entry) = chapter.as_object_mut() else {
            continue;
        };
        if !entry.get("number").is_some_and(Value::is_u64) {
            entry.insert("number".into(), Value::from(position));
            applied.push(Compensation::new(
                format!("chapters[{}].number", i),
                format!("missing chapter number, using {}", position),
            ));
        }
        if !is_present(entry.get("name")) {
            entry.insert("name".into(), Value::String(format!("Chapter {}", position)));
            applied.push(Compensation::new(
                format!("chapters[{}].name", i),
                format!("missing chapter name, using 'Chapter {}'", position),
            ));
        }
        if !entry.contains_key("plot") {
            entry.insert("plot".into(), Value::String(String::new()));
            applied.push(Compensation::new(format!("chapters[{}].plot", i), "missing chapter plot"));
        }
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn empty_of(kind: &str) -> Value {
    match kind {
        "array" => Value::Array(vec![]),
        "object" => Value::Object(Map::new()),
        "integer" | "number" => Value::from(0),
        "boolean" => Value::Bool(false),
        _ => Value::String(String::new()),
    }
}
