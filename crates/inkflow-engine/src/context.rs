use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known context keys.
pub mod keys {
    pub const PROJECT_NAME: &str = "projectName";
    pub const GENRE: &str = "genre";
    pub const TARGET_CHAPTERS: &str = "targetChapters";
    pub const WORDS_PER_CHAPTER: &str = "wordsPerChapter";
    pub const CHAPTER_TONES: &str = "chapterTones";
    pub const SOURCE_MATERIAL: &str = "sourceMaterial";
    pub const COORDINATOR: &str = "coordinatorData";
    pub const OUTLINE: &str = "outlineData";
    pub const WORLD: &str = "worldData";
    pub const CHARACTERS: &str = "characterData";
    pub const REVIEWER: &str = "reviewerResult";
    pub const QUALITY_EVALUATION: &str = "qualityEvaluationResult";
    pub const EDITOR: &str = "editorResult";
    pub const CHAPTER_SUMMARY: &str = "chapterSummary";
    pub const CHAPTERS: &str = "chapters";
    pub const CHAPTER_SUMMARIES: &str = "chapterSummaries";
    pub const CURRENT_CHAPTER: &str = "currentChapter";
}

/// Ordered chapter plan produced by the outline generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub chapters: Vec<ChapterOutline>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterOutline {
    #[serde(default)]
    pub number: usize,
    #[serde(default)]
    pub name: String,
    /// Core plot of the chapter.
    #[serde(default)]
    pub plot: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub number: usize,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub number: usize,
    pub summary: String,
}

/// Key-value store threaded through a single run.
///
/// Seeded with project metadata, then extended by each handler under its
/// role's key. Keys only change when a handler writes them explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    data: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a JSON object. Any other value yields an empty context.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self {
                data: map.into_iter().collect(),
            },
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), Value::String(value.into()));
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    // -- Project metadata --

    pub fn project_name(&self) -> Option<&str> {
        self.get_str(keys::PROJECT_NAME)
    }

    pub fn target_chapters(&self) -> Option<usize> {
        self.get(keys::TARGET_CHAPTERS).and_then(as_count)
    }

    /// Per-project words-per-chapter override, else `default`.
    pub fn words_per_chapter(&self, default: usize) -> usize {
        self.get(keys::WORDS_PER_CHAPTER)
            .and_then(as_count)
            .filter(|&n| n > 0)
            .unwrap_or(default)
    }

    /// Tone constraint for a chapter, from `chapterTones` keyed by chapter number.
    pub fn chapter_tone(&self, number: usize) -> Option<&str> {
        let tones = self.get(keys::CHAPTER_TONES)?;
        match tones {
            Value::Object(map) => map.get(&number.to_string()).and_then(|v| v.as_str()),
            // Arrays are 1-indexed by chapter
            Value::Array(items) => number
                .checked_sub(1)
                .and_then(|i| items.get(i))
                .and_then(|v| v.as_str()),
            _ => None,
        }
    }

    // -- Source material from data nodes --

    pub fn source_material(&self) -> Vec<String> {
        self.list(keys::SOURCE_MATERIAL)
    }

    pub fn push_source_material(&mut self, text: impl Into<String>) {
        self.push(keys::SOURCE_MATERIAL, Value::String(text.into()));
    }

    // -- Outline --

    pub fn outline(&self) -> Option<Outline> {
        self.get(keys::OUTLINE)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_outline(&mut self, outline: &Outline) {
        self.set_typed(keys::OUTLINE, outline);
    }

    // -- Chapters --

    pub fn chapters(&self) -> Vec<Chapter> {
        self.list(keys::CHAPTERS)
    }

    pub fn push_chapter(&mut self, chapter: &Chapter) {
        if let Ok(value) = serde_json::to_value(chapter) {
            self.push(keys::CHAPTERS, value);
        }
    }

    pub fn chapter_summaries(&self) -> Vec<ChapterSummary> {
        self.list(keys::CHAPTER_SUMMARIES)
    }

    pub fn push_chapter_summary(&mut self, summary: &ChapterSummary) {
        if let Ok(value) = serde_json::to_value(summary) {
            self.push(keys::CHAPTER_SUMMARIES, value);
        }
    }

    /// Reset chapter output before a chapter writer starts.
    pub fn clear_chapters(&mut self) {
        self.set(keys::CHAPTERS, Value::Array(vec![]));
        self.set(keys::CHAPTER_SUMMARIES, Value::Array(vec![]));
    }

    /// Latest single-chapter summary written by the summarizer role.
    pub fn chapter_summary(&self) -> Option<&str> {
        self.get_str(keys::CHAPTER_SUMMARY)
    }

    pub fn editor_result(&self) -> Option<&str> {
        self.get_str(keys::EDITOR)
    }

    fn set_typed<T: Serialize>(&mut self, key: &str, value: &T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.set(key, value);
        }
    }

    fn push(&mut self, key: &str, value: Value) {
        match self.data.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                self.data.insert(key.to_string(), Value::Array(vec![value]));
            }
        }
    }

    fn list<T: serde::de::DeserializeOwned>(&self, key: &str) -> Vec<T> {
        match self.data.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect(),
            _ => vec![],
        }
    }
}

fn as_count(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
