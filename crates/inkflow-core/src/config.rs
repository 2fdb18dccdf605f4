use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{InkflowError, Result};

/// Top-level inkflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Named prompt templates referenced by agent nodes.
    #[serde(default)]
    pub prompts: HashMap<String, String>,
    #[serde(default)]
    pub log: Option<LogConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Model used by image tool nodes.
    #[serde(default)]
    pub image_model: Option<String>,
    /// Model used by audio tool nodes.
    #[serde(default)]
    pub speech_model: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 8192 }
fn default_temperature() -> f32 { 0.7 }

/// Retry configuration for generation requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Engine behaviour knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Soft per-chapter length target; generation is asked to stay within ±20%.
    #[serde(default = "default_words_per_chapter")]
    pub words_per_chapter: usize,
    /// Stand-in for the previous chapter summary before chapter 1.
    #[serde(default = "default_first_chapter_placeholder")]
    pub first_chapter_placeholder: String,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Command prefix for script tool nodes; the script text is passed as the final argument.
    #[serde(default = "default_script_command")]
    pub script_command: Vec<String>,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            words_per_chapter: default_words_per_chapter(),
            first_chapter_placeholder: default_first_chapter_placeholder(),
            tool_timeout_secs: default_tool_timeout(),
            script_command: default_script_command(),
            event_capacity: default_event_capacity(),
            workspace: default_workspace(),
        }
    }
}

fn default_words_per_chapter() -> usize { 3000 }
fn default_first_chapter_placeholder() -> String {
    "This is the first chapter; there is no previous chapter.".to_string()
}
fn default_tool_timeout() -> u64 { 60 }
fn default_script_command() -> Vec<String> { vec!["python3".to_string(), "-c".to_string()] }
fn default_event_capacity() -> usize { 256 }
fn default_workspace() -> String { "~/.inkflow".to_string() }

/// JSONL run logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: <workspace>/logs
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Logging level: 1 = run summary only, 2 = per-step, 3 = steps + warnings + chapters.
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
            level: 2,
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_level() -> u8 { 2 }

/// Version history and checkpoint storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. Default: <workspace>/inkflow.db
    #[serde(default)]
    pub database: Option<String>,
    /// Persist a checkpoint after every completed node so runs can resume.
    #[serde(default = "default_checkpoints")]
    pub checkpoints: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: None,
            checkpoints: default_checkpoints(),
        }
    }
}

fn default_checkpoints() -> bool { true }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| InkflowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| InkflowError::Config(e.to_string()))
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        expand_home(&self.engine.workspace)
    }

    /// Resolve the SQLite database path.
    pub fn database_path(&self) -> PathBuf {
        match &self.storage.database {
            Some(path) => expand_home(path),
            None => self.workspace_dir().join("inkflow.db"),
        }
    }

    /// Resolve the run log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.log
            .as_ref()
            .and_then(|l| l.log_dir.as_deref())
            .map(expand_home)
            .unwrap_or_else(|| self.workspace_dir().join("logs"))
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_INKFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_INKFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_INKFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_INKFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_INKFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "gpt-4o-mini"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.engine.words_per_chapter, 3000);
        assert_eq!(config.engine.tool_timeout_secs, 60);
        assert_eq!(config.engine.script_command, vec!["python3", "-c"]);
        assert!(config.prompts.is_empty());
        assert!(config.log.is_none());
        assert!(config.storage.checkpoints);
        assert!(config.fallback_models.is_empty());
    }

    #[test]
    fn test_named_prompts_and_storage() {
        let toml_str = r#"
[model]
model_id = "gpt-4o"

[prompts]
noir_outline = "Outline a noir novel called {{projectName}}."

[storage]
database = "/tmp/inkflow-test.db"
checkpoints = false

[log]
level = 3
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.prompts["noir_outline"].contains("{{projectName}}"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/inkflow-test.db"));
        assert!(!config.storage.checkpoints);
        let log = config.log.unwrap();
        assert!(log.enabled);
        assert_eq!(log.level, 3);
    }
}
