use thiserror::Error;

#[derive(Debug, Error)]
pub enum InkflowError {
    // Graph errors
    #[error("Workflow graph contains a cycle through: {}", unresolved.join(", "))]
    CyclicGraph { unresolved: Vec<String> },

    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    // Node configuration errors
    #[error("Unsupported node kind '{kind}' on node {node_id}")]
    UnsupportedNodeKind { node_id: String, kind: String },

    #[error("No prompt configured for node {node_id} (role {role})")]
    MissingPromptConfiguration { node_id: String, role: String },

    #[error("Node {node_id} requires context key '{key}' which no earlier node produced")]
    MissingContext { node_id: String, key: String },

    // Generation errors
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Generation response parse error: {0}")]
    GenerationParse(String),

    // Tool errors
    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Content-card errors
    #[error("Content card not found: {0}")]
    CardNotFound(String),

    // Run control
    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, InkflowError>;
