//! Error types callers need to tell apart.
//!
//! Most orchestration code returns `anyhow::Result`. The enums here cover
//! the places where the kind of failure changes behaviour: a missing tool
//! versus a failing one, a corrupt record versus an I/O error, and a
//! language-model failure that ends an agent turn.

use thiserror::Error;

/// Failures of the file-backed stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("corrupt index log {path} at line {line}: {reason}")]
    CorruptLog {
        path: String,
        line: usize,
        reason: String,
    },
}

impl StoreError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn json(path: impl AsRef<std::path::Path>, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Failures of [`ToolRegistry::invoke`](crate::tools::ToolRegistry::invoke).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),
    #[error("Tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },
}

/// Failures of a [`LanguageModel`](crate::llm::LanguageModel) call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),
    #[error("request to language model failed: {0}")]
    Transport(String),
    #[error("language model API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("language model returned no text")]
    EmptyResponse,
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Transport(e.to_string())
    }
}
