//! Error types for ggufkit.
//!
//! Every pipeline stage returns [`Result`], so a failure carries enough
//! context (path, tool name, exit code, HTTP status) to be reported once by
//! the run report without re-logging at every layer.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the ggufkit library.
#[derive(Debug, Error)]
pub enum GgufkitError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("TOML error: {message}")]
    Toml {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("HuggingFace API returned {status} for {url}: {body}")]
    HubApi {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Upload failed for {repo_id}: {message}")]
    UploadFailed { repo_id: String, message: String },

    // External tool errors
    #[error("Failed to spawn {tool}: {message}")]
    ToolSpawn { tool: String, message: String },

    #[error("{tool} exited with status {}: {stderr_tail}", exit_code_label(.code))]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Run cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "<terminated by signal>".to_string())
}

/// Result type alias for ggufkit operations.
pub type Result<T> = std::result::Result<T, GgufkitError>;

impl From<std::io::Error> for GgufkitError {
    fn from(err: std::io::Error) -> Self {
        GgufkitError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for GgufkitError {
    fn from(err: serde_json::Error) -> Self {
        GgufkitError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<toml::de::Error> for GgufkitError {
    fn from(err: toml::de::Error) -> Self {
        GgufkitError::Toml {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for GgufkitError {
    fn from(err: reqwest::Error) -> Self {
        GgufkitError::Network {
            message: err.to_string(),
            cause: err.url().map(|u| u.to_string()),
        }
    }
}

impl GgufkitError {
    /// Create an IO error with a description of what was being done.
    pub fn io(action: &str, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        GgufkitError::Io {
            message: format!("{action}: {err}"),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Shorthand for a [`GgufkitError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        GgufkitError::Config {
            message: message.into(),
        }
    }
}
