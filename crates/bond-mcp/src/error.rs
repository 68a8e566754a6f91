//! Error types for MCP operations.

use thiserror::Error;

/// Errors from MCP server communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to start MCP server '{name}': {source}")]
    Startup {
        name: String,
        source: std::io::Error,
    },

    #[error("MCP server '{name}' is not running")]
    NotRunning { name: String },

    #[error("MCP server '{name}' is already running")]
    AlreadyRunning { name: String },

    #[error("Failed to write to MCP server '{name}': {source}")]
    Write {
        name: String,
        source: std::io::Error,
    },

    #[error("Failed to decode JSON-RPC message: {0}")]
    Decode(String),

    #[error("Request '{method}' to MCP server '{name}' timed out after {timeout_ms}ms")]
    Timeout {
        name: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    Server {
        server: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("MCP server '{name}' exited: {reason}")]
    ProcessExited { name: String, reason: String },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("Tool '{name}' not found in registry")]
    ToolNotFound { name: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the operation failed because no server connection is up.
    pub fn is_not_running(&self) -> bool {
        matches!(self, McpError::NotRunning { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }
}
