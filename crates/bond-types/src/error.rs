//! Error hierarchy for Bond.

use thiserror::Error;

/// Errors from tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Tool with name '{name}' already registered")]
    AlreadyRegistered { name: String },

    #[error("Invalid input for tool '{tool}': {message}")]
    InvalidInput { tool: String, message: String },

    #[error("Missing required parameter: {param}")]
    MissingParameter { param: String },

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool handler not implemented")]
    NotImplemented,
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
