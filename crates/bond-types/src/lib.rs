//! Shared tool types and error hierarchy for Bond.

pub mod error;
pub mod tool;

pub use error::{ConfigError, ToolError};
pub use tool::*;
