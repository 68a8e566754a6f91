//! Tool trait and related types.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, crate::ToolError>> + Send + 'a>>;

/// A tool definition as handed to a model provider.
///
/// `input_schema` is a JSON Schema object describing the tool's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Trait that all tools must implement.
///
/// Tools are named, schema-described callables a model can invoke. They live
/// in a local registry, or are backed by an external tool server.
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// The full definition (name, description, input schema).
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }

    /// Execute the tool with the given JSON input, producing text output.
    fn execute(&self, input: serde_json::Value) -> ToolFuture<'_>;
}

/// Build a simple object schema from `(name, type, description)` triples.
pub fn object_schema(properties: &[(&str, &str, &str)], required: &[&str]) -> serde_json::Value {
    let props: serde_json::Map<String, serde_json::Value> = properties
        .iter()
        .map(|(name, ty, description)| {
            (
                name.to_string(),
                serde_json::json!({ "type": ty, "description": description }),
            )
        })
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required,
    })
}
