//! Closure-backed tool.

use bond_types::{Tool, ToolError, ToolFuture};
use std::sync::Arc;

type Handler = Arc<dyn Fn(&serde_json::Value) -> Result<String, ToolError> + Send + Sync>;

/// A tool whose behavior is a plain closure over its JSON arguments.
///
/// Input is checked before the handler runs: it must be a JSON object and
/// contain every property listed under the schema's `required` array.
pub struct FunctionTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    handler: Option<Handler>,
}

impl FunctionTool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<String, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Some(Arc::new(handler)),
        }
    }

    /// A tool with a definition but no behavior. Executing it always fails.
    pub fn unimplemented(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: None,
        }
    }

    fn validate(&self, input: &serde_json::Value) -> Result<(), ToolError> {
        let object = input.as_object().ok_or_else(|| ToolError::InvalidInput {
            tool: self.name.clone(),
            message: "arguments must be a JSON object".to_string(),
        })?;
        let required = self
            .schema
            .get("required")
            .and_then(|r| r.as_array())
            .into_iter()
            .flatten()
            .filter_map(|r| r.as_str());
        for param in required {
            if !object.contains_key(param) {
                return Err(ToolError::MissingParameter {
                    param: param.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn execute(&self, input: serde_json::Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let handler = self.handler.as_ref().ok_or(ToolError::NotImplemented)?;
            self.validate(&input)?;
            handler(&input)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bond_types::object_schema;

    fn echo() -> FunctionTool {
        FunctionTool::new(
            "echo",
            "Echo back the input",
            object_schema(&[("text", "string", "Text to echo")], &["text"]),
            |params| Ok(params["text"].as_str().unwrap_or_default().to_string()),
        )
    }

    #[tokio::test]
    async fn runs_handler() {
        let out = echo()
            .execute(serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn missing_required_parameter() {
        let err = echo().execute(serde_json::json!({})).await.unwrap_err();
        match err {
            ToolError::MissingParameter { param } => assert_eq!(param, "text"),
            other => panic!("Expected MissingParameter, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_object_input_rejected() {
        let err = echo().execute(serde_json::json!("text")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn handler_error_propagates() {
        let tool = FunctionTool::new("fail", "Always fails", object_schema(&[], &[]), |_| {
            Err(ToolError::ExecutionFailed("boom".into()))
        });
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool execution failed: boom");
    }

    #[tokio::test]
    async fn unimplemented_tool_fails() {
        let tool = FunctionTool::unimplemented("todo", "Not yet", object_schema(&[], &[]));
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotImplemented));
    }
}
