//! RemoteTool: wraps an MCP server tool as a bond_types::Tool.

use crate::client::McpClient;
use crate::protocol::ToolDescriptor;
use bond_types::{Tool, ToolError, ToolFuture};
use std::sync::Arc;

/// A tool backed by an MCP server.
///
/// Each RemoteTool represents one tool from one MCP server. The namespaced name
/// follows the pattern `mcp__servername__toolname` to avoid collisions with
/// local tools or tools from other MCP servers.
pub struct RemoteTool {
    namespaced_name: String,
    description: String,
    descriptor: ToolDescriptor,
    client: Arc<McpClient>,
}

impl RemoteTool {
    pub fn new(descriptor: ToolDescriptor, client: Arc<McpClient>) -> Self {
        let server = client.name();
        Self {
            namespaced_name: namespaced_name(server, &descriptor.name),
            description: format!("[MCP: {}] {}", server, descriptor.description),
            descriptor,
            client,
        }
    }

    /// The tool's name on its server.
    pub fn remote_name(&self) -> &str {
        &self.descriptor.name
    }
}

/// `mcp__<server>__<tool>`
pub fn namespaced_name(server: &str, tool: &str) -> String {
    format!("mcp__{server}__{tool}")
}

impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.namespaced_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.descriptor.input_schema.clone()
    }

    fn execute(&self, input: serde_json::Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let result = self
                .client
                .call_tool(&self.descriptor.name, input)
                .await
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
            if result.is_error {
                return Err(ToolError::ExecutionFailed(result.text_output()));
            }
            Ok(result.text_output())
        })
    }
}
