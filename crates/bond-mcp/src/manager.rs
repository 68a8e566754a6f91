//! MCP manager: orchestrates multiple MCP server connections.

use crate::client::McpClient;
use crate::config::McpConfig;
use crate::protocol::ToolDescriptor;
use crate::tool::RemoteTool;
use bond_tools::ToolRegistry;
use std::sync::Arc;

/// Manages connections to multiple MCP servers.
pub struct McpManager {
    clients: Vec<Arc<McpClient>>,
    tools: Vec<(Arc<McpClient>, ToolDescriptor)>,
}

impl McpManager {
    /// Start all configured MCP servers, in name order, and discover their tools.
    ///
    /// Servers that fail to start are logged and skipped; the rest stay usable.
    pub async fn start(config: &McpConfig) -> Self {
        let mut clients = Vec::new();
        let mut tools = Vec::new();

        for name in config.server_names() {
            let server_config = config.servers[name].clone();
            let client = match McpClient::connect(name, server_config).await {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    tracing::warn!("Failed to start MCP server '{}': {}", name, e);
                    continue;
                }
            };
            match client.list_all_tools().await {
                Ok(list) => {
                    tracing::info!("MCP server '{}' started ({} tools)", name, list.len());
                    tools.extend(list.into_iter().map(|t| (Arc::clone(&client), t)));
                }
                Err(e) => tracing::warn!("Failed to list tools of MCP server '{}': {}", name, e),
            }
            clients.push(client);
        }

        Self { clients, tools }
    }

    /// All discovered tools, paired with the client that serves them.
    pub fn tools(&self) -> &[(Arc<McpClient>, ToolDescriptor)] {
        &self.tools
    }

    /// Look up a connected server by name.
    pub fn client(&self, name: &str) -> Option<&Arc<McpClient>> {
        self.clients.iter().find(|c| c.name() == name)
    }

    /// Number of connected servers.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Connected servers and their tool counts.
    pub fn server_summary(&self) -> Vec<(&str, usize)> {
        self.clients
            .iter()
            .map(|c| {
                let count = self
                    .tools
                    .iter()
                    .filter(|(owner, _)| Arc::ptr_eq(owner, c))
                    .count();
                (c.name(), count)
            })
            .collect()
    }

    /// Register every discovered tool as a [`RemoteTool`]. Returns how many
    /// were registered.
    pub fn register_tools(&self, registry: &ToolRegistry) -> usize {
        for (client, descriptor) in &self.tools {
            registry.insert(Arc::new(RemoteTool::new(
                descriptor.clone(),
                Arc::clone(client),
            )));
        }
        self.tools.len()
    }

    /// Stop every connected server.
    pub async fn shutdown(self) {
        for client in &self.clients {
            if let Err(e) = client.stop().await {
                tracing::debug!("MCP server '{}' was not running at shutdown: {}", client.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::McpServerConfig;

    #[tokio::test]
    async fn empty_config_starts_no_servers() {
        let manager = McpManager::start(&McpConfig::default()).await;
        assert_eq!(manager.client_count(), 0);
        assert!(manager.tools().is_empty());
        assert!(manager.server_summary().is_empty());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn failed_server_is_skipped() {
        let mut config = McpConfig::default();
        config.servers.insert(
            "bad".to_string(),
            McpServerConfig::new("nonexistent_command_xyz123").with_timeout_ms(1000),
        );
        let manager = McpManager::start(&config).await;
        assert_eq!(manager.client_count(), 0);
        assert!(manager.client("bad").is_none());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn register_tools_with_no_servers() {
        let manager = McpManager::start(&McpConfig::default()).await;
        let registry = ToolRegistry::new();
        assert_eq!(manager.register_tools(&registry), 0);
        assert!(registry.is_empty());
    }
}
