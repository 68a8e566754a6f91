//! Bond CLI: list and call tools on MCP servers or the built-in registry.

use anyhow::{Context, Result};
use bond_config::{BondConfig, CliOverrides};
use bond_mcp::{McpClient, McpServerConfig};
use bond_tools::ToolRegistry;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bond", version, about = "Talk to MCP tool servers")]
struct Cli {
    /// Config file to read instead of ~/.bond/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Per-request timeout in milliseconds (0 waits forever)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start each configured server and show what it advertises
    Servers,

    /// List tools from a server, or the built-in tools when no server is given
    Tools {
        /// Configured server to ask
        #[arg(long)]
        server: Option<String>,
    },

    /// Call a tool
    Call {
        /// Tool name
        tool: String,

        /// Configured server to call; the built-in tools are used otherwise
        #[arg(long)]
        server: Option<String>,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerReport {
    name: String,
    command: String,
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_info: Option<bond_mcp::Implementation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capabilities: Option<bond_mcp::ServerCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = BondConfig::load(CliOverrides {
        config_path: cli.config,
        timeout_ms: cli.timeout_ms,
    })
    .context("Failed to load configuration")?;

    match cli.command {
        Command::Servers => servers(&config).await,
        Command::Tools { server } => tools(&config, server.as_deref()).await,
        Command::Call { tool, server, args } => call(&config, server.as_deref(), &tool, &args).await,
    }
}

async fn servers(config: &BondConfig) -> Result<()> {
    let mut reports = Vec::new();
    for name in config.mcp.server_names() {
        let server_config = config.mcp.servers[name].clone();
        let command = server_config.command.clone();
        let client = McpClient::new(name, server_config);
        let report = match client.start().await {
            Ok(()) => {
                let report = ServerReport {
                    name: name.to_string(),
                    command,
                    state: client.state().to_string(),
                    protocol_version: client.protocol_version(),
                    server_info: client.server_info(),
                    capabilities: Some(client.capabilities()),
                    error: None,
                };
                stop(&client).await;
                report
            }
            Err(e) => ServerReport {
                name: name.to_string(),
                command,
                state: client.state().to_string(),
                protocol_version: None,
                server_info: None,
                capabilities: None,
                error: Some(e.to_string()),
            },
        };
        reports.push(report);
    }
    print_json(&reports)
}

async fn tools(config: &BondConfig, server: Option<&str>) -> Result<()> {
    let client = open_client(config, server).await?;
    let listed = client.list_all_tools().await;
    stop(&client).await;
    let listed = listed.with_context(|| format!("Failed to list tools of '{}'", client.name()))?;
    print_json(&listed)
}

async fn call(config: &BondConfig, server: Option<&str>, tool: &str, args: &str) -> Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args must be valid JSON")?;
    anyhow::ensure!(arguments.is_object(), "--args must be a JSON object");

    let client = open_client(config, server).await?;
    let result = client.call_tool(tool, arguments).await;
    stop(&client).await;
    let result = result.with_context(|| format!("Failed to call tool '{tool}'"))?;
    print_json(&result)?;
    if result.is_error {
        std::process::exit(1);
    }
    Ok(())
}

/// A started client for `server`, or an unstarted one that answers from the
/// built-in tools.
async fn open_client(config: &BondConfig, server: Option<&str>) -> Result<McpClient> {
    let registry = Arc::new(ToolRegistry::with_builtins());
    let Some(name) = server else {
        let local = McpServerConfig::new("builtin").with_timeout_ms(config.timeout_ms);
        return Ok(McpClient::with_registry("builtin", local, registry));
    };
    let server_config = config
        .server(name)
        .with_context(|| format!("Unknown MCP server '{name}'"))?
        .clone();
    let client = McpClient::with_registry(name, server_config, registry);
    client
        .start()
        .await
        .with_context(|| format!("Failed to start MCP server '{name}'"))?;
    Ok(client)
}

async fn stop(client: &McpClient) {
    if let Err(e) = client.stop().await {
        tracing::debug!("{}", e);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
