//! MCP (Model Context Protocol) client engine for Bond.
//!
//! Talks to stdio-based MCP servers over newline-delimited JSON-RPC 2.0. Each
//! server runs as a child process; many requests may be in flight at once and
//! are matched to their responses by id. Server notifications are routed to
//! registered handlers, capabilities are negotiated at startup, and tools are
//! listed and invoked through a façade that falls back to a local registry
//! when no server is running.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod jsonrpc;
pub mod manager;
mod pending;
pub mod protocol;
pub mod tool;
mod transport;

pub use client::{ClientState, McpClient, TOOLS_LIST_CHANGED};
pub use config::{McpConfig, McpServerConfig};
pub use dispatch::HandlerRegistry;
pub use error::McpError;
pub use jsonrpc::{JsonRpcError, Notification, Outcome, RequestId, Response};
pub use manager::McpManager;
pub use protocol::{
    ContentItem, Implementation, ServerCapabilities, ToolDescriptor, ToolInvocationResult,
    ToolList,
};
pub use tool::RemoteTool;
pub use transport::TransportIo;
