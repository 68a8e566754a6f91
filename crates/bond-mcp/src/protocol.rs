//! Typed MCP payloads: handshake results, tool listings, and tool results.
//!
//! Servers are loosely typed on the wire; everything is decoded into these
//! types once, at the boundary. Tool results arrive in two shapes (camelCase
//! with nested resources, or snake_case with flat resource fields and a
//! `result` string) and both decode into [`ToolInvocationResult`].

use crate::error::McpError;
use bond_types::ToolDefinition;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Protocol version we request during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

fn default_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A tool as advertised by a server (or the local registry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(
        rename = "inputSchema",
        alias = "input_schema",
        default = "default_schema"
    )]
    pub input_schema: Value,
}

impl From<ToolDefinition> for ToolDescriptor {
    fn from(def: ToolDefinition) -> Self {
        Self {
            name: def.name,
            description: def.description,
            input_schema: def.input_schema,
        }
    }
}

/// One page of a `tools/list` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolList {
    pub tools: Vec<ToolDescriptor>,
    #[serde(
        rename = "nextCursor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_cursor: Option<String>,
}

/// Contents of an embedded resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(
        rename = "mimeType",
        alias = "mime_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// A content item in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: ResourceContents,
    },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentItem::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Every field either content shape may carry.
#[derive(Deserialize)]
struct WireContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    resource: Option<ResourceContents>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    blob: Option<String>,
}

impl TryFrom<WireContent> for ContentItem {
    type Error = String;

    fn try_from(wire: WireContent) -> Result<Self, Self::Error> {
        let missing = |field: &str| format!("{} content is missing '{field}'", wire.kind);
        match wire.kind.as_str() {
            "text" => Ok(ContentItem::Text {
                text: wire.text.clone().ok_or_else(|| missing("text"))?,
            }),
            "image" | "audio" => {
                let data = wire.data.clone().ok_or_else(|| missing("data"))?;
                let mime_type = wire.mime_type.clone().ok_or_else(|| missing("mimeType"))?;
                Ok(if wire.kind == "image" {
                    ContentItem::Image { data, mime_type }
                } else {
                    ContentItem::Audio { data, mime_type }
                })
            }
            "resource" => {
                if let Some(resource) = wire.resource {
                    return Ok(ContentItem::Resource { resource });
                }
                // Flat form: resource fields sit next to `type`.
                let uri = wire.uri.clone().ok_or_else(|| missing("uri"))?;
                Ok(ContentItem::Resource {
                    resource: ResourceContents {
                        uri,
                        mime_type: wire.mime_type,
                        text: wire.text,
                        blob: wire.blob,
                    },
                })
            }
            other => Err(format!("unsupported content type '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for ContentItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireContent::deserialize(deserializer)?;
        ContentItem::try_from(wire).map_err(serde::de::Error::custom)
    }
}

/// The outcome of a `tools/call`, whichever shape the server used.
///
/// `text` holds the text when the result is exactly one text item.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationResult {
    pub content: Vec<ContentItem>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Deserialize)]
struct WireToolResult {
    #[serde(default)]
    content: Option<Vec<ContentItem>>,
    #[serde(default, rename = "isError", alias = "is_error")]
    is_error: Option<bool>,
    #[serde(default)]
    result: Option<Value>,
}

impl From<WireToolResult> for ToolInvocationResult {
    fn from(wire: WireToolResult) -> Self {
        let mut content = wire.content.unwrap_or_default();
        if content.is_empty() {
            match wire.result {
                Some(Value::String(text)) => content.push(ContentItem::Text { text }),
                Some(Value::Null) | None => {}
                Some(other) => content.push(ContentItem::Text {
                    text: other.to_string(),
                }),
            }
        }
        ToolInvocationResult::new(content, wire.is_error.unwrap_or(false))
    }
}

impl<'de> Deserialize<'de> for ToolInvocationResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        WireToolResult::deserialize(deserializer).map(Into::into)
    }
}

impl ToolInvocationResult {
    pub fn new(content: Vec<ContentItem>, is_error: bool) -> Self {
        let text = match content.as_slice() {
            [ContentItem::Text { text }] => Some(text.clone()),
            _ => None,
        };
        Self {
            content,
            is_error,
            text,
        }
    }

    /// A successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![ContentItem::text(text)], false)
    }

    /// A failed single-text result.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(vec![ContentItem::text(text)], true)
    }

    /// All text items joined by newlines.
    pub fn text_output(&self) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        self.content
            .iter()
            .filter_map(ContentItem::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn from_value(value: Value) -> Result<Self, McpError> {
        serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    #[serde(default)]
    pub subscribe: bool,
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

/// Features a server advertises during `initialize`. Unknown members are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

impl ServerCapabilities {
    /// What we assume when no server has been asked.
    pub fn fallback() -> Self {
        Self {
            tools: Some(ToolsCapability { list_changed: true }),
            ..Self::default()
        }
    }

    pub fn supports_tools(&self) -> bool {
        self.tools.is_some()
    }
}

/// Name and version of a client or server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// The `initialize` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}
