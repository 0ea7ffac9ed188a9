//! Trait abstractions for MCP transport and client layers.
//!
//! The catalog only sees `McpClientTrait`, and `McpClient` only sees
//! `McpTransport`, so either side can be replaced with an in-memory fake.

use {async_trait::async_trait, serde_json::Value};

use crate::{
    client::McpClientState,
    error::Result,
    types::{
        JsonRpcMessage, JsonRpcResponse, McpPromptDef, McpResourceDef, McpResourceTemplateDef,
        McpToolDef, PromptMessage, ResourceContents, ToolsCallResult,
    },
};

/// Wire binding for JSON-RPC messages to one server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send one message.
    ///
    /// Requests resolve to their correlated response, error payloads included.
    /// Notifications resolve to `None` once the server accepted them.
    async fn send_message(&self, message: JsonRpcMessage) -> Result<Option<JsonRpcResponse>>;

    /// Tear down the connection. Errors during teardown are reported.
    async fn close(&self) -> Result<()>;
}

/// Typed capability operations against a single MCP server.
///
/// Capability-absent replies (`-32001`, `-32601`) produce empty results.
#[async_trait]
pub trait McpClientTrait: Send + Sync {
    /// The configured name of the connected server.
    fn server_name(&self) -> &str;

    /// Current connection state.
    fn state(&self) -> McpClientState;

    async fn list_tools(&self) -> Result<Vec<McpToolDef>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult>;

    async fn list_resources(&self) -> Result<Vec<McpResourceDef>>;

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>>;

    async fn list_resource_templates(&self) -> Result<Vec<McpResourceTemplateDef>>;

    async fn list_prompts(&self) -> Result<Vec<McpPromptDef>>;

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Vec<PromptMessage>>;

    /// Shut down the server connection.
    async fn close(&self) -> Result<()>;
}
