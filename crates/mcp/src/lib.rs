//! MCP (Model Context Protocol) gateway for toolgate.
//!
//! This crate provides:
//! - JSON-RPC 2.0 client with the MCP handshake and typed operations (`client`)
//! - Legacy HTTP+SSE transport with a background listener (`sse_transport`)
//! - Streamable HTTP transport with session continuity (`streamable_http`)
//! - A name-deduplicated catalog over every connected server (`catalog`)
//! - The process-facing manager facade (`manager`)
//! - Server configuration loading (`registry`)

pub mod catalog;
pub mod client;
pub mod error;
pub mod manager;
pub mod registry;
pub mod sse;
pub mod sse_transport;
pub mod streamable_http;
pub mod traits;
pub mod types;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test_support;

pub use {
    catalog::{CatalogOptions, McpCatalog, ToolAction, ToolActionKind, ToolInfo},
    client::{McpClient, McpClientState},
    error::{Error, Result},
    manager::McpManager,
    registry::{McpRegistry, McpServerConfig, TransportType},
    sse_transport::SseTransport,
    streamable_http::StreamableHttpTransport,
    traits::{McpClientTrait, McpTransport},
    types::ToolContent,
};
