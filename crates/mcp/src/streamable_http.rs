//! Streamable HTTP transport for remote MCP servers.
//!
//! Every JSON-RPC message is one HTTP POST to the configured URL. The response
//! is either a JSON object or a short event stream carrying a single `message`
//! event. Session continuity uses the `Mcp-Session-Id` header.

use std::sync::Arc;

use {
    reqwest::{Client, Url},
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    registry::McpServerConfig,
    sse::parse_events,
    traits::McpTransport,
    types::{JsonRpcMessage, JsonRpcResponse, PROTOCOL_VERSION},
};

const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";
const STREAMABLE_ACCEPT_HEADER: &str = "application/json, text/event-stream";

/// POST-per-message transport for a remote MCP server.
pub struct StreamableHttpTransport {
    server: String,
    client: Client,
    url: Url,
    /// Session identifier issued by the server, echoed on every request.
    session_id: RwLock<Option<String>>,
}

impl StreamableHttpTransport {
    pub fn new(server: &str, config: &McpServerConfig) -> Result<Arc<Self>> {
        let url = Url::parse(&config.url)
            .map_err(|e| Error::config(format!("server '{server}' has invalid url: {e}")))?;
        let client = Client::builder()
            .default_headers(config.header_map()?)
            .connect_timeout(config.timeout())
            .timeout(config.sse_read_timeout())
            .build()
            .map_err(|e| Error::connection(server, format!("failed to build HTTP client: {e}")))?;

        Ok(Arc::new(Self {
            server: server.into(),
            client,
            url,
            session_id: RwLock::new(None),
        }))
    }

    /// The session id currently echoed to the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn build_post(&self) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, STREAMABLE_ACCEPT_HEADER)
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);

        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(MCP_SESSION_ID_HEADER, session_id);
        }
        req
    }

    async fn store_session_id_from_response(&self, response: &reqwest::Response) {
        let Some(raw) = response.headers().get(MCP_SESSION_ID_HEADER) else {
            return;
        };
        let Ok(session_id) = raw.to_str() else {
            return;
        };
        if session_id.trim().is_empty() {
            return;
        }

        let mut slot = self.session_id.write().await;
        let session_id = session_id.to_string();
        if slot.as_ref() != Some(&session_id) {
            debug!(
                server = %self.server,
                session_id = %session_id,
                "updated MCP streamable HTTP session id"
            );
            *slot = Some(session_id);
        }
    }

    /// Media type of the response without parameters, lowercased.
    fn content_type(resp: &reqwest::Response) -> String {
        resp.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|ct| ct.split(';').next())
            .map(|base| base.trim().to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn parse_event_stream_response(&self, body: &str, method: &str) -> Result<JsonRpcResponse> {
        let events = parse_events(body);
        if let Some(other) = events.iter().find(|e| e.event != "message") {
            return Err(Error::protocol(
                &self.server,
                format!("unexpected event '{}' in response to '{method}'", other.event),
            ));
        }
        let [event] = events.as_slice() else {
            return Err(Error::protocol(
                &self.server,
                format!(
                    "expected exactly one message event for '{method}', got {}",
                    events.len()
                ),
            ));
        };
        serde_json::from_str(&event.data).map_err(|e| {
            Error::protocol(
                &self.server,
                format!("invalid JSON-RPC response in event stream for '{method}': {e}"),
            )
        })
    }
}

#[async_trait::async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn send_message(&self, message: JsonRpcMessage) -> Result<Option<JsonRpcResponse>> {
        let method = message.method().to_string();
        debug!(
            server = %self.server,
            method = %method,
            id = ?message.id(),
            url = %self.url,
            "streamable HTTP client -> server"
        );

        let http_resp = self
            .build_post()
            .await
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                Error::connection(
                    &self.server,
                    format!("POST to '{}' for '{method}' failed: {e}", self.url),
                )
            })?;
        self.store_session_id_from_response(&http_resp).await;

        let status = http_resp.status();
        if !status.is_success() {
            let body = http_resp.text().await.unwrap_or_default();
            return Err(Error::connection(
                &self.server,
                format!("HTTP {status} for '{method}': {body}"),
            ));
        }

        let JsonRpcMessage::Request(request) = &message else {
            return Ok(None);
        };

        let content_type = Self::content_type(&http_resp);
        let body = http_resp.text().await.map_err(|e| {
            Error::connection(
                &self.server,
                format!("failed to read response body for '{method}': {e}"),
            )
        })?;

        if body.trim().is_empty() {
            return Ok(Some(JsonRpcResponse::empty(request.id.clone())));
        }

        let resp: JsonRpcResponse = match content_type.as_str() {
            "text/event-stream" => self.parse_event_stream_response(&body, &method)?,
            "application/json" => serde_json::from_str(&body).map_err(|e| {
                Error::protocol(
                    &self.server,
                    format!("invalid JSON-RPC response for '{method}': {e}"),
                )
            })?,
            other => {
                return Err(Error::protocol(
                    &self.server,
                    format!("unexpected content type '{other}' for '{method}'"),
                ));
            },
        };

        if !resp.id.is_null() && resp.id != request.id {
            return Err(Error::protocol(
                &self.server,
                format!(
                    "response id {} does not match request id {} for '{method}'",
                    resp.id, request.id
                ),
            ));
        }

        Ok(Some(resp))
    }

    async fn close(&self) -> Result<()> {
        let session_id = self.session_id.write().await.take();
        let Some(session_id) = session_id else {
            return Ok(());
        };

        let resp = self
            .client
            .delete(self.url.clone())
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(MCP_SESSION_ID_HEADER, session_id)
            .send()
            .await
            .map_err(|e| {
                Error::connection(&self.server, format!("failed to close MCP session: {e}"))
            })?;

        if !resp.status().is_success() {
            warn!(
                server = %self.server,
                status = %resp.status(),
                "server did not acknowledge MCP session close"
            );
        }
        Ok(())
    }
}
