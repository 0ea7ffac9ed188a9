//! MCP client: manages the protocol handshake and capability operations with a single MCP server.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use {
    async_trait::async_trait,
    serde::de::DeserializeOwned,
    serde_json::{Value, json},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    registry::{McpServerConfig, TransportType},
    sse_transport::SseTransport,
    streamable_http::StreamableHttpTransport,
    traits::{McpClientTrait, McpTransport},
    types::{
        ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, JsonRpcMessage,
        JsonRpcNotification, JsonRpcRequest, McpPromptDef, McpResourceDef,
        McpResourceTemplateDef, McpToolDef, PROTOCOL_VERSION, PromptMessage, ResourceContents,
        ToolsCallParams, ToolsCallResult,
    },
};

/// Upper bound on `nextCursor` pages followed for one list call.
const MAX_PAGES: usize = 100;

/// State of an MCP client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpClientState {
    /// Transport open, handshake not yet complete.
    Connected,
    /// `initialize` completed, `initialized` notification sent.
    Ready,
    /// Connection was shut down.
    Closed,
}

/// An MCP client bound to one server over one transport.
pub struct McpClient {
    server_name: String,
    transport: Arc<dyn McpTransport>,
    next_id: AtomicU64,
    state: Mutex<McpClientState>,
    server_info: Option<InitializeResult>,
}

impl McpClient {
    /// Open the configured transport and perform the MCP handshake.
    pub async fn connect(server_name: &str, config: &McpServerConfig) -> Result<Self> {
        info!(
            server = %server_name,
            url = %config.url,
            transport = ?config.transport,
            "connecting to MCP server"
        );
        let transport: Arc<dyn McpTransport> = match config.transport {
            TransportType::Sse => SseTransport::connect(server_name, config).await?,
            TransportType::StreamableHttp => StreamableHttpTransport::new(server_name, config)?,
        };
        Self::with_transport(server_name, transport).await
    }

    /// Perform the handshake over an already-open transport.
    pub async fn with_transport(server_name: &str, transport: Arc<dyn McpTransport>) -> Result<Self> {
        let mut client = Self {
            server_name: server_name.into(),
            transport,
            next_id: AtomicU64::new(1),
            state: Mutex::new(McpClientState::Connected),
            server_info: None,
        };

        if let Err(e) = client.initialize().await {
            warn!(server = %server_name, error = %e, "MCP initialize handshake failed");
            if let Err(close_err) = client.transport.close().await {
                debug!(server = %server_name, error = %close_err, "transport close after failed handshake");
            }
            return Err(e);
        }
        Ok(client)
    }

    /// What the server reported during `initialize`.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "toolgate".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let request = self.next_request("initialize", Some(serde_json::to_value(&params)?));
        let response = self
            .transport
            .send_message(JsonRpcMessage::Request(request))
            .await
            .map_err(|e| self.handshake_error("initialize", e))?
            .ok_or_else(|| self.handshake_error("initialize", "no response"))?;

        if let Some(err) = response.error {
            return Err(self.handshake_error(
                "initialize",
                format!("code={} message={}", err.code, err.message),
            ));
        }

        let result: InitializeResult =
            serde_json::from_value(response.result.unwrap_or(Value::Null))
                .map_err(|e| self.handshake_error("initialize", format!("invalid result: {e}")))?;

        info!(
            server = %self.server_name,
            protocol = %result.protocol_version,
            remote = %result.server_info.name,
            "MCP server initialized"
        );
        self.server_info = Some(result);

        // Send `initialized` notification to complete handshake.
        self.transport
            .send_message(JsonRpcMessage::Notification(JsonRpcNotification::new(
                "notifications/initialized",
                None,
            )))
            .await
            .map_err(|e| self.handshake_error("notifications/initialized", e))?;
        self.set_state(McpClientState::Ready);

        Ok(())
    }

    fn handshake_error(&self, step: &str, cause: impl std::fmt::Display) -> Error {
        Error::connection(&self.server_name, format!("{step} handshake failed: {cause}"))
    }

    fn set_state(&self, state: McpClientState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn ensure_ready(&self) -> Result<()> {
        let state = self.state();
        if state != McpClientState::Ready {
            return Err(Error::connection(
                &self.server_name,
                format!("client is not ready (state: {state:?})"),
            ));
        }
        Ok(())
    }

    fn next_request(&self, method: &str, params: Option<Value>) -> JsonRpcRequest {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        JsonRpcRequest::new(id, method, params)
    }

    /// Send a request and return its `result`.
    ///
    /// `None` means the server answered with a capability-absent code.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Option<Value>> {
        self.ensure_ready()?;

        let request = self.next_request(method, params);
        debug!(server = %self.server_name, method = %method, id = %request.id, "client -> MCP server");

        let response = self
            .transport
            .send_message(JsonRpcMessage::Request(request))
            .await?
            .ok_or_else(|| Error::protocol(&self.server_name, format!("no response to '{method}'")))?;

        if let Some(err) = response.error {
            if err.is_capability_absent() {
                debug!(
                    server = %self.server_name,
                    method = %method,
                    code = err.code,
                    "capability not offered by server"
                );
                return Ok(None);
            }
            return Err(Error::Remote {
                server: self.server_name.clone(),
                method: method.into(),
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        Ok(Some(response.result.unwrap_or(Value::Null)))
    }

    /// Pull `field` out of a result, treating absence as empty.
    fn take_field<T: DeserializeOwned + Default>(
        &self,
        method: &str,
        result: Option<Value>,
        field: &str,
    ) -> Result<T> {
        let Some(mut result) = result else {
            return Ok(T::default());
        };
        match result.get_mut(field).map(Value::take) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                Error::protocol(
                    &self.server_name,
                    format!("invalid '{field}' in {method} result: {e}"),
                )
            }),
        }
    }

    /// Run a list method to exhaustion, following `nextCursor`.
    async fn list_all<T: DeserializeOwned>(&self, method: &str, field: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request(method, params).await?;
            let next = result
                .as_ref()
                .and_then(|r| r.get("nextCursor"))
                .and_then(Value::as_str)
                .map(String::from);

            let page: Vec<T> = self.take_field(method, result, field)?;
            items.extend(page);

            match next {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        debug!(
            server = %self.server_name,
            method = %method,
            count = items.len(),
            "fetched MCP capabilities"
        );
        Ok(items)
    }
}

#[async_trait]
impl McpClientTrait for McpClient {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn state(&self) -> McpClientState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        self.list_all("tools/list", "tools").await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult> {
        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };
        let result = self
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;

        let Some(result) = result else {
            return Ok(ToolsCallResult::default());
        };
        serde_json::from_value(result).map_err(|e| {
            Error::protocol(&self.server_name, format!("invalid tools/call result: {e}"))
        })
    }

    async fn list_resources(&self) -> Result<Vec<McpResourceDef>> {
        self.list_all("resources/list", "resources").await
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let result = self
            .request("resources/read", Some(json!({ "uri": uri })))
            .await?;
        self.take_field("resources/read", result, "contents")
    }

    async fn list_resource_templates(&self) -> Result<Vec<McpResourceTemplateDef>> {
        self.list_all("resources/templates/list", "resourceTemplates")
            .await
    }

    async fn list_prompts(&self) -> Result<Vec<McpPromptDef>> {
        self.list_all("prompts/list", "prompts").await
    }

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Vec<PromptMessage>> {
        let result = self
            .request(
                "prompts/get",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        self.take_field("prompts/get", result, "messages")
    }

    async fn close(&self) -> Result<()> {
        self.set_state(McpClientState::Closed);
        info!(server = %self.server_name, "closing MCP client");
        self.transport.close().await
    }
}
