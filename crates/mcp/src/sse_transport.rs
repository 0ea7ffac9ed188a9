//! Legacy HTTP+SSE transport for remote MCP servers.
//!
//! The client keeps one GET open as an event stream. The server announces a
//! POST endpoint with an `endpoint` event, then answers every POSTed request
//! with a `message` event on the stream. A background listener task owns the
//! stream and hands each response to the waiter registered under its id.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    futures::StreamExt,
    reqwest::{Client, Url},
    serde_json::Value,
    tokio::{
        sync::{Mutex, oneshot},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    registry::McpServerConfig,
    sse::{SseDecoder, SseEvent},
    traits::McpTransport,
    types::{JsonRpcMessage, JsonRpcResponse},
};

/// How long `close` waits for the listener task to wind down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// Event-stream transport with a negotiated POST endpoint.
pub struct SseTransport {
    server: String,
    client: Client,
    endpoint: Url,
    timeout: Duration,
    read_timeout: Duration,
    pending: PendingMap,
    cancel: CancellationToken,
    /// Set by the listener when it exits, for whatever reason.
    stream_closed: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Open the event stream and wait for the server's `endpoint` event.
    pub async fn connect(server: &str, config: &McpServerConfig) -> Result<Arc<Self>> {
        let base = Url::parse(&config.url)
            .map_err(|e| Error::config(format!("server '{server}' has invalid url: {e}")))?;
        let timeout = config.timeout();
        let client = Client::builder()
            .default_headers(config.header_map()?)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::connection(server, format!("failed to build HTTP client: {e}")))?;

        info!(server = %server, url = %base, "opening MCP event stream");

        let send = client
            .get(base.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send();
        let response = match tokio::time::timeout(timeout, send).await {
            Ok(result) => result
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| {
                    Error::connection(server, format!("failed to open event stream at '{base}': {e}"))
                })?,
            Err(_) => {
                return Err(Error::connection(
                    server,
                    format!("timed out opening event stream at '{base}'"),
                ));
            },
        };

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let stream_closed = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let listener = Listener {
            server: server.into(),
            base,
            pending: Arc::clone(&pending),
            cancel: cancel.clone(),
            stream_closed: stream_closed.clone(),
            ready: Some(ready_tx),
        };
        let handle = tokio::spawn(listener.run(response));

        let negotiated = match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::connection(
                server,
                "event stream closed before endpoint event",
            )),
            Err(_) => Err(Error::connection(
                server,
                format!("no endpoint event within {timeout:?}"),
            )),
        };
        let endpoint = match negotiated {
            Ok(endpoint) => endpoint,
            Err(e) => {
                cancel.cancel();
                handle.abort();
                return Err(e);
            },
        };

        info!(server = %server, endpoint = %endpoint, "MCP SSE endpoint negotiated");

        Ok(Arc::new(Self {
            server: server.into(),
            client,
            endpoint,
            timeout,
            read_timeout: config.sse_read_timeout(),
            pending,
            cancel,
            stream_closed,
            listener: Mutex::new(Some(handle)),
        }))
    }

    /// The URL requests are POSTed to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Whether the event stream has ended, so no response can arrive.
    pub fn is_stream_closed(&self) -> bool {
        self.stream_closed.is_cancelled()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::connection(&self.server, "transport is closed"));
        }
        if self.stream_closed.is_cancelled() {
            return Err(Error::connection(&self.server, "event stream closed"));
        }
        Ok(())
    }

    async fn post(&self, message: &JsonRpcMessage, method: &str) -> Result<()> {
        self.client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(message)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                Error::connection(
                    &self.server,
                    format!("POST to '{}' for '{method}' failed: {e}", self.endpoint),
                )
            })?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl McpTransport for SseTransport {
    async fn send_message(&self, message: JsonRpcMessage) -> Result<Option<JsonRpcResponse>> {
        self.ensure_open()?;

        let method = message.method().to_string();

        // Register before POSTing so a fast reply cannot outrun its waiter.
        let waiter = match message.id() {
            Some(id) => {
                let key = id.to_string();
                let (tx, rx) = oneshot::channel();
                let mut pending = self.pending.lock().await;
                // The listener marks the stream closed under this lock.
                self.ensure_open()?;
                pending.insert(key.clone(), tx);
                Some((key, rx))
            },
            None => None,
        };

        debug!(
            server = %self.server,
            method = %method,
            id = ?message.id(),
            "SSE client -> server"
        );

        if let Err(e) = self.post(&message, &method).await {
            if let Some((key, _)) = &waiter {
                self.pending.lock().await.remove(key);
            }
            return Err(e);
        }

        let Some((key, rx)) = waiter else {
            return Ok(None);
        };

        match tokio::time::timeout(self.read_timeout, rx).await {
            Ok(Ok(resp)) => Ok(Some(resp)),
            Ok(Err(_)) => Err(Error::connection(
                &self.server,
                format!("event stream closed while waiting for '{method}' response"),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&key);
                Err(Error::connection(
                    &self.server,
                    format!(
                        "timed out after {:?} waiting for '{method}' response",
                        self.read_timeout
                    ),
                ))
            },
        }
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        // Dropping the senders wakes every waiter with an error.
        self.pending.lock().await.clear();

        let Some(handle) = self.listener.lock().await.take() else {
            return Ok(());
        };
        let abort = handle.abort_handle();

        match tokio::time::timeout(CLOSE_TIMEOUT, handle).await {
            Ok(Ok(())) => {
                info!(server = %self.server, "MCP SSE transport closed");
                Ok(())
            },
            Ok(Err(e)) => Err(Error::connection(
                &self.server,
                format!("SSE listener failed: {e}"),
            )),
            Err(_) => {
                abort.abort();
                Err(Error::connection(
                    &self.server,
                    format!("SSE listener did not stop within {CLOSE_TIMEOUT:?}"),
                ))
            },
        }
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Background reader for one event stream.
struct Listener {
    server: String,
    base: Url,
    pending: PendingMap,
    cancel: CancellationToken,
    stream_closed: CancellationToken,
    /// Present until the endpoint is negotiated or startup fails.
    ready: Option<oneshot::Sender<Result<Url>>>,
}

impl Listener {
    async fn run(mut self, response: reqwest::Response) {
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let chunk = tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!(server = %self.server, "SSE listener cancelled");
                    break;
                },
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    let mut fatal = None;
                    for event in decoder.feed(&bytes) {
                        if let Err(e) = self.handle_event(event).await {
                            fatal = Some(e);
                            break;
                        }
                    }
                    if let Some(e) = fatal {
                        self.fail(e);
                        break;
                    }
                },
                Some(Err(e)) => {
                    self.fail(Error::connection(
                        &self.server,
                        format!("event stream error: {e}"),
                    ));
                    break;
                },
                None => {
                    if let Some(event) = decoder.finish()
                        && let Err(e) = self.handle_event(event).await
                    {
                        self.fail(e);
                    }
                    if self.ready.is_none() {
                        warn!(server = %self.server, "SSE event stream ended by server");
                    }
                    break;
                },
            }
        }

        if self.ready.is_some() {
            self.fail(Error::connection(
                &self.server,
                "event stream closed before endpoint event",
            ));
        }
        let mut pending = self.pending.lock().await;
        self.stream_closed.cancel();
        // Dropping the senders fails every in-flight request at once.
        pending.clear();
    }

    /// Report a failure to `connect` if it is still waiting; log it otherwise.
    fn fail(&mut self, error: Error) {
        match self.ready.take() {
            Some(ready) => {
                let _ = ready.send(Err(error));
            },
            None if !self.cancel.is_cancelled() => {
                warn!(server = %self.server, error = %error, "SSE listener stopped");
            },
            None => {},
        }
    }

    /// Route one event. An `Err` stops the listener.
    async fn handle_event(&mut self, event: SseEvent) -> Result<()> {
        match event.event.as_str() {
            "endpoint" => {
                let endpoint = resolve_endpoint(&self.server, &self.base, &event.data)?;
                match self.ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Ok(endpoint));
                    },
                    None => {
                        warn!(server = %self.server, endpoint = %endpoint, "ignoring repeated endpoint event");
                    },
                }
                Ok(())
            },
            "message" => {
                self.deliver(&event.data).await;
                Ok(())
            },
            other => {
                warn!(server = %self.server, event = %other, "ignoring unknown SSE event");
                Ok(())
            },
        }
    }

    async fn deliver(&self, data: &str) {
        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                warn!(server = %self.server, error = %e, "dropping malformed SSE message");
                return;
            },
        };

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            if method == "ping" {
                debug!(server = %self.server, "discarding server ping");
            } else {
                debug!(server = %self.server, method = %method, "ignoring server-initiated message");
            }
            return;
        }

        let resp: JsonRpcResponse = match serde_json::from_value(value) {
            Ok(resp) => resp,
            Err(e) => {
                warn!(server = %self.server, error = %e, "dropping SSE message that is not a response");
                return;
            },
        };

        let key = resp.id.to_string();
        debug!(server = %self.server, id = %key, "MCP server -> client");
        let waiter = self.pending.lock().await.remove(&key);
        match waiter {
            Some(tx) => {
                if tx.send(resp).is_err() {
                    debug!(server = %self.server, id = %key, "response waiter already gone");
                }
            },
            None => {
                warn!(server = %self.server, id = %key, "received response for unknown request id");
            },
        }
    }
}

/// Resolve an `endpoint` event against the stream URL and require the same origin.
fn resolve_endpoint(server: &str, base: &Url, data: &str) -> Result<Url> {
    let endpoint = base.join(data.trim()).map_err(|e| {
        Error::protocol(server, format!("invalid endpoint '{}': {e}", data.trim()))
    })?;
    if endpoint.origin() != base.origin() {
        return Err(Error::protocol(
            server,
            format!(
                "endpoint origin {} does not match connection origin {}",
                endpoint.origin().ascii_serialization(),
                base.origin().ascii_serialization()
            ),
        ));
    }
    Ok(endpoint)
}
