#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests for the SSE transport against an in-process MCP server.

use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Json, Router,
        extract::State,
        http::StatusCode,
        response::sse::{Event, Sse},
        routing::{get, post},
    },
    futures::Stream,
    serde_json::{Value, json},
    tokio::{
        net::TcpListener,
        sync::{Mutex, mpsc},
    },
    tokio_stream::{StreamExt, wrappers::UnboundedReceiverStream},
};

use toolgate_mcp::{
    CatalogOptions, Error, McpClient, McpClientTrait, McpManager, McpRegistry, McpServerConfig,
    McpTransport, SseTransport, ToolContent, TransportType,
    types::{JsonRpcMessage, JsonRpcRequest},
};

/// A tiny MCP server speaking the legacy SSE transport.
struct FakeServer {
    events: mpsc::UnboundedSender<Event>,
    stream: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    posts: Mutex<Vec<Value>>,
}

impl FakeServer {
    fn push(&self, message: Value) {
        let _ = self
            .events
            .send(Event::default().event("message").data(message.to_string()));
    }
}

async fn sse_handler(
    State(server): State<Arc<FakeServer>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = server.stream.lock().await.take().expect("one event stream per server");
    Sse::new(UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>))
}

async fn messages_handler(
    State(server): State<Arc<FakeServer>>,
    Json(body): Json<Value>,
) -> StatusCode {
    server.posts.lock().await.push(body.clone());

    let Some(id) = body.get("id").cloned() else {
        return StatusCode::ACCEPTED;
    };
    let method = body["method"].as_str().unwrap_or_default();

    // Traffic that must never reach the waiter: a ping reusing the id, a
    // response for an id nobody asked for, and an event name we do not model.
    server.push(json!({"jsonrpc": "2.0", "id": id, "method": "ping"}));
    server.push(json!({"jsonrpc": "2.0", "id": 999, "result": {"stray": true}}));
    let _ = server.events.send(Event::default().event("noise").data("x"));

    let reply = match method {
        "initialize" => json!({"result": {
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "fake-sse", "version": "1.0"}
        }}),
        "tools/list" => json!({"result": {"tools": [{
            "name": "add",
            "description": "Add two numbers",
            "inputSchema": {
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                "required": ["a", "b"]
            }
        }]}}),
        "tools/call" => {
            let args = &body["params"]["arguments"];
            let sum = args["a"].as_i64().unwrap_or_default() + args["b"].as_i64().unwrap_or_default();
            json!({"result": {"content": [{"type": "text", "text": sum.to_string()}]}})
        },
        // Never answered, for timeout tests.
        "slow" => return StatusCode::ACCEPTED,
        _ => json!({"error": {"code": -32601, "message": "Method not found"}}),
    };

    let mut response = json!({"jsonrpc": "2.0", "id": id});
    if let (Some(target), Some(source)) = (response.as_object_mut(), reply.as_object()) {
        target.extend(source.clone());
    }
    server.push(response);
    StatusCode::ACCEPTED
}

/// Start a fake server whose first event announces `endpoint`.
async fn start_server(endpoint: &str) -> (SocketAddr, Arc<FakeServer>) {
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(Event::default().event("endpoint").data(endpoint))
        .unwrap();
    let server = Arc::new(FakeServer {
        events: tx,
        stream: Mutex::new(Some(rx)),
        posts: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/sse", get(sse_handler))
        .route("/messages", post(messages_handler))
        .with_state(Arc::clone(&server));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, server)
}

fn config(addr: SocketAddr) -> McpServerConfig {
    let mut config = McpServerConfig::new(format!("http://{addr}/sse"), TransportType::Sse);
    config.timeout = 5.0;
    config.sse_read_timeout = 5.0;
    config
}

#[tokio::test]
async fn negotiates_relative_endpoint() {
    let (addr, _server) = start_server("/messages?session_id=abc").await;

    let transport = SseTransport::connect("calc", &config(addr)).await.unwrap();
    assert_eq!(
        transport.endpoint().as_str(),
        format!("http://{addr}/messages?session_id=abc")
    );
    transport.close().await.unwrap();
}

#[tokio::test]
async fn handshake_and_tool_call_round_trip() {
    let (addr, server) = start_server("/messages?session_id=abc").await;

    let client = McpClient::connect("calc", &config(addr)).await.unwrap();
    assert_eq!(client.server_info().unwrap().server_info.name, "fake-sse");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "add");
    assert_eq!(tools[0].input_schema["required"], json!(["a", "b"]));

    let result = client
        .call_tool("add", json!({"a": 2, "b": 3}))
        .await
        .unwrap();
    assert_eq!(result.content, vec![ToolContent::text("5")]);

    // Capability-absent answers degrade to empty lists.
    assert!(client.list_prompts().await.unwrap().is_empty());

    let posts = server.posts.lock().await.clone();
    let methods: Vec<&str> = posts.iter().map(|p| p["method"].as_str().unwrap()).collect();
    assert_eq!(methods, vec![
        "initialize",
        "notifications/initialized",
        "tools/list",
        "tools/call",
        "prompts/list",
    ]);
    assert!(posts[1].get("id").is_none());
    let ids: Vec<&Value> = posts.iter().filter_map(|p| p.get("id")).collect();
    assert_eq!(ids, vec![&json!(1), &json!(2), &json!(3), &json!(4)]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn rejects_cross_origin_endpoint_before_any_request() {
    let (addr, server) = start_server("http://example.invalid/messages").await;

    let err = McpClient::connect("calc", &config(addr)).await.err().unwrap();
    assert!(matches!(err, Error::TransportProtocol { .. }), "{err}");
    assert!(server.posts.lock().await.is_empty());
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let (addr, _server) = start_server("/messages").await;
    let mut config = config(addr);
    config.sse_read_timeout = 0.3;

    let transport = SseTransport::connect("calc", &config).await.unwrap();
    let err = transport
        .send_message(JsonRpcMessage::Request(JsonRpcRequest::new(7, "slow", None)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransportConnection { .. }));
    assert!(err.to_string().contains("timed out"));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn closed_transport_rejects_sends() {
    let (addr, _server) = start_server("/messages").await;

    let transport = SseTransport::connect("calc", &config(addr)).await.unwrap();
    transport.close().await.unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        transport.send_message(JsonRpcMessage::Request(JsonRpcRequest::new(1, "tools/list", None))),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(Error::TransportConnection { .. })));
}

#[tokio::test]
async fn manager_routes_calc_add_with_and_without_hint() {
    let (addr, _server) = start_server("/messages").await;
    let mut registry = McpRegistry::new();
    registry.insert("calc", config(addr)).unwrap();

    let manager = McpManager::from_registry(&registry, CatalogOptions::default()).await;
    assert_eq!(manager.server_names(), vec!["calc"]);

    let tools = manager.list_tools().await.unwrap();
    assert_eq!(tools[0].name, "add");

    for hint in [Some("calc"), None] {
        let out = manager
            .call_tool("add", json!({"a": 2, "b": 3}), hint)
            .await
            .unwrap();
        assert_eq!(out, vec![ToolContent::text("5")]);
    }

    let err = manager
        .call_tool("add", json!({}), Some("weather"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ServerNotFound { .. }));

    manager.shutdown().await;
}
