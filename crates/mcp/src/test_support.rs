//! In-memory `McpClientTrait` implementation for catalog and manager tests.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
};

use crate::{
    client::McpClientState,
    error::{Error, Result},
    traits::McpClientTrait,
    types::{
        McpPromptDef, McpResourceDef, McpResourceTemplateDef, McpToolDef, PromptArgument,
        PromptMessage, ResourceBody, ResourceContents, ToolContent, ToolsCallResult,
    },
};

pub(crate) struct FakeClient {
    name: String,
    tools: Vec<McpToolDef>,
    resources: Vec<McpResourceDef>,
    templates: Vec<McpResourceTemplateDef>,
    prompts: Vec<McpPromptDef>,
    /// URIs whose contents come back as base64 `blob`.
    blob_uris: Vec<String>,
    /// `(operation, target, arguments)` for every dispatched call.
    calls: Mutex<Vec<(String, String, Value)>>,
    pub list_calls: AtomicUsize,
    pub fail_calls: AtomicBool,
    pub fail_list: AtomicBool,
    pub closed: AtomicBool,
}

impl FakeClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            resources: Vec::new(),
            templates: Vec::new(),
            prompts: Vec::new(),
            blob_uris: Vec::new(),
            calls: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            fail_calls: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_tools(mut self, names: &[&str]) -> Self {
        self.tools.extend(names.iter().map(|name| McpToolDef {
            name: (*name).into(),
            description: Some(format!("{name} on {}", self.name)),
            input_schema: json!({"type": "object", "properties": {}}),
        }));
        self
    }

    pub fn with_resource(mut self, name: &str, uri: &str, mime_type: Option<&str>) -> Self {
        self.resources.push(McpResourceDef {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: mime_type.map(String::from),
            size: Some(42),
        });
        self
    }

    pub fn with_blob_resource(mut self, name: &str, uri: &str, mime_type: &str) -> Self {
        self.blob_uris.push(uri.into());
        self.with_resource(name, uri, Some(mime_type))
    }

    pub fn with_template(mut self, name: &str, uri_template: &str) -> Self {
        self.templates.push(McpResourceTemplateDef {
            uri_template: uri_template.into(),
            name: name.into(),
            description: None,
            mime_type: Some("text/plain".into()),
        });
        self
    }

    pub fn with_prompt(mut self, name: &str, arguments: &[(&str, bool)]) -> Self {
        self.prompts.push(McpPromptDef {
            name: name.into(),
            description: Some(format!("{name} prompt")),
            arguments: arguments
                .iter()
                .map(|(arg, required)| PromptArgument {
                    name: (*arg).into(),
                    description: None,
                    required: *required,
                })
                .collect(),
        });
        self
    }

    pub fn failing_calls(self) -> Self {
        self.fail_calls.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<(String, String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &str, target: &str, arguments: Value) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.into(), target.into(), arguments));
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(Error::connection(&self.name, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl McpClientTrait for FakeClient {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> McpClientState {
        if self.closed.load(Ordering::SeqCst) {
            McpClientState::Closed
        } else {
            McpClientState::Ready
        }
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::protocol(&self.name, "garbled tools/list"));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult> {
        self.record("tools/call", name, arguments.clone())?;
        if name == "rich" {
            return Ok(ToolsCallResult {
                content: serde_json::from_value(rich_content()).unwrap(),
                is_error: false,
            });
        }
        let text = match name {
            "add" => {
                let a = arguments["a"].as_i64().unwrap_or_default();
                let b = arguments["b"].as_i64().unwrap_or_default();
                (a + b).to_string()
            },
            _ => format!("{}:{name}", self.name),
        };
        Ok(ToolsCallResult {
            content: vec![ToolContent::text(text)],
            is_error: false,
        })
    }

    async fn list_resources(&self) -> Result<Vec<McpResourceDef>> {
        Ok(self.resources.clone())
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        self.record("resources/read", uri, Value::Null)?;
        let body = if self.blob_uris.iter().any(|blob| blob == uri) {
            ResourceBody::Blob {
                blob: "iVBORw0KGgo=".into(),
            }
        } else {
            ResourceBody::Text {
                text: format!("contents of {uri}"),
            }
        };
        Ok(vec![ResourceContents {
            uri: uri.into(),
            mime_type: None,
            body,
        }])
    }

    async fn list_resource_templates(&self) -> Result<Vec<McpResourceTemplateDef>> {
        Ok(self.templates.clone())
    }

    async fn list_prompts(&self) -> Result<Vec<McpPromptDef>> {
        Ok(self.prompts.clone())
    }

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Vec<PromptMessage>> {
        self.record("prompts/get", name, arguments.clone())?;
        Ok(vec![
            PromptMessage {
                role: "user".into(),
                content: ToolContent::text(format!("{name} {arguments}")),
            },
            PromptMessage {
                role: "assistant".into(),
                content: ToolContent::text("ok"),
            },
        ])
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// What the `rich` tool returns: blocks with fields and kinds the client
/// does not model.
pub(crate) fn rich_content() -> Value {
    json!([
        {"type": "text", "text": "5", "annotations": {"audience": ["user"], "priority": 0.5}},
        {"type": "embedded_thing", "payload": 42},
        {"type": "resource_link", "uri": "file:///report.csv", "name": "report",
         "title": "Quarterly report", "description": "CSV export", "_meta": {"rows": 12}},
    ])
}
