//! McpCatalog: one name-deduplicated tool list across every connected server.
//!
//! Tools keep their own name when it is free and are qualified as
//! `{server}__{name}` otherwise. Resources, resource templates and prompts can
//! be folded in as synthetic tools so that a tool-only caller can reach them.

use std::{collections::HashMap, sync::Arc};

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value, json},
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    traits::McpClientTrait,
    types::{
        McpPromptDef, McpResourceDef, McpResourceTemplateDef, McpToolDef, PromptMessage,
        ResourceBody, ResourceContents, ToolContent, empty_object_schema,
    },
};

/// Enables folding resources and resource templates into the catalog.
pub const RESOURCES_AS_TOOLS_ENV: &str = "TOOLGATE_RESOURCES_AS_TOOLS";
/// Enables folding prompts into the catalog.
pub const PROMPTS_AS_TOOLS_ENV: &str = "TOOLGATE_PROMPTS_AS_TOOLS";

const RESOURCE_PREFIX: &str = "resource__";
const PROMPT_PREFIX: &str = "prompt__";

/// Which non-tool capabilities are exposed as synthetic tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogOptions {
    pub resources_as_tools: bool,
    pub prompts_as_tools: bool,
}

impl CatalogOptions {
    pub fn from_env() -> Self {
        Self {
            resources_as_tools: env_flag(RESOURCES_AS_TOOLS_ENV),
            prompts_as_tools: env_flag(PROMPTS_AS_TOOLS_ENV),
        }
    }
}

fn env_flag(var: &str) -> bool {
    std::env::var(var).is_ok_and(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// What a catalog entry dispatches to.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolActionKind {
    Tool(McpToolDef),
    Resource(McpResourceDef),
    ResourceTemplate(McpResourceTemplateDef),
    Prompt(McpPromptDef),
}

/// One routable catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolAction {
    pub unified_name: String,
    pub server: String,
    pub description: String,
    pub input_schema: Value,
    pub kind: ToolActionKind,
}

impl ToolAction {
    pub fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: self.unified_name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// The advertised shape of a catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Catalog contents, kept in discovery order.
#[derive(Debug, Default)]
struct CatalogEntries {
    order: Vec<String>,
    actions: HashMap<String, ToolAction>,
}

impl CatalogEntries {
    /// Pick a free name: the candidate, then `{server}__{candidate}`, then a random suffix.
    fn claim_name(&self, server: &str, candidate: &str) -> String {
        if !self.actions.contains_key(candidate) {
            return candidate.to_string();
        }
        let qualified = format!("{server}__{candidate}");
        if !self.actions.contains_key(&qualified) {
            return qualified;
        }
        loop {
            let suffixed = format!("{qualified}_{}", random_suffix());
            if !self.actions.contains_key(&suffixed) {
                return suffixed;
            }
        }
    }

    fn insert(
        &mut self,
        server: &str,
        candidate: &str,
        description: String,
        input_schema: Value,
        kind: ToolActionKind,
    ) {
        let unified_name = self.claim_name(server, candidate);
        if unified_name != candidate {
            debug!(server = %server, name = %candidate, unified = %unified_name, "renamed colliding catalog entry");
        }
        self.order.push(unified_name.clone());
        self.actions.insert(unified_name.clone(), ToolAction {
            unified_name,
            server: server.into(),
            description,
            input_schema,
            kind,
        });
    }

    fn tool_infos(&self) -> Vec<ToolInfo> {
        self.order
            .iter()
            .filter_map(|name| self.actions.get(name))
            .map(ToolAction::tool_info)
            .collect()
    }
}

fn random_suffix() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn slug(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Aggregated view over a fixed set of server clients.
pub struct McpCatalog {
    clients: Vec<(String, Arc<dyn McpClientTrait>)>,
    options: CatalogOptions,
    entries: RwLock<CatalogEntries>,
}

impl McpCatalog {
    /// Clients are ordered by server name so discovery is deterministic.
    pub fn new(clients: Vec<Arc<dyn McpClientTrait>>, options: CatalogOptions) -> Self {
        let mut clients: Vec<(String, Arc<dyn McpClientTrait>)> = clients
            .into_iter()
            .map(|client| (client.server_name().to_string(), client))
            .collect();
        clients.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            clients,
            options,
            entries: RwLock::new(CatalogEntries::default()),
        }
    }

    pub fn options(&self) -> CatalogOptions {
        self.options
    }

    pub fn has_server(&self, server: &str) -> bool {
        self.client(server).is_some()
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.clients.iter().map(|(name, _)| name.as_str()).collect()
    }

    fn client(&self, server: &str) -> Option<&Arc<dyn McpClientTrait>> {
        self.clients
            .iter()
            .find(|(name, _)| name == server)
            .map(|(_, client)| client)
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.actions.is_empty()
    }

    /// The current entries, without rediscovering.
    pub async fn tools(&self) -> Vec<ToolInfo> {
        self.entries.read().await.tool_infos()
    }

    /// Rediscover every server and replace the catalog.
    ///
    /// The new catalog is assembled before the lock is taken, so readers see
    /// either the previous catalog or the new one.
    pub async fn fetch_tools(&self) -> Result<Vec<ToolInfo>> {
        let entries = self.discover().await?;
        let tools = entries.tool_infos();
        *self.entries.write().await = entries;
        info!(
            servers = self.clients.len(),
            tools = tools.len(),
            "MCP catalog rebuilt"
        );
        Ok(tools)
    }

    /// Rebuild the catalog and return the number of entries.
    pub async fn refresh(&self) -> Result<usize> {
        self.fetch_tools().await.map(|tools| tools.len())
    }

    /// Discover once if nothing has been discovered yet.
    pub async fn ensure_discovered(&self) -> Result<()> {
        if self.is_empty().await {
            self.fetch_tools().await?;
        }
        Ok(())
    }

    /// Discover every server, skipping servers whose listing fails. Fails
    /// only when every server fails.
    async fn discover(&self) -> Result<CatalogEntries> {
        let mut entries = CatalogEntries::default();
        let mut first_error = None;
        let mut reachable = 0;

        for (server, client) in &self.clients {
            let found = match self.discover_server(server, client.as_ref()).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(server = %server, error = %e, "skipping MCP server during discovery");
                    first_error.get_or_insert(e);
                    continue;
                },
            };
            reachable += 1;

            debug!(
                server = %server,
                entries = found.len(),
                "discovered MCP server capabilities"
            );
            for (candidate, description, schema, kind) in found {
                entries.insert(server, &candidate, description, schema, kind);
            }
        }

        match first_error {
            Some(e) if reachable == 0 => Err(e),
            _ => Ok(entries),
        }
    }

    /// Everything one server offers, as `(candidate, description, schema, kind)`.
    async fn discover_server(
        &self,
        server: &str,
        client: &dyn McpClientTrait,
    ) -> Result<Vec<(String, String, Value, ToolActionKind)>> {
        let mut found = Vec::new();

        for tool in client.list_tools().await? {
            let description = tool
                .description
                .clone()
                .unwrap_or_else(|| format!("MCP tool '{}' on server '{server}'", tool.name));
            found.push((
                tool.name.clone(),
                description,
                tool.input_schema.clone(),
                ToolActionKind::Tool(tool),
            ));
        }

        if self.options.resources_as_tools {
            for resource in client.list_resources().await? {
                found.push((
                    format!("{RESOURCE_PREFIX}{}", slug(&resource.name)),
                    describe_resource(&resource),
                    empty_object_schema(),
                    ToolActionKind::Resource(resource),
                ));
            }
            for template in client.list_resource_templates().await? {
                found.push((
                    format!("{RESOURCE_PREFIX}{}", slug(&template.name)),
                    describe_template(&template),
                    template_schema(&template),
                    ToolActionKind::ResourceTemplate(template),
                ));
            }
        }

        if self.options.prompts_as_tools {
            for prompt in client.list_prompts().await? {
                let description = prompt
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Render prompt '{}'", prompt.name));
                found.push((
                    format!("{PROMPT_PREFIX}{}", prompt.name),
                    description,
                    prompt_schema(&prompt),
                    ToolActionKind::Prompt(prompt),
                ));
            }
        }

        Ok(found)
    }

    /// Look up an entry by its unified name.
    pub async fn lookup(&self, name: &str) -> Option<ToolAction> {
        self.entries.read().await.actions.get(name).cloned()
    }

    /// Resolve `name` within one server: `{server}__{name}` first, then the
    /// bare `name` if that entry belongs to `server`.
    pub async fn resolve_on_server(&self, server: &str, name: &str) -> Option<ToolAction> {
        let entries = self.entries.read().await;
        let qualified = format!("{server}__{name}");
        [qualified.as_str(), name]
            .into_iter()
            .filter_map(|candidate| entries.actions.get(candidate))
            .find(|action| action.server == server)
            .cloned()
    }

    /// Execute a catalog entry by unified name, discovering first if needed.
    pub async fn execute_tool(&self, name: &str, arguments: Value) -> Result<Vec<ToolContent>> {
        self.ensure_discovered().await?;
        let action = self.lookup(name).await.ok_or_else(|| Error::ToolNotFound {
            name: name.into(),
        })?;
        self.execute_action(&action, arguments).await
    }

    /// Dispatch a resolved entry. Failures are wrapped in [`Error::ToolExecution`].
    pub async fn execute_action(
        &self,
        action: &ToolAction,
        arguments: Value,
    ) -> Result<Vec<ToolContent>> {
        debug!(tool = %action.unified_name, server = %action.server, "executing catalog entry");
        self.dispatch(action, arguments)
            .await
            .map_err(|source| Error::ToolExecution {
                tool: action.unified_name.clone(),
                source: Box::new(source),
            })
    }

    async fn dispatch(&self, action: &ToolAction, arguments: Value) -> Result<Vec<ToolContent>> {
        let client = self
            .client(&action.server)
            .ok_or_else(|| Error::ServerNotFound {
                server: action.server.clone(),
            })?;

        match &action.kind {
            ToolActionKind::Tool(tool) => {
                let result = client.call_tool(&tool.name, arguments).await?;
                if result.is_error {
                    warn!(
                        server = %action.server,
                        tool = %tool.name,
                        "MCP tool reported an error result"
                    );
                }
                Ok(result.content)
            },
            ToolActionKind::Resource(resource) => {
                let items = client.read_resource(&resource.uri).await?;
                Ok(resource_blocks(items, resource.mime_type.as_deref()))
            },
            ToolActionKind::ResourceTemplate(template) => {
                let uri = arguments
                    .get("uri")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::message(format!(
                            "resource template '{}' requires a string 'uri' argument",
                            template.name
                        ))
                    })?;
                let items = client.read_resource(uri).await?;
                Ok(resource_blocks(items, template.mime_type.as_deref()))
            },
            ToolActionKind::Prompt(prompt) => {
                let messages = client
                    .get_prompt(&prompt.name, prompt_arguments(arguments))
                    .await?;
                Ok(vec![ToolContent::text(flatten_prompt(&messages))])
            },
        }
    }

    /// Close every client, logging failures.
    pub async fn close_all(&self) {
        for (server, client) in &self.clients {
            if let Err(e) = client.close().await {
                warn!(server = %server, error = %e, "failed to close MCP client");
            }
        }
    }
}

fn describe_resource(resource: &McpResourceDef) -> String {
    let mut meta = vec![format!("uri: {}", resource.uri)];
    if let Some(mime) = &resource.mime_type {
        meta.push(format!("mime type: {mime}"));
    }
    if let Some(size) = resource.size {
        meta.push(format!("size: {size} bytes"));
    }
    let meta = meta.join(", ");

    match &resource.description {
        Some(description) => format!("Read resource '{}': {description} ({meta})", resource.name),
        None => format!("Read resource '{}' ({meta})", resource.name),
    }
}

fn describe_template(template: &McpResourceTemplateDef) -> String {
    let base = format!(
        "Read a resource matching '{}' (uri template: {})",
        template.name, template.uri_template
    );
    match &template.description {
        Some(description) => format!("{base}: {description}"),
        None => base,
    }
}

fn template_schema(template: &McpResourceTemplateDef) -> Value {
    json!({
        "type": "object",
        "properties": {
            "uri": {
                "type": "string",
                "description": format!("Resource URI matching {}", template.uri_template),
            }
        },
        "required": ["uri"],
    })
}

fn prompt_schema(prompt: &McpPromptDef) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for arg in &prompt.arguments {
        let mut property = json!({ "type": "string" });
        if let Some(description) = &arg.description {
            property["description"] = Value::String(description.clone());
        }
        properties.insert(arg.name.clone(), property);
        if arg.required {
            required.push(Value::String(arg.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Prompt arguments are strings on the wire.
fn prompt_arguments(arguments: Value) -> Value {
    let Value::Object(map) = arguments else {
        return Value::Object(Map::new());
    };
    map.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => Value::String(s),
                other => Value::String(other.to_string()),
            };
            (key, value)
        })
        .collect::<Map<String, Value>>()
        .into()
}

fn resource_blocks(items: Vec<ResourceContents>, fallback_mime: Option<&str>) -> Vec<ToolContent> {
    items
        .into_iter()
        .map(|mut resource| {
            if resource.mime_type.is_none() {
                resource.mime_type = fallback_mime.map(String::from);
            }
            ToolContent::resource(resource)
        })
        .collect()
}

/// One `"{role}: {content}"` line per message.
fn flatten_prompt(messages: &[PromptMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.role, content_text(&message.content)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn content_text(content: &ToolContent) -> String {
    match content {
        ToolContent::Text { text, .. } => text.clone(),
        ToolContent::Resource { resource, .. } => match &resource.body {
            ResourceBody::Text { text } => text.clone(),
            ResourceBody::Blob { .. } => format!("[binary resource {}]", resource.uri),
        },
        ToolContent::ResourceLink { uri, .. } => uri.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
