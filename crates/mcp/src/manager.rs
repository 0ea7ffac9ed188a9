//! McpManager: the process-facing entry point over the catalog.
//!
//! Construction never fails. A configuration that cannot be loaded leaves the
//! manager degraded: it lists no tools and resolves no calls.

use std::{path::Path, sync::Arc};

use {
    serde_json::Value,
    tokio::sync::OnceCell,
    tracing::{error, info, warn},
};

use crate::{
    catalog::{CatalogOptions, McpCatalog, ToolInfo},
    client::McpClient,
    error::{Error, Result},
    registry::McpRegistry,
    traits::McpClientTrait,
    types::ToolContent,
};

static GLOBAL: OnceCell<McpManager> = OnceCell::const_new();

/// Facade over the connected MCP servers.
pub struct McpManager {
    /// `None` when configuration could not be loaded.
    catalog: Option<McpCatalog>,
    /// Configured servers that could not be connected.
    unavailable: Vec<String>,
}

impl McpManager {
    pub fn with_catalog(catalog: McpCatalog) -> Self {
        Self {
            catalog: Some(catalog),
            unavailable: Vec::new(),
        }
    }

    pub fn degraded() -> Self {
        Self {
            catalog: None,
            unavailable: Vec::new(),
        }
    }

    /// Connect every enabled server. Servers that fail to connect are skipped.
    pub async fn from_registry(registry: &McpRegistry, options: CatalogOptions) -> Self {
        let enabled = registry.enabled_servers();
        let mut clients: Vec<Arc<dyn McpClientTrait>> = Vec::with_capacity(enabled.len());
        let mut unavailable = Vec::new();

        for (name, config) in enabled {
            match McpClient::connect(name, config).await {
                Ok(client) => clients.push(Arc::new(client)),
                Err(e) => {
                    warn!(server = %name, error = %e, "failed to connect MCP server, skipping");
                    unavailable.push(name.to_string());
                },
            }
        }

        info!(
            configured = registry.servers.len(),
            connected = clients.len(),
            "MCP manager ready"
        );
        Self {
            catalog: Some(McpCatalog::new(clients, options)),
            unavailable,
        }
    }

    /// Load configuration from the standard sources and connect.
    pub async fn load(options: CatalogOptions) -> Self {
        Self::load_with(None, options).await
    }

    /// Like [`McpManager::load`], with an explicit configuration file.
    pub async fn load_with(path: Option<&Path>, options: CatalogOptions) -> Self {
        match McpRegistry::discover(path) {
            Ok(registry) => Self::from_registry(&registry, options).await,
            Err(e) => {
                error!(error = %e, "failed to load MCP configuration, continuing without MCP servers");
                Self::degraded()
            },
        }
    }

    /// Process-wide instance, created on first use from the environment.
    pub async fn global() -> &'static McpManager {
        GLOBAL
            .get_or_init(|| Self::load(CatalogOptions::from_env()))
            .await
    }

    pub fn is_degraded(&self) -> bool {
        self.catalog.is_none()
    }

    /// Names of the connected servers.
    pub fn server_names(&self) -> Vec<&str> {
        self.catalog
            .as_ref()
            .map(McpCatalog::server_names)
            .unwrap_or_default()
    }

    /// Configured servers that failed to connect at startup.
    pub fn unavailable_servers(&self) -> Vec<&str> {
        self.unavailable.iter().map(String::as_str).collect()
    }

    /// Rediscover and return every catalog entry.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let Some(catalog) = &self.catalog else {
            return Ok(Vec::new());
        };
        catalog.fetch_tools().await.map_err(Error::into_service)
    }

    /// Rebuild the catalog and return the number of entries.
    pub async fn refresh(&self) -> Result<usize> {
        let Some(catalog) = &self.catalog else {
            return Ok(0);
        };
        catalog.refresh().await.map_err(Error::into_service)
    }

    /// Call a catalog entry, optionally scoped to one server.
    ///
    /// With a `server` hint the entry is resolved as `{server}__{name}`, then
    /// as `name` owned by that server. If that call fails on the wire, the
    /// catalog-wide entry for `name` is tried once, provided it is a different
    /// entry. Errors other than [`Error::ServerNotFound`] and
    /// [`Error::ToolNotFound`] come back as [`Error::Service`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        server: Option<&str>,
    ) -> Result<Vec<ToolContent>> {
        let Some(catalog) = &self.catalog else {
            return Err(match server {
                Some(server) => Error::ServerNotFound {
                    server: server.into(),
                },
                None => Error::ToolNotFound { name: name.into() },
            });
        };

        let result = match server {
            Some(server) if self.unavailable.iter().any(|s| s == server) => {
                warn!(server = %server, "MCP server is configured but failed to connect");
                Err(Error::ServerNotFound {
                    server: server.into(),
                })
            },
            Some(server) => Self::call_on_server(catalog, server, name, arguments).await,
            None => catalog.execute_tool(name, arguments).await,
        };
        result.map_err(Error::into_service)
    }

    async fn call_on_server(
        catalog: &McpCatalog,
        server: &str,
        name: &str,
        arguments: Value,
    ) -> Result<Vec<ToolContent>> {
        if !catalog.has_server(server) {
            return Err(Error::ServerNotFound {
                server: server.into(),
            });
        }
        catalog.ensure_discovered().await?;

        let action = catalog
            .resolve_on_server(server, name)
            .await
            .ok_or_else(|| Error::ToolNotFound { name: name.into() })?;

        match catalog.execute_action(&action, arguments.clone()).await {
            Err(e) if e.is_transport() => match catalog.lookup(name).await {
                Some(fallback) if fallback.unified_name != action.unified_name => {
                    warn!(
                        server = %server,
                        tool = %action.unified_name,
                        fallback = %fallback.unified_name,
                        fallback_server = %fallback.server,
                        error = %e,
                        "server-scoped call failed, retrying through catalog resolution"
                    );
                    catalog.execute_action(&fallback, arguments).await
                },
                _ => Err(e),
            },
            result => result,
        }
    }

    /// Close every server connection.
    pub async fn shutdown(&self) {
        if let Some(catalog) = &self.catalog {
            catalog.close_all().await;
            info!("MCP manager shut down");
        }
    }
}
