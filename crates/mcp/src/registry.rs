//! McpRegistry: configured MCP servers, loaded from a file or the environment.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    time::Duration,
};

use {
    reqwest::header::{HeaderMap, HeaderName, HeaderValue},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, info},
};

use crate::error::{Context, Error, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "TOOLGATE_MCP_CONFIG";
/// Environment variable holding the configuration as an inline JSON blob.
pub const CONFIG_JSON_ENV: &str = "TOOLGATE_MCP_SERVERS";
/// Project-local configuration file checked when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "mcp_servers.json";

const DEFAULT_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_SSE_READ_TIMEOUT_SECS: f64 = 300.0;

/// Wire transport for an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    /// Long-lived event stream plus POSTs to a negotiated endpoint.
    #[default]
    Sse,
    /// One POST per message, session continuity via `Mcp-Session-Id`.
    StreamableHttp,
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub url: String,
    #[serde(default)]
    pub transport: TransportType,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Connect and per-request timeout, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// How long to wait for a response on the event stream, in seconds.
    #[serde(default = "default_sse_read_timeout")]
    pub sse_read_timeout: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_sse_read_timeout() -> f64 {
    DEFAULT_SSE_READ_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl McpServerConfig {
    pub fn new(url: impl Into<String>, transport: TransportType) -> Self {
        Self {
            url: url.into(),
            transport,
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            sse_read_timeout: DEFAULT_SSE_READ_TIMEOUT_SECS,
            enabled: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
    }

    pub fn sse_read_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.sse_read_timeout)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_SSE_READ_TIMEOUT_SECS))
    }

    /// Configured headers as a reqwest header map.
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::config(format!("invalid value for header '{name}': {e}")))?;
            map.insert(header, value);
        }
        Ok(map)
    }

    fn validate(&self, name: &str) -> Result<()> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| Error::config(format!("server '{name}' has invalid url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "server '{name}' url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        for (field, secs) in [
            ("timeout", self.timeout),
            ("sse_read_timeout", self.sse_read_timeout),
        ] {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(Error::config(format!(
                    "server '{name}' {field} must be a positive number of seconds"
                )));
            }
        }
        self.header_map()?;
        Ok(())
    }
}

/// Server names are used as catalog prefixes, so they stay within `[A-Za-z0-9_-]`.
pub fn is_valid_server_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// The set of configured MCP servers, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpRegistry {
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerConfig>,
}

impl McpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration JSON.
    ///
    /// Accepts `{"servers": {...}}`, `{"mcpServers": {...}}` or a bare map of
    /// server name to config. `${VAR}` placeholders in string values are
    /// replaced from the environment.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut value: Value =
            serde_json::from_str(raw).context("MCP server configuration is not valid JSON")?;
        substitute_env_in(&mut value, &|name| std::env::var(name).ok());

        let servers = match value {
            Value::Object(mut map) => match map.remove("servers").or_else(|| map.remove("mcpServers"))
            {
                Some(servers) => servers,
                None => Value::Object(map),
            },
            _ => return Err(Error::config("configuration must be a JSON object")),
        };

        let servers: BTreeMap<String, McpServerConfig> = serde_json::from_value(servers)
            .map_err(|e| Error::config(format!("failed to parse server entries: {e}")))?;

        let registry = Self { servers };
        registry.validate()?;
        Ok(registry)
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read MCP config: {}", path.display()))?;
        let registry = Self::from_json(&data)?;
        info!(
            path = %path.display(),
            servers = registry.servers.len(),
            "loaded MCP server configuration"
        );
        Ok(registry)
    }

    /// Load from the JSON blob in `var`, if it is set.
    pub fn from_env(var: &str) -> Result<Option<Self>> {
        match std::env::var(var) {
            Ok(raw) if !raw.trim().is_empty() => {
                debug!(var, "loading MCP server configuration from environment");
                Self::from_json(&raw).map(Some)
            },
            _ => Ok(None),
        }
    }

    /// Resolve configuration from the standard sources.
    ///
    /// Order: the explicit `path`, then the file named by
    /// [`CONFIG_PATH_ENV`], then `./mcp_servers.json`, then the JSON blob in
    /// [`CONFIG_JSON_ENV`]. With none of them present the registry is empty.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from) {
            return Self::load(&path);
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }
        if let Some(registry) = Self::from_env(CONFIG_JSON_ENV)? {
            return Ok(registry);
        }
        debug!("no MCP server configuration found, using empty registry");
        Ok(Self::default())
    }

    /// Add or replace a server after validating it.
    pub fn insert(&mut self, name: impl Into<String>, config: McpServerConfig) -> Result<()> {
        let name = name.into();
        if !is_valid_server_name(&name) {
            return Err(Error::config(format!(
                "server name '{name}' must match ^[A-Za-z0-9_-]+$"
            )));
        }
        config.validate(&name)?;
        self.servers.insert(name, config);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, config) in &self.servers {
            if !is_valid_server_name(name) {
                return Err(Error::config(format!(
                    "server name '{name}' must match ^[A-Za-z0-9_-]+$"
                )));
            }
            config.validate(name)?;
        }
        Ok(())
    }

    /// List all server names.
    pub fn list(&self) -> Vec<&str> {
        self.servers.keys().map(String::as_str).collect()
    }

    /// Get a server config by name.
    pub fn get(&self, name: &str) -> Option<&McpServerConfig> {
        self.servers.get(name)
    }

    /// Enabled servers in name order.
    pub fn enabled_servers(&self) -> Vec<(&str, &McpServerConfig)> {
        self.servers
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(name, cfg)| (name.as_str(), cfg))
            .collect()
    }
}

/// Replace `${VAR}` in every string of `value`. Unknown variables stay as-is.
fn substitute_env_in(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(s) if s.contains("${") => *s = substitute_env(s, lookup),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| substitute_env_in(item, lookup)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|item| substitute_env_in(item, lookup)),
        _ => {},
    }
}

fn substitute_env(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(val) => out.push_str(&val),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            _ => {
                out.push_str("${");
                rest = after;
            },
        }
    }
    out.push_str(rest);
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_servers() {
        let reg = McpRegistry::from_json(
            r#"{"servers":{"calc":{"url":"http://localhost:8000/sse","transport":"sse"},
                "docs":{"url":"https://docs.example.com/mcp","transport":"streamable_http",
                        "headers":{"X-Api-Key":"k"},"timeout":5,"sse_read_timeout":60}}}"#,
        )
        .unwrap();
        assert_eq!(reg.list(), vec!["calc", "docs"]);
        let docs = reg.get("docs").unwrap();
        assert_eq!(docs.transport, TransportType::StreamableHttp);
        assert_eq!(docs.timeout(), Duration::from_secs(5));
        assert_eq!(docs.sse_read_timeout(), Duration::from_secs(60));
        assert_eq!(docs.header_map().unwrap()["x-api-key"], "k");
    }

    #[test]
    fn test_parse_bare_map_with_defaults() {
        let reg = McpRegistry::from_json(r#"{"calc":{"url":"http://localhost:8000/sse"}}"#).unwrap();
        let calc = reg.get("calc").unwrap();
        assert_eq!(calc.transport, TransportType::Sse);
        assert_eq!(calc.timeout(), Duration::from_secs(30));
        assert_eq!(calc.sse_read_timeout(), Duration::from_secs(300));
        assert!(calc.enabled);
    }

    #[test]
    fn test_rejects_invalid_server_name() {
        let err = McpRegistry::from_json(r#"{"servers":{"bad name":{"url":"http://x"}}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_rejects_unknown_transport() {
        let err = McpRegistry::from_json(
            r#"{"servers":{"calc":{"url":"http://x","transport":"stdio"}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_rejects_non_positive_timeout() {
        let err =
            McpRegistry::from_json(r#"{"servers":{"calc":{"url":"http://x","timeout":0}}}"#)
                .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_server_name_validation() {
        assert!(is_valid_server_name("calc-2_b"));
        assert!(!is_valid_server_name(""));
        assert!(!is_valid_server_name("a.b"));
        assert!(!is_valid_server_name("a b"));
    }

    #[test]
    fn test_enabled_servers_skips_disabled() {
        let mut reg = McpRegistry::new();
        reg.insert("a", McpServerConfig::new("http://a", TransportType::Sse))
            .unwrap();
        let mut off = McpServerConfig::new("http://b", TransportType::StreamableHttp);
        off.enabled = false;
        reg.insert("b", off).unwrap();

        let enabled = reg.enabled_servers();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].0, "a");
    }

    #[test]
    fn test_substitute_env_placeholders() {
        let lookup = |name: &str| match name {
            "TOKEN" => Some("s3cret".to_string()),
            _ => None,
        };
        assert_eq!(substitute_env("Bearer ${TOKEN}", &lookup), "Bearer s3cret");
        assert_eq!(substitute_env("${MISSING}/x", &lookup), "${MISSING}/x");
        assert_eq!(substitute_env("${unclosed", &lookup), "${unclosed");
        assert_eq!(substitute_env("plain", &lookup), "plain");
    }

    #[test]
    fn test_substitute_env_walks_nested_values() {
        let lookup = |name: &str| (name == "HOST").then(|| "example.com".to_string());
        let mut value = serde_json::json!({"a": {"url": "http://${HOST}/sse"}, "b": ["${HOST}"]});
        substitute_env_in(&mut value, &lookup);
        assert_eq!(value["a"]["url"], "http://example.com/sse");
        assert_eq!(value["b"][0], "example.com");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_servers.json");
        std::fs::write(
            &path,
            r#"{"servers":{"calc":{"url":"http://localhost:8000/sse"}}}"#,
        )
        .unwrap();

        let reg = McpRegistry::load(&path).unwrap();
        assert_eq!(reg.list(), vec!["calc"]);

        let discovered = McpRegistry::discover(Some(&path)).unwrap();
        assert_eq!(discovered, reg);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = McpRegistry::load(Path::new("/nonexistent/path/mcp_servers.json"));
        assert!(result.is_err());
    }
}
