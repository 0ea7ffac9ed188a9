use std::fmt::Display;

/// Errors raised by the MCP gateway.
///
/// The first six variants are the public taxonomy callers match on. The rest
/// are plumbing that the manager folds into [`Error::Service`] at its boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network failure, non-success HTTP status, timeout or failed handshake.
    #[error("connection to MCP server '{server}' failed: {message}")]
    TransportConnection { server: String, message: String },

    /// Malformed frame, unexpected event name, bad content type or origin mismatch.
    #[error("MCP protocol violation from '{server}': {message}")]
    TransportProtocol { server: String, message: String },

    /// JSON-RPC error payload other than the capability-absent codes.
    #[error("MCP server '{server}' rejected '{method}': code={code} message={message}")]
    Remote {
        server: String,
        method: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No connected server has this name.
    #[error("MCP server '{server}' is not connected")]
    ServerNotFound { server: String },

    #[error("tool '{name}' not found")]
    ToolNotFound { name: String },

    /// Any failure while dispatching a catalog entry to its server.
    #[error("failed to execute tool '{tool}': {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: Box<Error>,
    },

    /// Catch-all at the manager boundary; carries the original message.
    #[error("MCP service error: {message}")]
    Service { message: String },

    #[error("invalid MCP configuration: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn connection(server: &str, message: impl Display) -> Self {
        Self::TransportConnection {
            server: server.to_string(),
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn protocol(server: &str, message: impl Display) -> Self {
        Self::TransportProtocol {
            server: server.to_string(),
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the failure happened on the wire rather than in the remote tool.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::TransportConnection { .. } | Self::TransportProtocol { .. } => true,
            Self::ToolExecution { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// Fold everything except the two lookup failures into [`Error::Service`].
    pub fn into_service(self) -> Self {
        match self {
            Self::ServerNotFound { .. } | Self::ToolNotFound { .. } | Self::Service { .. } => self,
            other => Self::Service {
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// `.context()` / `.with_context()` for turning foreign errors and missing
/// values into [`Error::Message`].
pub trait Context<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E: Display> Context<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        let context = context.into();
        self.map_err(|source| Error::message(format!("{context}: {source}")))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| Error::message(format!("{}: {source}", f().into())))
    }
}

impl<T> Context<T> for Option<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| Error::message(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::message(f()))
    }
}
