mod tool_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    toolgate_mcp::{CatalogOptions, McpManager},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "toolgate", about = "One tool catalog over many MCP servers", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// MCP server configuration file (defaults to $TOOLGATE_MCP_CONFIG, then ./mcp_servers.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Expose resources and resource templates as `resource__*` tools.
    #[arg(long, global = true, default_value_t = false)]
    resources_as_tools: bool,

    /// Expose prompts as `prompt__*` tools.
    #[arg(long, global = true, default_value_t = false)]
    prompts_as_tools: bool,
}

impl Cli {
    /// Flags switch options on; the environment can too.
    fn catalog_options(&self, env: CatalogOptions) -> CatalogOptions {
        CatalogOptions {
            resources_as_tools: self.resources_as_tools || env.resources_as_tools,
            prompts_as_tools: self.prompts_as_tools || env.prompts_as_tools,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List every tool in the unified catalog.
    Tools,
    /// Call a tool by its catalog name.
    Call {
        /// Catalog name of the tool.
        name: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Resolve the tool on this server first.
        #[arg(long)]
        server: Option<String>,
    },
    /// List connected MCP servers.
    Servers,
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "toolgate starting");

    let options = cli.catalog_options(CatalogOptions::from_env());
    let manager = McpManager::load_with(cli.config.as_deref(), options).await;

    let result = match &cli.command {
        Commands::Tools => tool_commands::handle_tools(&manager).await,
        Commands::Call { name, args, server } => {
            tool_commands::handle_call(&manager, name, args, server.as_deref()).await
        },
        Commands::Servers => tool_commands::handle_servers(&manager),
    };

    manager.shutdown().await;
    result
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_with_hint() {
        let cli = Cli::try_parse_from([
            "toolgate",
            "call",
            "add",
            "--args",
            r#"{"a":2,"b":3}"#,
            "--server",
            "calc",
        ])
        .unwrap();
        match cli.command {
            Commands::Call { name, args, server } => {
                assert_eq!(name, "add");
                assert_eq!(args, r#"{"a":2,"b":3}"#);
                assert_eq!(server.as_deref(), Some("calc"));
            },
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "toolgate",
            "tools",
            "--json-logs",
            "--log-level",
            "debug",
            "--config",
            "/tmp/mcp.json",
        ])
        .unwrap();
        assert!(cli.json_logs);
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/mcp.json")));
    }

    #[test]
    fn call_args_default_to_empty_object() {
        let cli = Cli::try_parse_from(["toolgate", "call", "now"]).unwrap();
        let Commands::Call { args, server, .. } = cli.command else {
            panic!("expected call");
        };
        assert_eq!(args, "{}");
        assert!(server.is_none());
    }

    #[test]
    fn catalog_options_merge_flags_and_env() {
        let cli = Cli::try_parse_from(["toolgate", "--resources-as-tools", "tools"]).unwrap();
        let options = cli.catalog_options(CatalogOptions {
            resources_as_tools: false,
            prompts_as_tools: true,
        });
        assert!(options.resources_as_tools);
        assert!(options.prompts_as_tools);
    }
}
