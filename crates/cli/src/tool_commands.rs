use {
    anyhow::{Context, Result, bail},
    serde_json::Value,
    toolgate_mcp::{Error, McpManager},
};

pub async fn handle_tools(manager: &McpManager) -> Result<()> {
    let tools = manager.list_tools().await?;
    println!("{}", serde_json::to_string_pretty(&tools)?);
    Ok(())
}

pub async fn handle_call(
    manager: &McpManager,
    name: &str,
    raw_args: &str,
    server: Option<&str>,
) -> Result<()> {
    let arguments = parse_arguments(raw_args)?;

    match manager.call_tool(name, arguments, server).await {
        Ok(content) => {
            println!("{}", serde_json::to_string_pretty(&content)?);
            Ok(())
        },
        Err(err) => match describe_lookup_error(
            &err,
            &manager.server_names(),
            &manager.unavailable_servers(),
        ) {
            Some(message) => bail!(message),
            None => Err(err.into()),
        },
    }
}

pub fn handle_servers(manager: &McpManager) -> Result<()> {
    let servers = manager.server_names();
    let unavailable = manager.unavailable_servers();
    if servers.is_empty() && unavailable.is_empty() {
        eprintln!("No MCP servers connected.");
        return Ok(());
    }
    for server in servers {
        println!("{server}");
    }
    for server in unavailable {
        println!("{server} (unavailable)");
    }
    Ok(())
}

fn parse_arguments(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object, got: {raw}");
    }
    Ok(value)
}

/// User-facing text for the two lookup failures.
fn describe_lookup_error(err: &Error, servers: &[&str], unavailable: &[&str]) -> Option<String> {
    match err {
        Error::ServerNotFound { server } if unavailable.contains(&server.as_str()) => Some(format!(
            "MCP server '{server}' is configured but failed to connect; check the log for the cause"
        )),
        Error::ServerNotFound { server } => {
            let known = if servers.is_empty() {
                "none".to_string()
            } else {
                servers.join(", ")
            };
            Some(format!(
                "no MCP server named '{server}' is connected (connected: {known})"
            ))
        },
        Error::ToolNotFound { name } => Some(format!(
            "no tool named '{name}'; run `toolgate tools` to see the catalog"
        )),
        _ => None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_must_be_an_object() {
        assert_eq!(
            parse_arguments(r#"{"a":1}"#).unwrap(),
            serde_json::json!({"a": 1})
        );
        assert!(parse_arguments("[1,2]").is_err());
        assert!(parse_arguments("{oops").is_err());
    }

    #[test]
    fn lookup_errors_get_distinct_messages() {
        let server = describe_lookup_error(
            &Error::ServerNotFound {
                server: "weather".into(),
            },
            &["calc"],
            &[],
        )
        .unwrap();
        assert!(server.contains("'weather'"));
        assert!(server.contains("connected: calc"));

        let down = describe_lookup_error(
            &Error::ServerNotFound {
                server: "weather".into(),
            },
            &["calc"],
            &["weather"],
        )
        .unwrap();
        assert!(down.contains("configured but failed to connect"));

        let tool = describe_lookup_error(&Error::ToolNotFound { name: "mul".into() }, &[], &[])
            .unwrap();
        assert!(tool.contains("'mul'"));

        let other = Error::Service {
            message: "boom".into(),
        };
        assert!(describe_lookup_error(&other, &[], &[]).is_none());
    }

    #[tokio::test]
    async fn degraded_manager_reports_unknown_server() {
        let manager = McpManager::degraded();
        let err = handle_call(&manager, "add", "{}", Some("calc"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connected: none"));
    }

    #[tokio::test]
    async fn unreadable_config_yields_empty_tool_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_servers.json");
        std::fs::write(&path, "not json").unwrap();

        let manager =
            McpManager::load_with(Some(&path), toolgate_mcp::CatalogOptions::default()).await;
        assert!(manager.is_degraded());
        handle_tools(&manager).await.unwrap();
        handle_servers(&manager).unwrap();
    }
}
