mod cli;
mod config;
mod terminal;

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use toolbridge_mcp::{adapt, connect_with_retry, McpClient, ServerParams, SharedInvoker, SpawnInvoker};

use crate::cli::{CliArgs, Command};
use crate::config::BridgeConfig;
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let terminal = Terminal::new();

    let config = BridgeConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;

    match args.command {
        Command::Servers => {
            terminal.print_servers(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::List { server } => {
            let params = config.resolve_server(&server)?;
            let mut client = connect(&params, config.connect_attempts(), &server).await?;
            let tools = client.list_operations().await;
            client.close().await;

            let tools = tools.with_context(|| format!("failed to list operations on '{server}'"))?;
            terminal.print_operations(&server, &tools)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Read { server, uri } => {
            let params = config.resolve_server(&server)?;
            let mut client = connect(&params, config.connect_attempts(), &server).await?;
            let text = client.read_resource(&uri).await;
            client.close().await;

            let text = text.with_context(|| format!("failed to read '{uri}' on '{server}'"))?;
            terminal.print_value(&serde_json::Value::String(text))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Schemas { server } => {
            let params = config.resolve_server(&server)?;
            let mut client = connect(&params, config.connect_attempts(), &server).await?;
            let tools = client.list_operations().await;
            client.close().await;

            let tools = tools.with_context(|| format!("failed to list operations on '{server}'"))?;
            let adaptation = adapt(tools, Arc::new(SpawnInvoker(params)));
            let schemas: Vec<_> = adaptation
                .tools
                .iter()
                .map(|tool| tool.to_function_schema())
                .collect();
            terminal.print_value(&serde_json::Value::Array(schemas))?;
            terminal.print_adaptation_errors(&adaptation.errors)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Call {
            server,
            operation,
            arguments,
        } => {
            let params = config.resolve_server(&server)?;
            let mut client = connect(&params, config.connect_attempts(), &server).await?;

            // Ctrl-C aborts a pending call instead of waiting out the timeout.
            if let Some(handle) = client.close_handle() {
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        handle.close();
                    }
                });
            }

            let tools = match client.list_operations().await {
                Ok(tools) => tools,
                Err(e) => {
                    client.close().await;
                    return Err(e).with_context(|| format!("failed to list operations on '{server}'"));
                }
            };

            let invoker = SharedInvoker::new(client);
            let adaptation = adapt(tools, Arc::new(invoker.clone()));
            terminal.print_adaptation_errors(&adaptation.errors)?;

            let outcome = match adaptation.tools.iter().find(|t| t.name() == operation) {
                Some(tool) => Some(tool.call(&arguments).await),
                None => None,
            };
            invoker.0.lock().await.close().await;

            match outcome {
                None => {
                    let known: Vec<_> = adaptation.tools.iter().map(|t| t.name()).collect();
                    anyhow::bail!(
                        "server '{server}' has no operation '{operation}' (available: {})",
                        known.join(", ")
                    );
                }
                Some(Ok(value)) => {
                    terminal.print_value(&value)?;
                    Ok(ExitCode::SUCCESS)
                }
                Some(Err(e)) if e.is_application() => {
                    terminal.print_error(&e.to_string())?;
                    Ok(ExitCode::FAILURE)
                }
                Some(Err(e)) => {
                    Err(e).with_context(|| format!("calling '{operation}' on '{server}' failed"))
                }
            }
        }
    }
}

async fn connect(params: &ServerParams, attempts: u32, server: &str) -> Result<McpClient> {
    info!(server = %server, program = %params.command, "Connecting");
    connect_with_retry(params, attempts)
        .await
        .with_context(|| format!("failed to connect to server '{server}'"))
}
