//! employee-server: MCP server publishing employee records on stdio.

use anyhow::Context;
use clap::Parser;

use toolbridge_mcp::McpServer;
use toolbridge_ops::employee::{self, EmployeeStore};
use toolbridge_ops::serve;
use toolbridge_tool_runtime::OperationRegistry;

/// Serve add_employee, get_employee_by_id and get_all_employees over MCP stdio.
#[derive(Parser, Debug)]
#[command(name = "employee-server", version, about)]
struct Cli {
    /// SQLite database file.
    #[arg(long, env = "EMPLOYEE_DB", default_value = "employees.db")]
    db: String,

    /// Server name reported during the handshake.
    #[arg(long, env = "EMPLOYEE_SERVER_NAME", default_value = "EmployeeServer")]
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    serve::init_tracing();
    let cli = Cli::parse();

    let store = EmployeeStore::open(&cli.db)
        .await
        .with_context(|| format!("opening employee database {}", cli.db))?;

    let mut registry = OperationRegistry::new();
    employee::register(&mut registry, store.clone()).context("registering employee operations")?;

    let result = serve::serve_stdio(McpServer::new(registry).with_name(cli.name)).await;
    store.close().await;
    result
}
