//! calculator-server: MCP server publishing arithmetic operations on stdio.

use anyhow::Context;
use clap::Parser;

use toolbridge_mcp::McpServer;
use toolbridge_ops::{calculator, serve};

/// Serve add, subtract, multiply, divide and power over MCP stdio.
#[derive(Parser, Debug)]
#[command(name = "calculator-server", version, about)]
struct Cli {
    /// Server name reported during the handshake.
    #[arg(long, env = "CALCULATOR_SERVER_NAME", default_value = "calculator_server")]
    name: String,

    /// Split tools/list into pages of this many operations.
    #[arg(long, env = "CALCULATOR_PAGE_SIZE")]
    page_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    serve::init_tracing();
    let cli = Cli::parse();

    let registry = calculator::registry().context("registering calculator operations")?;
    let mut server = McpServer::new(registry).with_name(cli.name);
    if let Some(size) = cli.page_size {
        server = server.with_page_size(size);
    }

    serve::serve_stdio(server).await
}
