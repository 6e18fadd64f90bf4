use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use serde_json::Value;
use std::io::{self, Write};

use toolbridge_mcp::{render_value, SchemaAdaptationError, ToolInfo};
use toolbridge_tool_runtime::InputSchema;

use crate::config::BridgeConfig;

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const NAME: Color = Color::Yellow;
    const PARAM: Color = Color::Cyan;
    const ERROR: Color = Color::Red;
    const WARNING: Color = Color::DarkYellow;
    const DIM: Color = Color::DarkGrey;
}

/// Renders command output: results on stdout, problems on stderr.
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    /// One block per operation: name, description, then its parameters.
    pub fn print_operations(&self, server: &str, tools: &[ToolInfo]) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{} operation(s) on '{}'\n", tools.len(), server)),
            ResetColor,
        )?;

        for tool in tools {
            execute!(
                stdout,
                Print("\n"),
                SetForegroundColor(Colors::NAME),
                Print(&tool.name),
                ResetColor,
                Print(format!("  {}\n", tool.description)),
            )?;

            match InputSchema::from_json_schema(&tool.input_schema) {
                Ok(schema) => {
                    for (name, spec) in schema.params() {
                        let marker = if spec.required { "" } else { "?" };
                        execute!(
                            stdout,
                            Print("    "),
                            SetForegroundColor(Colors::PARAM),
                            Print(format!("{name}{marker}")),
                            ResetColor,
                            Print(format!(": {}", spec.kind)),
                        )?;
                        if let Some(desc) = &spec.description {
                            execute!(
                                stdout,
                                SetForegroundColor(Colors::DIM),
                                Print(format!("  {desc}")),
                                ResetColor,
                            )?;
                        }
                        execute!(stdout, Print("\n"))?;
                    }
                }
                Err(e) => {
                    execute!(
                        stdout,
                        SetForegroundColor(Colors::WARNING),
                        Print(format!("    unreadable schema: {e}\n")),
                        ResetColor,
                    )?;
                }
            }
        }
        stdout.flush()?;
        Ok(())
    }

    /// Strings verbatim; other values as pretty JSON.
    pub fn print_value(&self, value: &Value) -> Result<()> {
        let text = match value {
            Value::String(_) => render_value(value),
            other => serde_json::to_string_pretty(other)?,
        };
        let mut stdout = io::stdout();
        writeln!(stdout, "{text}")?;
        stdout.flush()?;
        Ok(())
    }

    pub fn print_servers(&self, config: &BridgeConfig) -> Result<()> {
        let mut stdout = io::stdout();
        for (name, server) in &config.servers {
            execute!(
                stdout,
                SetForegroundColor(Colors::NAME),
                Print(name),
                ResetColor,
                Print(format!("  {} {}\n", server.command, server.args.join(" "))),
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_adaptation_errors(&self, errors: &[SchemaAdaptationError]) -> Result<()> {
        for error in errors {
            self.print_warning(&error.to_string())?;
        }
        Ok(())
    }

    pub fn print_warning(&self, message: &str) -> Result<()> {
        let mut stderr = io::stderr();
        execute!(
            stderr,
            SetForegroundColor(Colors::WARNING),
            Print(format!("warning: {message}\n")),
            ResetColor,
        )?;
        Ok(())
    }

    pub fn print_error(&self, message: &str) -> Result<()> {
        let mut stderr = io::stderr();
        execute!(
            stderr,
            SetForegroundColor(Colors::ERROR),
            Print(format!("error: {message}\n")),
            ResetColor,
        )?;
        Ok(())
    }
}
