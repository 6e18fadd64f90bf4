use clap::{Parser, Subcommand};

/// Drive MCP tool servers from the command line.
///
/// Servers are resolved by name from the config file; without one, the
/// bundled `calculator` and `employee` servers are available.
#[derive(Parser, Debug)]
#[command(name = "toolbridge", version, about = "Call MCP tool servers over stdio")]
pub struct CliArgs {
    /// Path to config file (default: ~/.config/toolbridge/config.toml)
    #[arg(long, env = "TOOLBRIDGE_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the operations a server publishes
    List {
        /// Server name from the config file
        server: String,
    },

    /// Invoke one operation and print its result
    Call {
        /// Server name from the config file
        server: String,

        /// Operation name
        operation: String,

        /// Arguments as a JSON object (default: {})
        #[arg(default_value = "")]
        arguments: String,
    },

    /// Read a resource by URI and print its text
    Read {
        /// Server name from the config file
        server: String,

        /// Resource URI, e.g. calculator://square/3
        uri: String,
    },

    /// Print the adapted function schemas as JSON
    Schemas {
        /// Server name from the config file
        server: String,
    },

    /// Show the configured servers
    Servers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call() {
        let args = CliArgs::parse_from([
            "toolbridge",
            "call",
            "calculator",
            "add",
            r#"{"a": 2, "b": 2}"#,
        ]);
        match args.command {
            Command::Call {
                server,
                operation,
                arguments,
            } => {
                assert_eq!(server, "calculator");
                assert_eq!(operation, "add");
                assert_eq!(arguments, r#"{"a": 2, "b": 2}"#);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_call_arguments_default_to_empty() {
        let args = CliArgs::parse_from(["toolbridge", "call", "employee", "get_all_employees"]);
        assert!(matches!(args.command, Command::Call { arguments, .. } if arguments.is_empty()));
    }

    #[test]
    fn test_config_flag() {
        let args = CliArgs::parse_from(["toolbridge", "--config", "/tmp/tb.toml", "list", "calculator"]);
        assert_eq!(args.config.as_deref(), Some("/tmp/tb.toml"));
        assert!(matches!(args.command, Command::List { server } if server == "calculator"));
    }

    #[test]
    fn test_parse_read() {
        let args = CliArgs::parse_from(["toolbridge", "read", "calculator", "calculator://square/3"]);
        assert!(matches!(
            args.command,
            Command::Read { server, uri } if server == "calculator" && uri == "calculator://square/3"
        ));
    }
}
