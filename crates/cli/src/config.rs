use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use toolbridge_mcp::{ServerParams, Timeouts};

/// CLI configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bounded waits applied to every server
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Extra connect attempts after a failed handshake
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Named servers
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

/// Timeouts in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_handshake_ms")]
    pub handshake_ms: u64,
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
    #[serde(default = "default_shutdown_ms")]
    pub shutdown_ms: u64,
}

/// How to launch one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides; `${VAR}` is expanded from this process's
    /// environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_connect_retries() -> u32 {
    1
}

fn default_handshake_ms() -> u64 {
    10_000
}

fn default_request_ms() -> u64 {
    30_000
}

fn default_shutdown_ms() -> u64 {
    2_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ms: default_handshake_ms(),
            request_ms: default_request_ms(),
            shutdown_ms: default_shutdown_ms(),
        }
    }
}

impl From<&TimeoutConfig> for Timeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Timeouts {
            handshake: Duration::from_millis(config.handshake_ms),
            request: Duration::from_millis(config.request_ms),
            shutdown: Duration::from_millis(config.shutdown_ms),
        }
    }
}

impl ServerConfig {
    fn sibling(binary: &str) -> Self {
        Self {
            command: sibling_binary(binary),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }
}

/// Path of a binary installed next to this executable, or the bare name
/// (looked up on PATH) when that cannot be determined.
fn sibling_binary(name: &str) -> String {
    let file = format!("{name}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file)))
        .filter(|path| path.exists())
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or(file)
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let mut servers = BTreeMap::new();
        servers.insert("calculator".to_string(), ServerConfig::sibling("calculator-server"));
        servers.insert("employee".to_string(), ServerConfig::sibling("employee-server"));
        Self {
            timeouts: TimeoutConfig::default(),
            connect_retries: default_connect_retries(),
            servers,
        }
    }
}

impl BridgeConfig {
    /// Return the default config directory path: ~/.config/toolbridge/
    pub fn default_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("toolbridge");
        Ok(config_dir)
    }

    /// Return the default config file path.
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load config from the given path, or the default path.
    /// Returns default config if the file does not exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            Self::from_file(&config_path)
        } else {
            debug!(?config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(?path, "Loading config");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Launch parameters for a named server.
    pub fn resolve_server(&self, name: &str) -> Result<ServerParams> {
        let server = self.servers.get(name).with_context(|| {
            let known: Vec<_> = self.servers.keys().map(String::as_str).collect();
            format!("unknown server '{name}' (configured: {})", known.join(", "))
        })?;

        let mut params = ServerParams::new(server.command.clone(), server.args.iter().cloned())
            .with_timeouts(Timeouts::from(&self.timeouts));
        for (key, value) in &server.env {
            params = params.with_env(key.clone(), value.clone());
        }
        if let Some(cwd) = &server.cwd {
            params = params.with_cwd(cwd.clone());
        }
        Ok(params)
    }

    /// Total connect attempts, counting the first.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.timeouts.handshake_ms, 10_000);
        assert_eq!(config.connect_attempts(), 2);
        assert!(config.servers.contains_key("calculator"));
        assert!(config.servers["employee"].command.contains("employee-server"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = BridgeConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: BridgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: BridgeConfig = toml::from_str(
            r#"
            [timeouts]
            handshake_ms = 500

            [servers.hr]
            command = "/opt/hr/employee-server"
            env = { EMPLOYEE_DB = "${HOME}/hr.db" }
            "#,
        )
        .unwrap();
        assert_eq!(parsed.timeouts.handshake_ms, 500);
        assert_eq!(parsed.timeouts.request_ms, 30_000);
        assert_eq!(parsed.connect_retries, 1);
        assert!(parsed.servers["hr"].args.is_empty());
    }

    #[test]
    fn test_resolve_server() {
        let mut config = BridgeConfig::default();
        config.timeouts.request_ms = 1_500;
        config.servers.insert(
            "hr".to_string(),
            ServerConfig {
                command: "employee-server".to_string(),
                args: vec!["--db".to_string(), "hr.db".to_string()],
                env: BTreeMap::from([("RUST_LOG".to_string(), "debug".to_string())]),
                cwd: Some(PathBuf::from("/srv/hr")),
            },
        );

        let params = config.resolve_server("hr").unwrap();
        assert_eq!(params.command, "employee-server");
        assert_eq!(params.args, ["--db", "hr.db"]);
        assert_eq!(params.env.get("RUST_LOG").map(String::as_str), Some("debug"));
        assert_eq!(params.cwd, Some(PathBuf::from("/srv/hr")));
        assert_eq!(params.timeouts.request, Duration::from_millis(1_500));
    }

    #[test]
    fn test_unknown_server() {
        let err = BridgeConfig::default().resolve_server("nope").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("nope"));
        assert!(message.contains("calculator"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = BridgeConfig::load(path.to_str()).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert!(!path.exists());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "connect_retries = 0\n").unwrap();
        let config = BridgeConfig::load(path.to_str()).unwrap();
        assert_eq!(config.connect_attempts(), 1);
        assert_eq!(config.servers.len(), 0);
    }
}
