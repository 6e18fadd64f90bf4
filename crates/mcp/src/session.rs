//! Child-process session.
//!
//! A [`ChildSession`] owns one server process and the pipes to its stdin and
//! stdout. It frames messages as newline-delimited JSON, allows one request
//! in flight at a time, bounds every read with a timeout, and tears the
//! process down on [`close`](ChildSession::close) or drop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::McpError;

/// Bounded waits used by sessions and clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait for the `initialize` acknowledgment.
    pub handshake: Duration,
    /// Wait for any other response.
    pub request: Duration,
    /// Grace period between closing stdin and killing the process.
    pub shutdown: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            request: Duration::from_secs(30),
            shutdown: Duration::from_secs(2),
        }
    }
}

/// How to launch a server process.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerParams {
    pub command: String,
    pub args: Vec<String>,
    /// Overrides layered on top of the inherited environment. `${VAR}`
    /// references are expanded from the parent environment.
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub timeouts: Timeouts,
}

impl ServerParams {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            cwd: None,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Lifecycle of a session. Moves strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    HandshakeInFlight,
    Ready,
    Closed,
}

/// Closes a session from another task, unblocking any pending receive.
#[derive(Debug, Clone)]
pub struct CloseHandle(Arc<watch::Sender<bool>>);

impl CloseHandle {
    pub fn close(&self) {
        self.0.send_replace(true);
    }
}

/// One server process plus its stdio pipes.
pub struct ChildSession {
    program: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    state: SessionState,
    in_flight: bool,
    closed_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
    shutdown_timeout: Duration,
}

impl ChildSession {
    /// Spawn the server process with piped stdin/stdout.
    ///
    /// Stderr is inherited so server diagnostics reach the terminal. The
    /// process is killed if the session is dropped without being closed.
    pub fn start(params: &ServerParams) -> Result<Self, McpError> {
        tracing::info!(program = %params.command, args = ?params.args, "Spawning server process");

        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (key, value) in &params.env {
            cmd.env(key, expand_env_vars(value));
        }
        if let Some(dir) = &params.cwd {
            cmd.current_dir(dir);
        }

        let launch_error = |reason: String| McpError::ProcessLaunch {
            program: params.command.clone(),
            reason,
        };

        let mut child = cmd.spawn().map_err(|e| launch_error(e.to_string()))?;
        if let Some(status) = child.try_wait()? {
            return Err(launch_error(format!("exited immediately with {status}")));
        }

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| launch_error("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| launch_error("failed to capture stdout".to_string()))?;

        let (closed_tx, closed_rx) = watch::channel(false);

        Ok(Self {
            program: params.command.clone(),
            child: Some(child),
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            state: SessionState::Unstarted,
            in_flight: false,
            closed_tx: Arc::new(closed_tx),
            closed_rx,
            shutdown_timeout: params.timeouts.shutdown,
        })
    }

    pub fn state(&self) -> SessionState {
        if *self.closed_rx.borrow() {
            SessionState::Closed
        } else {
            self.state
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id, while the process is owned by this session.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle(Arc::clone(&self.closed_tx))
    }

    /// Unstarted → HandshakeInFlight. Happens once per session.
    pub fn begin_handshake(&mut self) -> Result<(), McpError> {
        match self.state() {
            SessionState::Unstarted => {
                self.state = SessionState::HandshakeInFlight;
                Ok(())
            }
            SessionState::Closed => Err(McpError::SessionClosed),
            _ => Err(McpError::AlreadyConnected),
        }
    }

    /// HandshakeInFlight → Ready.
    pub fn mark_ready(&mut self) -> Result<(), McpError> {
        match self.state() {
            SessionState::HandshakeInFlight => {
                self.state = SessionState::Ready;
                Ok(())
            }
            SessionState::Closed => Err(McpError::SessionClosed),
            other => Err(McpError::Protocol(format!(
                "cannot become ready from {other:?}"
            ))),
        }
    }

    /// Send a message that expects exactly one response.
    ///
    /// Fails with [`McpError::Reentrancy`] if the previous response has not
    /// been received yet.
    pub async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.check_writable()?;
        if self.in_flight {
            return Err(McpError::Reentrancy);
        }
        self.write_line(message).await?;
        self.in_flight = true;
        Ok(())
    }

    /// Send a message that expects no response.
    pub async fn notify(&mut self, message: &str) -> Result<(), McpError> {
        self.check_writable()?;
        self.write_line(message).await
    }

    /// Read the next non-empty line, waiting at most `timeout`.
    ///
    /// A timeout or a read error leaves the stream at an unknown position, so
    /// either one also closes the session for further use.
    pub async fn receive(&mut self, timeout: Duration) -> Result<String, McpError> {
        if self.is_closed() {
            return Err(McpError::SessionClosed);
        }

        let deadline = Instant::now() + timeout;
        let mut closed = self.closed_rx.clone();

        loop {
            let mut line = String::new();
            let outcome = tokio::select! {
                read = self.stdout.read_line(&mut line) => Some(read),
                _ = closed.changed() => None,
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(program = %self.program, ?timeout, "Timed out waiting for server");
                    self.state = SessionState::Closed;
                    return Err(McpError::Timeout(timeout));
                }
            };

            let bytes_read = match outcome {
                Some(Ok(n)) => n,
                Some(Err(e)) => {
                    tracing::warn!(program = %self.program, error = %e, "Failed to read from server");
                    self.in_flight = false;
                    self.state = SessionState::Closed;
                    return Err(McpError::Transport(e));
                }
                None => {
                    self.in_flight = false;
                    return Err(McpError::SessionClosed);
                }
            };

            if bytes_read == 0 {
                self.in_flight = false;
                self.state = SessionState::Closed;
                return Err(McpError::ServerExited(self.exit_reason()));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            tracing::trace!(program = %self.program, message = %trimmed, "Received line");
            self.in_flight = false;
            return Ok(trimmed.to_string());
        }
    }

    /// Shut the process down. Idempotent.
    ///
    /// Closing stdin asks a stdio server to exit; if it has not exited within
    /// the shutdown timeout it is killed.
    pub async fn close(&mut self) {
        self.state = SessionState::Closed;
        self.in_flight = false;
        self.closed_tx.send_replace(true);

        let Some(mut child) = self.child.take() else {
            return;
        };
        drop(self.stdin.take());

        match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(program = %self.program, %status, "Server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(program = %self.program, error = %e, "Failed to wait for server process");
            }
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    timeout = ?self.shutdown_timeout,
                    "Server did not exit after stdin closed, killing"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(program = %self.program, error = %e, "Failed to kill server process");
                }
            }
        }
    }

    fn check_writable(&self) -> Result<(), McpError> {
        match self.state() {
            SessionState::Closed => Err(McpError::SessionClosed),
            SessionState::Unstarted => Err(McpError::NotConnected),
            _ => Ok(()),
        }
    }

    async fn write_line(&mut self, message: &str) -> Result<(), McpError> {
        if message.contains('\n') {
            return Err(McpError::Protocol(
                "message contains a raw newline".to_string(),
            ));
        }
        let stdin = self.stdin.as_mut().ok_or(McpError::SessionClosed)?;
        tracing::trace!(program = %self.program, message = %message, "Sending line");

        let written = async {
            stdin.write_all(message.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;

        written.map_err(|e| {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                McpError::ServerExited("stdin closed by server".to_string())
            } else {
                McpError::Transport(e)
            }
        })
    }

    fn exit_reason(&mut self) -> String {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(Some(status))) => format!("process exited with {status}"),
            _ => "server closed its output".to_string(),
        }
    }
}

/// Expand `${VAR}` references from the current environment. Unknown
/// variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TOOLBRIDGE_TEST_VAR", "hello");
        assert_eq!(expand_env_vars("${TOOLBRIDGE_TEST_VAR} world"), "hello world");
        assert_eq!(expand_env_vars("no vars here"), "no vars here");
        assert_eq!(expand_env_vars("${TOOLBRIDGE_NONEXISTENT}"), "${TOOLBRIDGE_NONEXISTENT}");
        assert_eq!(expand_env_vars("tail ${open"), "tail ${open");
    }

    #[test]
    fn test_default_timeouts_are_finite() {
        let t = Timeouts::default();
        assert_eq!(t.handshake, Duration::from_secs(10));
        assert_eq!(t.request, Duration::from_secs(30));
        assert_eq!(t.shutdown, Duration::from_secs(2));
    }

    #[test]
    fn test_server_params_builder() {
        let params = ServerParams::new("uv", ["run", "server.py"])
            .with_env("DB", "employees.db")
            .with_cwd("/tmp");
        assert_eq!(params.args, vec!["run", "server.py"]);
        assert_eq!(params.env.get("DB").map(String::as_str), Some("employees.db"));
        assert_eq!(params.cwd, Some(PathBuf::from("/tmp")));
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let params = ServerParams::new("/definitely/not/a/real/binary", Vec::<String>::new());
        let err = ChildSession::start(&params).err().unwrap();
        assert!(matches!(err, McpError::ProcessLaunch { .. }));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        fn quick() -> Timeouts {
            Timeouts {
                handshake: Duration::from_millis(500),
                request: Duration::from_millis(500),
                shutdown: Duration::from_millis(500),
            }
        }

        fn cat() -> ChildSession {
            ChildSession::start(&ServerParams::new("cat", Vec::<String>::new()).with_timeouts(quick()))
                .unwrap()
        }

        #[tokio::test]
        async fn test_send_receive_roundtrip() {
            let mut session = cat();
            session.begin_handshake().unwrap();
            session.send("{\"ping\":1}").await.unwrap();
            let line = session.receive(Duration::from_secs(5)).await.unwrap();
            assert_eq!(line, "{\"ping\":1}");
            session.close().await;
        }

        #[tokio::test]
        async fn test_second_send_without_receive_is_reentrancy() {
            let mut session = cat();
            session.begin_handshake().unwrap();
            session.send("{\"n\":1}").await.unwrap();
            let err = session.send("{\"n\":2}").await.unwrap_err();
            assert!(matches!(err, McpError::Reentrancy));

            session.receive(Duration::from_secs(5)).await.unwrap();
            session.send("{\"n\":3}").await.unwrap();
            session.close().await;
        }

        #[tokio::test]
        async fn test_send_before_handshake_is_rejected() {
            let mut session = cat();
            assert_eq!(session.state(), SessionState::Unstarted);
            let err = session.send("{}").await.unwrap_err();
            assert!(matches!(err, McpError::NotConnected));
            session.close().await;
        }

        #[tokio::test]
        async fn test_state_transitions_once() {
            let mut session = cat();
            session.begin_handshake().unwrap();
            assert_eq!(session.state(), SessionState::HandshakeInFlight);
            assert!(matches!(session.begin_handshake(), Err(McpError::AlreadyConnected)));
            session.mark_ready().unwrap();
            assert_eq!(session.state(), SessionState::Ready);
            assert!(session.mark_ready().is_err());
            session.close().await;
            assert_eq!(session.state(), SessionState::Closed);
        }

        #[tokio::test]
        async fn test_close_is_idempotent() {
            let mut session = cat();
            assert!(session.pid().is_some());
            session.close().await;
            assert!(session.pid().is_none());
            session.close().await;
            assert!(session.is_closed());

            let err = session.send("{}").await.unwrap_err();
            assert!(matches!(err, McpError::SessionClosed));
            let err = session.receive(Duration::from_millis(10)).await.unwrap_err();
            assert!(matches!(err, McpError::SessionClosed));
        }

        #[tokio::test]
        async fn test_receive_times_out() {
            let mut session = cat();
            session.begin_handshake().unwrap();
            let started = Instant::now();
            let err = session.receive(Duration::from_millis(100)).await.unwrap_err();
            assert!(matches!(err, McpError::Timeout(_)));
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(session.is_closed());
            session.close().await;
        }

        #[tokio::test]
        async fn test_unreadable_line_closes_session() {
            let params = ServerParams::new("sh", ["-c", "read x; printf '\\377\\n'; cat"])
                .with_timeouts(quick());
            let mut session = ChildSession::start(&params).unwrap();
            session.begin_handshake().unwrap();
            session.send("{\"n\":1}").await.unwrap();

            let err = session.receive(Duration::from_secs(5)).await.unwrap_err();
            assert!(matches!(err, McpError::Transport(_)));
            assert!(session.is_closed());

            let err = session.send("{\"n\":2}").await.unwrap_err();
            assert!(matches!(err, McpError::SessionClosed));
            session.close().await;
        }

        #[tokio::test]
        async fn test_close_handle_unblocks_receive() {
            let mut session = cat();
            session.begin_handshake().unwrap();
            session.send("{\"pending\":true}").await.unwrap();
            // Drain the echo so the next receive really blocks.
            session.receive(Duration::from_secs(5)).await.unwrap();

            let handle = session.close_handle();
            let closer = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                handle.close();
            });

            let err = session.receive(Duration::from_secs(30)).await.unwrap_err();
            assert!(matches!(err, McpError::SessionClosed));
            closer.await.unwrap();
            session.close().await;
        }

        #[tokio::test]
        async fn test_server_exit_is_reported() {
            let params = ServerParams::new("sh", ["-c", "exit 3"]).with_timeouts(quick());
            match ChildSession::start(&params) {
                // The shell may already be gone when try_wait runs.
                Err(McpError::ProcessLaunch { .. }) => {}
                Err(other) => panic!("unexpected error {other}"),
                Ok(mut session) => {
                    let err = session.receive(Duration::from_secs(5)).await.unwrap_err();
                    assert!(matches!(err, McpError::ServerExited(_)));
                    assert!(session.is_closed());
                    session.close().await;
                }
            }
        }

        #[tokio::test]
        async fn test_close_kills_process_that_ignores_eof() {
            let mut session = ChildSession::start(
                &ServerParams::new("sleep", ["30"]).with_timeouts(Timeouts {
                    shutdown: Duration::from_millis(100),
                    ..quick()
                }),
            )
            .unwrap();
            let started = Instant::now();
            session.close().await;
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(session.pid().is_none());
        }
    }
}
