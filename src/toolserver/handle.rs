//! Server handle — one child process, its stdio channels, and its
//! lifecycle state machine.
//!
//! State machine: `Starting → Ready → Degraded → Stopped` (terminal).
//! A handle that fails to spawn or handshake stays around in `Degraded`
//! so callers get a clear error instead of "unknown server". A dedicated
//! reader task dispatches response lines to the pending table by id, so
//! any number of requests can be in flight on the single channel.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::codec::{self, Failure};
use super::errors::ToolServerError;
use super::pending::PendingRequests;
use super::types::{
    InitializeResult, ResultEnvelope, RpcResponse, ToolDescriptor, ToolServerConfig,
};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Protocol version sent in the initialize handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Timeout for the initialize handshake. Generous to accommodate servers
/// that load heavyweight runtimes at startup.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-call timeout for `tools/call`.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive malformed stdout lines tolerated before the handle is
/// downgraded to `Degraded`.
const MAX_MALFORMED_LINES: u32 = 20;

// ─── Lifecycle ──────────────────────────────────────────────────────────────

/// Lifecycle state of one tool server handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Spawn issued, handshake in progress.
    Starting,
    /// Handshake acknowledged; accepts `tools/list` and `tools/call`.
    Ready,
    /// Spawn/handshake failed, process exited, or output went bad.
    /// Retained so callers get a clear error; restart to recover.
    Degraded,
    /// Explicitly stopped. Terminal.
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Ready => "ready",
            LifecycleState::Degraded => "degraded",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ServerHandle ───────────────────────────────────────────────────────────

/// In-process representation of one running tool server.
pub struct ServerHandle {
    name: String,
    config: ToolServerConfig,
    // Shared with the reader task, which degrades the handle on EOF.
    state: Arc<RwLock<LifecycleState>>,
    process: Mutex<Option<Child>>,
    writer: Mutex<Option<ChildStdin>>,
    stderr: Mutex<Option<ChildStderr>>,
    pending: Arc<PendingRequests>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerHandle {
    /// Create a handle in `Starting`. Call [`ServerHandle::start`] to
    /// spawn the process and perform the handshake.
    pub fn new(config: ToolServerConfig) -> Arc<Self> {
        Arc::new(Self {
            name: config.name.clone(),
            config,
            state: Arc::new(RwLock::new(LifecycleState::Starting)),
            process: Mutex::new(None),
            writer: Mutex::new(None),
            stderr: Mutex::new(None),
            pending: Arc::new(PendingRequests::new()),
            reader_task: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ToolServerConfig {
        &self.config
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Number of requests currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.in_flight().await
    }

    // ─── Startup ────────────────────────────────────────────────────────

    /// Spawn the process and perform the `initialize` handshake.
    ///
    /// On success the handle transitions to `Ready`. On spawn failure or
    /// handshake timeout it transitions to `Degraded` and the error is
    /// returned; the handle remains usable for a later restart.
    pub async fn start(&self) -> Result<(), ToolServerError> {
        match self.spawn_and_handshake().await {
            Ok(()) => {
                self.transition(LifecycleState::Ready).await;
                tracing::info!(server = %self.name, "tool server ready");
                Ok(())
            }
            Err(e) => {
                self.fail_pending_unavailable("startup failed").await;
                self.transition(LifecycleState::Degraded).await;
                tracing::warn!(server = %self.name, error = %e, "tool server degraded at startup");
                Err(e)
            }
        }
    }

    async fn spawn_and_handshake(&self) -> Result<(), ToolServerError> {
        let config = &self.config;

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = config.cwd.as_deref() {
            cmd.current_dir(dir);
        }

        // Wire stdio for JSON-RPC; stderr captured for diagnostics
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ToolServerError::SpawnFailed {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| ToolServerError::SpawnFailed {
            name: self.name.clone(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ToolServerError::SpawnFailed {
            name: self.name.clone(),
            reason: "failed to capture stdout".into(),
        })?;
        *self.stderr.lock().await = child.stderr.take();
        *self.writer.lock().await = Some(stdin);
        *self.process.lock().await = Some(child);

        // Reader task: dispatch response lines to pending slots by id.
        let task = tokio::spawn(Self::read_loop(
            self.name.clone(),
            BufReader::new(stdout),
            Arc::clone(&self.pending),
            Arc::clone(&self.state),
        ));
        *self.reader_task.lock().await = Some(task);

        // Handshake: server must acknowledge before Ready.
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": "deskagent",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        });

        let response = match self
            .request_with_timeout("initialize", Some(params), INIT_TIMEOUT.as_millis() as u64)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                // Kill first so the stderr pipe reaches EOF and the
                // tail read below can complete.
                self.kill_process().await;
                let stderr_ctx = self.read_stderr_tail().await;
                return Err(ToolServerError::InitFailed {
                    name: self.name.clone(),
                    reason: format!("{e}{}", stderr_suffix(&stderr_ctx)),
                });
            }
        };

        if let Some(err) = response.error {
            self.kill_process().await;
            return Err(ToolServerError::InitFailed {
                name: self.name.clone(),
                reason: err.message,
            });
        }

        // The acknowledgement payload is advisory; tolerate unknown shapes.
        if let Some(result) = response.result {
            if let Ok(ack) = serde_json::from_value::<InitializeResult>(result) {
                if let Some(info) = ack.server_info {
                    tracing::debug!(
                        server = %self.name,
                        remote_name = info.name.as_deref().unwrap_or("?"),
                        "handshake acknowledged"
                    );
                }
            }
        }

        // Best-effort: tell the server initialization is complete.
        let _ = self.notify("notifications/initialized", None).await;

        Ok(())
    }

    /// Reader loop body. Runs until EOF, an I/O error, or repeated
    /// malformed output — all of which degrade the handle.
    async fn read_loop(
        name: String,
        reader: BufReader<tokio::process::ChildStdout>,
        pending: Arc<PendingRequests>,
        state: Arc<RwLock<LifecycleState>>,
    ) {
        let mut lines = reader.lines();
        let mut malformed: u32 = 0;

        let reason = loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match codec::decode_response(trimmed) {
                        Ok(response) => {
                            malformed = 0;
                            if !pending.complete(response).await {
                                // Late reply racing a timeout/cancel — drop it.
                                tracing::debug!(server = %name, "discarding response for unknown id");
                            }
                        }
                        Err(_) => {
                            // Could be server log output on stdout; tolerate
                            // a bounded amount before declaring it broken.
                            malformed += 1;
                            tracing::debug!(server = %name, line = trimmed, "skipping non-protocol output");
                            if malformed >= MAX_MALFORMED_LINES {
                                break "repeated malformed output";
                            }
                        }
                    }
                }
                Ok(None) => break "process closed stdout",
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "stdout read error");
                    break "stdout read error";
                }
            }
        };

        pending
            .fail_all(|| ToolServerError::Unavailable {
                name: name.clone(),
                reason: format!("server unavailable: {reason}"),
            })
            .await;

        let mut state = state.write().await;
        // Explicit stop already drained and transitioned.
        if *state != LifecycleState::Stopped {
            *state = LifecycleState::Degraded;
            tracing::warn!(server = %name, reason, "tool server degraded");
        }
    }

    // ─── Requests ───────────────────────────────────────────────────────

    /// Issue `tools/list`. Fails unless the handle is `Ready`.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError> {
        self.list_tools_with_timeout(DEFAULT_CALL_TIMEOUT_MS).await
    }

    /// `list_tools` with an explicit timeout. On expiry the pending slot
    /// is removed, same as a timed-out `tools/call`.
    pub async fn list_tools_with_timeout(
        &self,
        timeout_ms: u64,
    ) -> Result<Vec<ToolDescriptor>, ToolServerError> {
        self.ensure_ready().await?;
        let response = self
            .request_with_timeout("tools/list", None, timeout_ms)
            .await?;

        if let Some(err) = response.error {
            return Err(codec::classify(Some(err.into()), "handle.list_tools").into());
        }
        let result = response.result.unwrap_or(serde_json::json!({}));
        let tools = result.get("tools").cloned().unwrap_or(serde_json::json!([]));
        serde_json::from_value(tools).map_err(|e| ToolServerError::Transport {
            server: self.name.clone(),
            reason: format!("failed to parse tool list: {e}"),
        })
    }

    /// Issue `tools/call` with a fresh id and await the matching response.
    ///
    /// A per-call timeout removes the pending slot and fails only this
    /// call; other in-flight requests are unaffected.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        timeout_ms: u64,
    ) -> Result<ResultEnvelope, ToolServerError> {
        self.ensure_ready().await?;

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let response = self
            .request_with_timeout("tools/call", Some(params), timeout_ms)
            .await?;

        if let Some(err) = response.error {
            return Err(codec::classify(Some(err.into()), "handle.call_tool").into());
        }
        let result = response.result.ok_or_else(|| {
            codec::classify(
                Some(Failure::Text(
                    "response missing both result and error".into(),
                )),
                "handle.call_tool",
            )
        })?;
        serde_json::from_value(result).map_err(|e| ToolServerError::Transport {
            server: self.name.clone(),
            reason: format!("failed to parse result envelope: {e}"),
        })
    }

    /// Send a request with a fresh id and await the matching response.
    ///
    /// The pending slot is removed on write failure and on timeout, so a
    /// request that never completes cannot leave a dangling entry.
    async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout_ms: u64,
    ) -> Result<RpcResponse, ToolServerError> {
        let id = self.pending.allocate_id();
        let rx = self.pending.register(id).await;
        if let Err(e) = self.write_request(id, method, params).await {
            self.pending.remove(id).await;
            return Err(e);
        }
        match timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ToolServerError::Unavailable {
                name: self.name.clone(),
                reason: "server unavailable: response channel closed".into(),
            }),
            Err(_) => {
                self.pending.remove(id).await;
                Err(ToolServerError::Timeout {
                    server: self.name.clone(),
                    method: method.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    async fn write_request(
        &self,
        id: u64,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ToolServerError> {
        let line = codec::encode_request(id, method, params).map_err(|e| {
            ToolServerError::Transport {
                server: self.name.clone(),
                reason: format!("failed to serialize request: {e}"),
            }
        })?;
        self.write_line(&line).await
    }

    /// Send a notification (no id, no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ToolServerError> {
        let line = codec::encode_notification(method, params).map_err(|e| {
            ToolServerError::Transport {
                server: self.name.clone(),
                reason: format!("failed to serialize notification: {e}"),
            }
        })?;
        self.write_line(&line).await
    }

    async fn write_line(&self, line: &str) -> Result<(), ToolServerError> {
        let mut writer = self.writer.lock().await;
        let Some(stdin) = writer.as_mut() else {
            return Err(ToolServerError::Unavailable {
                name: self.name.clone(),
                reason: "server unavailable: not connected".into(),
            });
        };
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ToolServerError::Transport {
                server: self.name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        stdin.flush().await.map_err(|e| ToolServerError::Transport {
            server: self.name.clone(),
            reason: format!("failed to flush stdin: {e}"),
        })
    }

    async fn ensure_ready(&self) -> Result<(), ToolServerError> {
        let state = self.state().await;
        match state {
            LifecycleState::Ready => Ok(()),
            LifecycleState::Degraded | LifecycleState::Stopped => {
                Err(ToolServerError::Unavailable {
                    name: self.name.clone(),
                    reason: format!("server unavailable: state is {state}"),
                })
            }
            LifecycleState::Starting => Err(ToolServerError::NotReady {
                name: self.name.clone(),
                state: state.to_string(),
            }),
        }
    }

    // ─── Shutdown ───────────────────────────────────────────────────────

    /// Stop the server: drain pending requests with a cancellation error,
    /// attempt graceful exit, then kill. Transitions to `Stopped`.
    pub async fn stop(&self) {
        self.transition(LifecycleState::Stopped).await;

        self.pending
            .fail_all(|| ToolServerError::Cancelled {
                name: self.name.clone(),
                reason: "server stopped".into(),
            })
            .await;

        // Best-effort shutdown notification, then drop stdin to signal EOF.
        let _ = self.notify("shutdown", None).await;
        *self.writer.lock().await = None;

        // A call racing this stop may have registered between the drain
        // above and the writer going away; drain once more now that no
        // further write can succeed.
        self.pending
            .fail_all(|| ToolServerError::Cancelled {
                name: self.name.clone(),
                reason: "server stopped".into(),
            })
            .await;

        let child = self.process.lock().await.take();
        if let Some(mut child) = child {
            match timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(server = %self.name, exit = %status, "tool server exited");
                }
                _ => {
                    let _ = child.kill().await;
                    tracing::info!(server = %self.name, "tool server killed");
                }
            }
        }

        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
    }

    async fn kill_process(&self) {
        *self.writer.lock().await = None;
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
        }
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
    }

    async fn transition(&self, to: LifecycleState) {
        let mut state = self.state.write().await;
        if *state != to {
            tracing::debug!(server = %self.name, from = %*state, to = %to, "lifecycle transition");
            *state = to;
        }
    }

    async fn fail_pending_unavailable(&self, reason: &str) {
        let reason = reason.to_string();
        self.pending
            .fail_all(|| ToolServerError::Unavailable {
                name: self.name.clone(),
                reason: format!("server unavailable: {reason}"),
            })
            .await;
    }

    /// Read whatever the server wrote to stderr, truncated for logging.
    async fn read_stderr_tail(&self) -> String {
        use tokio::io::AsyncReadExt;

        let Some(mut stderr) = self.stderr.lock().await.take() else {
            return String::new();
        };
        let mut buf = String::new();
        match timeout(Duration::from_millis(500), stderr.read_to_string(&mut buf)).await {
            Ok(Ok(_)) => {
                if buf.len() > 2000 {
                    buf.truncate(2000);
                    buf.push_str("...(truncated)");
                }
                buf
            }
            _ => String::new(),
        }
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, command: &str) -> ToolServerConfig {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "command": command,
        }))
        .unwrap()
    }

    #[test]
    fn lifecycle_state_display() {
        assert_eq!(LifecycleState::Starting.to_string(), "starting");
        assert_eq!(LifecycleState::Ready.to_string(), "ready");
        assert_eq!(LifecycleState::Degraded.to_string(), "degraded");
        assert_eq!(LifecycleState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn stderr_suffix_formatting() {
        assert_eq!(stderr_suffix(""), "");
        assert_eq!(stderr_suffix("boom\n"), " | stderr: boom");
    }

    #[tokio::test]
    async fn new_handle_starts_in_starting() {
        let handle = ServerHandle::new(config("docs", "docserve"));
        assert_eq!(handle.state().await, LifecycleState::Starting);
    }

    #[tokio::test]
    async fn spawn_failure_degrades_handle() {
        let handle = ServerHandle::new(config("ghost", "/nonexistent/binary-xyz"));
        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, ToolServerError::SpawnFailed { .. }));
        assert_eq!(handle.state().await, LifecycleState::Degraded);
    }

    #[tokio::test]
    async fn degraded_handle_fails_calls_fast() {
        let handle = ServerHandle::new(config("ghost", "/nonexistent/binary-xyz"));
        let _ = handle.start().await;
        let err = handle
            .call_tool("ghost.query", serde_json::json!({}), 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolServerError::Unavailable { .. }));
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn starting_handle_rejects_list_tools() {
        let handle = ServerHandle::new(config("docs", "docserve"));
        let err = handle.list_tools().await.unwrap_err();
        assert!(matches!(err, ToolServerError::NotReady { .. }));
    }

    #[tokio::test]
    async fn stop_is_terminal() {
        let handle = ServerHandle::new(config("docs", "docserve"));
        handle.stop().await;
        assert_eq!(handle.state().await, LifecycleState::Stopped);
        let err = handle
            .call_tool("docs.fetch", serde_json::json!({}), 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolServerError::Unavailable { .. }));
    }
}
