//! Tool-server supervisor — owns every handle by name.
//!
//! The registry is a name-keyed map behind a read/write lock. Calls on
//! different servers never contend: the map lock is held only long
//! enough to clone the handle's `Arc`, and each handle serializes its
//! own stdin writes independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinSet;

use super::errors::ToolServerError;
use super::handle::{LifecycleState, ServerHandle, DEFAULT_CALL_TIMEOUT_MS};
use super::types::{ResultEnvelope, ToolCallOutcome, ToolDescriptor, ToolServerConfig};

/// Restart attempts before giving up on a server.
const MAX_RESTART_ATTEMPTS: u32 = 3;

/// Base delay between restart attempts; doubles each attempt.
const RESTART_BASE_DELAY: Duration = Duration::from_secs(1);

/// Point-in-time status of one registered server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub state: String,
    pub pending_requests: usize,
}

/// Supervises the set of tool server processes.
pub struct ToolServerSupervisor {
    servers: RwLock<HashMap<String, Arc<ServerHandle>>>,
}

impl ToolServerSupervisor {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
        }
    }

    async fn lookup(&self, name: &str) -> Result<Arc<ServerHandle>, ToolServerError> {
        let servers = self.servers.read().await;
        servers
            .get(name)
            .cloned()
            .ok_or_else(|| ToolServerError::UnknownServer {
                name: name.to_string(),
            })
    }

    // ─── Startup ────────────────────────────────────────────────────────

    /// Register a fresh handle for `config`, replacing any `Degraded`
    /// or `Stopped` entry. Returns `None` when a server under this name
    /// is already running (start is then a no-op).
    async fn register(
        &self,
        config: ToolServerConfig,
    ) -> Result<Option<Arc<ServerHandle>>, ToolServerError> {
        if !config.enabled {
            return Err(ToolServerError::Config {
                reason: format!("server '{}' is disabled", config.name),
            });
        }

        let name = config.name.clone();
        {
            let servers = self.servers.read().await;
            if let Some(existing) = servers.get(&name) {
                match existing.state().await {
                    LifecycleState::Starting | LifecycleState::Ready => {
                        tracing::debug!(server = %name, "start is a no-op, server already running");
                        return Ok(None);
                    }
                    LifecycleState::Degraded | LifecycleState::Stopped => {}
                }
            }
        }

        // Register before the handshake so a failed start leaves a
        // Degraded entry behind rather than an unknown name.
        let handle = ServerHandle::new(config);
        let mut servers = self.servers.write().await;
        servers.insert(name, Arc::clone(&handle));
        Ok(Some(handle))
    }

    /// Start one server. Idempotent: a server already `Starting` or
    /// `Ready` under this name is left alone. A `Degraded` or `Stopped`
    /// entry is replaced with a fresh process.
    pub async fn start(&self, config: ToolServerConfig) -> Result<(), ToolServerError> {
        match self.register(config).await? {
            Some(handle) => handle.start().await,
            None => Ok(()),
        }
    }

    /// Start every enabled server concurrently. One server failing does
    /// not abort the others; each result is reported per name.
    pub async fn start_all(
        &self,
        configs: Vec<ToolServerConfig>,
    ) -> Vec<(String, Result<(), ToolServerError>)> {
        let mut set = JoinSet::new();
        let mut results = Vec::new();

        for config in configs {
            let name = config.name.clone();
            match self.register(config).await {
                Ok(Some(handle)) => {
                    set.spawn(async move {
                        let result = handle.start().await;
                        (name, result)
                    });
                }
                Ok(None) => results.push((name, Ok(()))),
                Err(_) => {
                    tracing::debug!(server = %name, "skipping disabled server");
                }
            }
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => tracing::error!(error = %e, "startup task panicked"),
            }
        }

        let ready = results.iter().filter(|(_, r)| r.is_ok()).count();
        tracing::info!(ready, total = results.len(), "tool server startup complete");
        results
    }

    /// Restart a server with capped exponential backoff. The old process
    /// is stopped first; pending requests are drained with a cancellation
    /// error. Each attempt spawns a fresh handle, so request ids start
    /// over from 1.
    pub async fn restart(&self, name: &str) -> Result<(), ToolServerError> {
        let old = self.lookup(name).await?;
        let config = old.config().clone();
        old.stop().await;

        let mut delay = RESTART_BASE_DELAY;
        for attempt in 1..=MAX_RESTART_ATTEMPTS {
            tracing::info!(server = %name, attempt, "restarting tool server");
            let handle = ServerHandle::new(config.clone());
            {
                let mut servers = self.servers.write().await;
                servers.insert(name.to_string(), Arc::clone(&handle));
            }
            match handle.start().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(server = %name, attempt, error = %e, "restart attempt failed");
                    if attempt < MAX_RESTART_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(ToolServerError::RestartExhausted {
            name: name.to_string(),
            attempts: MAX_RESTART_ATTEMPTS,
        })
    }

    // ─── Shutdown ───────────────────────────────────────────────────────

    /// Stop one server. Pending requests are failed with a cancellation
    /// error; the entry stays registered in `Stopped` so later calls get
    /// a clear "unavailable" rather than "unknown server".
    pub async fn stop(&self, name: &str) -> Result<(), ToolServerError> {
        let handle = self.lookup(name).await?;
        handle.stop().await;
        Ok(())
    }

    /// Stop every registered server. Used at shutdown; never fails.
    pub async fn stop_all(&self) {
        let handles: Vec<Arc<ServerHandle>> = {
            let servers = self.servers.read().await;
            servers.values().cloned().collect()
        };
        for handle in handles {
            handle.stop().await;
        }
        tracing::info!("all tool servers stopped");
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// Current state of every registered server.
    pub async fn status(&self) -> Vec<ServerStatus> {
        let handles: Vec<Arc<ServerHandle>> = {
            let servers = self.servers.read().await;
            servers.values().cloned().collect()
        };
        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            statuses.push(ServerStatus {
                name: handle.name().to_string(),
                state: handle.state().await.to_string(),
                pending_requests: handle.pending_count().await,
            });
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// List the tools of one server. Fails unless the server is `Ready`.
    pub async fn list_tools(&self, name: &str) -> Result<Vec<ToolDescriptor>, ToolServerError> {
        let handle = self.lookup(name).await?;
        handle.list_tools().await
    }

    /// Tools of every `Ready` server, keyed by server name. Servers in
    /// other states are omitted rather than reported as errors.
    pub async fn list_ready_tools(&self) -> HashMap<String, Vec<ToolDescriptor>> {
        let handles: Vec<Arc<ServerHandle>> = {
            let servers = self.servers.read().await;
            servers.values().cloned().collect()
        };
        let mut all = HashMap::new();
        for handle in handles {
            if handle.state().await != LifecycleState::Ready {
                continue;
            }
            match handle.list_tools().await {
                Ok(tools) => {
                    all.insert(handle.name().to_string(), tools);
                }
                Err(e) => {
                    tracing::warn!(server = %handle.name(), error = %e, "tool listing failed");
                }
            }
        }
        all
    }

    // ─── Calls ──────────────────────────────────────────────────────────

    /// Call a tool on a named server. `timeout_ms` of `None` uses the
    /// default budget. A timeout fails only this call; other in-flight
    /// requests on the same handle keep their slots.
    pub async fn call_tool(
        &self,
        server: &str,
        tool_name: &str,
        arguments: serde_json::Value,
        timeout_ms: Option<u64>,
    ) -> Result<ResultEnvelope, ToolServerError> {
        let handle = self.lookup(server).await?;
        let timeout_ms = timeout_ms.unwrap_or(DEFAULT_CALL_TIMEOUT_MS);
        handle.call_tool(tool_name, arguments, timeout_ms).await
    }

    /// Call a tool and fold the result (or error) into a
    /// [`ToolCallOutcome`] with wall-clock timing. This is the entry
    /// point the orchestration layer uses; it never returns `Err`.
    pub async fn execute_tool(
        &self,
        server: &str,
        tool_name: &str,
        arguments: serde_json::Value,
        timeout_ms: Option<u64>,
    ) -> ToolCallOutcome {
        let started = Instant::now();
        let result = self.call_tool(server, tool_name, arguments, timeout_ms).await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(envelope) => {
                tracing::debug!(server, tool = tool_name, execution_time_ms, "tool call succeeded");
                ToolCallOutcome {
                    server: server.to_string(),
                    tool_name: tool_name.to_string(),
                    success: true,
                    envelope: Some(envelope),
                    payload: None,
                    error: None,
                    execution_time_ms,
                }
            }
            Err(e) => {
                tracing::warn!(server, tool = tool_name, error = %e, "tool call failed");
                ToolCallOutcome {
                    server: server.to_string(),
                    tool_name: tool_name.to_string(),
                    success: false,
                    envelope: None,
                    payload: None,
                    error: Some(e.to_string()),
                    execution_time_ms,
                }
            }
        }
    }
}

impl Default for ToolServerSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
