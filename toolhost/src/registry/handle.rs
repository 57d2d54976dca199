//! Live connection to one spawned tool-server
//!
//! The subprocess starts when the handle is created. The MCP `initialize`
//! exchange is deferred to the first capability access so that `load` can
//! report spawn failures without waiting on a slow interpreter.

use std::time::Duration;

use rmcp::{
    model::{CallToolRequestParam, CallToolResult, RawContent},
    service::RunningService,
    transport::TokioChildProcess,
    RoleClient, ServiceExt,
};
use serde_json::Value;
use tokio::process::Command;

use super::descriptor::LaunchSpec;
use super::error::{RegistryError, RegistryResult};

/// Default bound on spawn plus MCP initialization
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a single tool invocation
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// A tool advertised by a tool-server
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Server this tool belongs to
    pub server: String,
    pub name: String,
    pub description: Option<String>,
    /// Input schema (JSON)
    pub input_schema: Value,
}

enum Connection {
    /// Process running, handshake not yet performed
    Spawned(TokioChildProcess),
    Ready(RunningService<RoleClient, ()>),
    Closed,
}

/// Owns a tool-server subprocess and its MCP session.
///
/// Dropping the handle kills the subprocess. Use [`ToolServerHandle::close`]
/// for an orderly shutdown.
pub struct ToolServerHandle {
    spec: LaunchSpec,
    pid: Option<u32>,
    filter: Option<Vec<String>>,
    connection: Connection,
    tools: Option<Vec<ToolDescriptor>>,
    startup_timeout: Duration,
    tool_timeout: Duration,
}

impl std::fmt::Debug for ToolServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.connection {
            Connection::Spawned(_) => "spawned",
            Connection::Ready(_) => "ready",
            Connection::Closed => "closed",
        };
        f.debug_struct("ToolServerHandle")
            .field("name", &self.spec.name)
            .field("pid", &self.pid)
            .field("state", &state)
            .field("filter", &self.filter)
            .finish()
    }
}

impl ToolServerHandle {
    /// Spawn the subprocess described by `spec`
    pub(crate) fn spawn(spec: LaunchSpec, filter: Option<&[&str]>) -> RegistryResult<Self> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .env_clear()
            .envs(&spec.env)
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let transport = TokioChildProcess::new(cmd).map_err(|source| RegistryError::SpawnFailure {
            name: spec.name.clone(),
            command: spec.command.clone(),
            source,
        })?;
        let pid = transport.id();

        tracing::info!(server = %spec.name, ?pid, "spawned MCP server: {}", spec.command);

        Ok(Self {
            spec,
            pid,
            filter: filter.map(|names| names.iter().map(|n| n.to_string()).collect()),
            connection: Connection::Spawned(transport),
            tools: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        })
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Registry name of the server
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The resolved launch this handle was spawned from
    pub fn launch(&self) -> &LaunchSpec {
        &self.spec
    }

    /// OS process id, if the platform reported one
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.connection, Connection::Closed)
    }

    /// Whether the tool filter lets `tool` through
    fn exposes(&self, tool: &str) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|a| a == tool))
    }

    /// Run the MCP handshake if it has not happened yet
    async fn session(&mut self) -> RegistryResult<&RunningService<RoleClient, ()>> {
        // Left as Closed if the handshake fails; the dropped transport kills the child
        self.connection = match std::mem::replace(&mut self.connection, Connection::Closed) {
            Connection::Spawned(transport) => {
                let name = self.spec.name.clone();
                tracing::debug!("Initializing MCP session with {}", name);

                let service = tokio::time::timeout(self.startup_timeout, ().serve(transport))
                    .await
                    .map_err(|_| RegistryError::StartupTimeout {
                        name: name.clone(),
                        timeout: self.startup_timeout,
                    })?
                    .map_err(|e| RegistryError::Handshake {
                        name,
                        message: e.to_string(),
                    })?;
                Connection::Ready(service)
            }
            other => other,
        };

        match &self.connection {
            Connection::Ready(service) => Ok(service),
            _ => Err(RegistryError::Closed(self.spec.name.clone())),
        }
    }

    /// Tools exposed through this handle, in server order.
    ///
    /// The first call performs the handshake and caches `tools/list`.
    pub async fn tools(&mut self) -> RegistryResult<Vec<ToolDescriptor>> {
        if self.tools.is_none() {
            let server = self.spec.name.clone();
            let timeout = self.startup_timeout;
            let service = self.session().await?;

            // Follows `nextCursor` until the server has listed everything
            let listed = tokio::time::timeout(timeout, service.list_all_tools())
                .await
                .map_err(|_| RegistryError::StartupTimeout {
                    name: server.clone(),
                    timeout,
                })?
                .map_err(|e| RegistryError::ToolCall {
                    server: server.clone(),
                    message: e.to_string(),
                })?;

            let tools = listed
                .into_iter()
                .map(|t| ToolDescriptor {
                    server: server.clone(),
                    name: t.name.to_string(),
                    description: t.description.map(|d| d.to_string()),
                    input_schema: serde_json::to_value(&t.input_schema).unwrap_or_default(),
                })
                .collect::<Vec<_>>();

            tracing::debug!("Server {} advertises {} tools", server, tools.len());
            self.tools = Some(tools);
        }

        Ok(self
            .tools
            .iter()
            .flatten()
            .filter(|t| self.exposes(&t.name))
            .cloned()
            .collect())
    }

    /// Invoke `tool` with JSON object `arguments`
    pub async fn call_tool(
        &mut self,
        tool: &str,
        arguments: Option<Value>,
    ) -> RegistryResult<CallToolResult> {
        if !self.exposes(tool) {
            return Err(RegistryError::ToolNotExposed {
                server: self.spec.name.clone(),
                tool: tool.to_string(),
            });
        }

        let server = self.spec.name.clone();
        let timeout = self.tool_timeout;
        let service = self.session().await?;

        tracing::debug!("Calling {} on {}", tool, server);

        let args = arguments.and_then(|v| v.as_object().cloned());
        tokio::time::timeout(
            timeout,
            service.call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments: args,
                task: None,
            }),
        )
        .await
        .map_err(|_| RegistryError::ToolTimeout {
            server: server.clone(),
            tool: tool.to_string(),
            timeout,
        })?
        .map_err(|e| RegistryError::ToolCall {
            server,
            message: e.to_string(),
        })
    }

    /// Shut the session down and wait for the transport to finish
    pub async fn close(&mut self) {
        match std::mem::replace(&mut self.connection, Connection::Closed) {
            Connection::Ready(service) => {
                if let Err(e) = service.cancel().await {
                    tracing::warn!("MCP server {} did not shut down cleanly: {}", self.spec.name, e);
                }
            }
            // Dropping the un-initialized transport kills the child
            Connection::Spawned(transport) => drop(transport),
            Connection::Closed => {}
        }
        tracing::debug!("Closed MCP server {}", self.spec.name);
    }
}

/// Concatenate the text parts of a tool result, one per line
pub fn result_text(result: &CallToolResult) -> String {
    let mut output = String::new();
    for content in &result.content {
        if !output.is_empty() {
            output.push('\n');
        }
        match &content.raw {
            RawContent::Text(text) => output.push_str(&text.text),
            other => output.push_str(&format!("{:?}", other)),
        }
    }
    output
}
