//! Error types for tool-server registry operations

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading or talking to a tool-server
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The registry file does not exist
    #[error("MCP registry file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The registry file exists but could not be read
    #[error("failed to read MCP registry {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The registry file is not valid JSON of the expected shape
    #[error("failed to parse MCP registry {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// No `mcpServers` entry with this name
    #[error("server '{0}' not found in MCP registry")]
    ServerNotFound(String),

    /// The OS refused to start the tool-server process
    #[error("failed to spawn MCP server '{name}' ({command}): {source}")]
    SpawnFailure {
        name: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The MCP initialize handshake failed
    #[error("MCP server '{name}' failed to initialize: {message}")]
    Handshake { name: String, message: String },

    /// The MCP initialize handshake did not finish in time
    #[error("MCP server '{name}' startup timed out after {timeout:?}")]
    StartupTimeout { name: String, timeout: Duration },

    /// The tool exists but was excluded by the handle's tool filter
    #[error("tool '{tool}' is not exposed by handle for server '{server}'")]
    ToolNotExposed { server: String, tool: String },

    /// The server rejected or failed a request
    #[error("MCP request to server '{server}' failed: {message}")]
    ToolCall { server: String, message: String },

    /// A tool call did not complete in time
    #[error("tool '{tool}' on server '{server}' timed out after {timeout:?}")]
    ToolTimeout {
        server: String,
        tool: String,
        timeout: Duration,
    },

    /// The handle's subprocess has already been shut down
    #[error("MCP server '{0}' connection is closed")]
    Closed(String),
}

/// Result type alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;
