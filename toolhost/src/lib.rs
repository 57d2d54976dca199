//! Tool-server discovery and local inference backend supervision
//!
//! Two halves:
//! - [`registry`]: reads an `mcpServers` JSON registry, resolves commands,
//!   arguments and environment, and spawns MCP tool-servers as scoped handles.
//! - [`backend`]: starts, health-checks and stops local model servers
//!   (Ollama, llama.cpp, ComfyUI) so that one is active at a time.
//!
//! [`process`] holds the OS-level primitives both rely on.

pub mod backend;
pub mod config;
pub mod logging;
pub mod paths;
pub mod process;
pub mod registry;

pub use backend::{
    BackendConfig, BackendController, BackendError, BackendKind, BackendSet, BackendState,
    ServerController,
};
pub use config::{ConfigError, Settings};
pub use registry::{RegistryError, ToolDescriptor, ToolServerHandle, ToolServerRegistry};
