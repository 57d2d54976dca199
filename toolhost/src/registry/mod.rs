//! MCP tool-server registry
//!
//! Reads `{"mcpServers": {...}}` registry files, resolves each entry into a
//! concrete launch and spawns it as a scoped [`ToolServerHandle`].
//!
//! ```no_run
//! # async fn run() -> toolhost::registry::RegistryResult<()> {
//! use toolhost::registry::ToolServerRegistry;
//!
//! let registry = ToolServerRegistry::new("mcp_config.json");
//! let mut search = registry.load("search", None).await?;
//! for tool in search.tools().await? {
//!     println!("{}", tool.name);
//! }
//! search.close().await;
//! # Ok(())
//! # }
//! ```

mod descriptor;
mod error;
mod handle;
mod loader;
mod resolve;

pub use descriptor::{LaunchSpec, RegistryDocument, ToolServerDescriptor};
pub use error::{RegistryError, RegistryResult};
pub use handle::{
    result_text, ToolDescriptor, ToolServerHandle, DEFAULT_STARTUP_TIMEOUT, DEFAULT_TOOL_TIMEOUT,
};
pub use loader::{merged_env, ToolServerRegistry};
pub use resolve::{is_path_like, PathResolver};
