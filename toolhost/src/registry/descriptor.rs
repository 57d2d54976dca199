//! Registry document model (`{"mcpServers": {...}}`)

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::error::{RegistryError, RegistryResult};

/// One named entry under `mcpServers`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerDescriptor {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
    /// Working directory for the subprocess (resolved like a path argument)
    #[serde(default)]
    pub cwd: Option<String>,
    /// Indices of `args` that are filesystem paths. Disables the path heuristic.
    #[serde(default)]
    pub path_args: Option<Vec<usize>>,
}

/// Fully resolved process launch for one tool-server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Complete environment for the child (current environment plus overlay)
    pub env: BTreeMap<OsString, OsString>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: serde_json::Map<String, Value>,
}

/// A registry file as read from disk at one point in time.
///
/// Entries keep document order. Each entry is decoded on demand so a single
/// malformed server does not hide the others.
#[derive(Debug, Clone)]
pub struct RegistryDocument {
    path: PathBuf,
    entries: Vec<(String, Value)>,
}

impl RegistryDocument {
    /// Read and parse the registry file at `path`
    pub fn read(path: &Path) -> RegistryResult<Self> {
        if !path.exists() {
            return Err(RegistryError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(path, &content)
    }

    pub(crate) fn parse(path: &Path, content: &str) -> RegistryResult<Self> {
        let raw: RawDocument =
            serde_json::from_str(content).map_err(|source| RegistryError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            entries: raw.mcp_servers.into_iter().collect(),
        })
    }

    /// Server names in document order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Decode the descriptor registered under `name`
    pub fn descriptor(&self, name: &str) -> RegistryResult<ToolServerDescriptor> {
        let value = self
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| RegistryError::ServerNotFound(name.to_string()))?;

        ToolServerDescriptor::deserialize(value).map_err(|source| RegistryError::ConfigParse {
            path: self.path.clone(),
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
