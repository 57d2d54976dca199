//! Registry-driven tool-server loading

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::descriptor::{LaunchSpec, RegistryDocument, ToolServerDescriptor};
use super::error::RegistryResult;
use super::handle::ToolServerHandle;
use super::resolve::PathResolver;

/// Current process environment overlaid with `overlay`.
///
/// Overlay values go through `$VAR` / `${VAR}` expansion against the current
/// environment; a value that cannot be expanded is used literally.
pub fn merged_env(overlay: &HashMap<String, String>) -> BTreeMap<OsString, OsString> {
    let mut env: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
    for (key, value) in overlay {
        let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
        env.insert(OsString::from(key), OsString::from(expanded.as_ref()));
    }
    env
}

/// Loads tool-servers named in an `mcpServers` JSON registry.
///
/// The file is re-read on every operation, so edits take effect without
/// rebuilding the registry.
#[derive(Debug, Clone)]
pub struct ToolServerRegistry {
    path: PathBuf,
    project_root: Option<PathBuf>,
}

impl ToolServerRegistry {
    /// Remember the registry location; nothing is read yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            project_root: None,
        }
    }

    /// Resolve relative paths against `root` instead of the derived project root
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolver(&self) -> PathResolver {
        let resolver = PathResolver::for_registry(&self.path);
        match &self.project_root {
            Some(root) => resolver.with_project_root(root.clone()),
            None => resolver,
        }
    }

    /// All descriptors in document order
    pub fn descriptors(&self) -> RegistryResult<Vec<(String, ToolServerDescriptor)>> {
        let document = RegistryDocument::read(&self.path)?;
        document
            .names()
            .map(|name| Ok((name.to_string(), document.descriptor(name)?)))
            .collect()
    }

    /// Resolve the launch for `name` without spawning anything
    pub fn prepare(&self, name: &str) -> RegistryResult<LaunchSpec> {
        let document = RegistryDocument::read(&self.path)?;
        let descriptor = document.descriptor(name)?;
        Ok(self.launch_spec(name, &descriptor, &self.resolver()))
    }

    fn launch_spec(
        &self,
        name: &str,
        descriptor: &ToolServerDescriptor,
        resolver: &PathResolver,
    ) -> LaunchSpec {
        LaunchSpec {
            name: name.to_string(),
            command: resolver.resolve_command(&descriptor.command),
            args: resolver.resolve_args(&descriptor.args, descriptor.path_args.as_deref()),
            env: merged_env(&descriptor.env),
            cwd: descriptor.cwd.as_deref().map(|dir| resolver.resolve_dir(dir)),
        }
    }

    /// Spawn the server registered as `name`.
    ///
    /// `tool_filter` restricts the tools the returned handle exposes.
    pub async fn load(
        &self,
        name: &str,
        tool_filter: Option<&[&str]>,
    ) -> RegistryResult<ToolServerHandle> {
        let spec = self.prepare(name)?;
        tracing::debug!(
            "Loading MCP server {}: {} {:?}",
            name,
            spec.command,
            spec.args
        );
        ToolServerHandle::spawn(spec, tool_filter)
    }

    /// Spawn every enabled server, skipping the ones that fail.
    ///
    /// Disabled entries are never started. A missing or unreadable registry
    /// yields an empty list.
    pub async fn load_all(&self) -> Vec<ToolServerHandle> {
        let document = match RegistryDocument::read(&self.path) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!("Cannot load MCP servers: {}", e);
                return Vec::new();
            }
        };
        let resolver = self.resolver();

        let mut handles = Vec::new();
        for name in document.names() {
            let descriptor = match document.descriptor(name) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    tracing::warn!("Skipping MCP server {}: {}", name, e);
                    continue;
                }
            };
            if descriptor.disabled {
                tracing::debug!("MCP server {} is disabled", name);
                continue;
            }

            let spec = self.launch_spec(name, &descriptor, &resolver);
            match ToolServerHandle::spawn(spec, None) {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::warn!("Failed to load MCP server {}: {}", name, e),
            }
        }

        tracing::info!("Loaded {} of {} MCP servers", handles.len(), document.len());
        handles
    }
}
