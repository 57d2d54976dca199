//! Relative path resolution for tool-server commands and arguments
//!
//! Registry files live somewhere inside a project tree but name scripts
//! relative to the project root (`mcp_servers/foo/server.py`) or to the file
//! itself. A relative path is tried against the project root first, then the
//! registry directory; the first existing candidate wins and anything else is
//! passed through untouched so the spawn reports the real error.

use std::path::{Component, Path, PathBuf};

/// File suffixes that mark a bare argument as a server entrypoint
const ENTRYPOINT_SUFFIXES: &[&str] = &[
    ".py", ".js", ".mjs", ".cjs", ".ts", ".sh", ".ps1", ".bat", ".exe", ".jar",
];

/// Heuristic used when a descriptor does not list its path arguments.
///
/// Flags and URLs are never treated as paths even when they contain a slash.
pub fn is_path_like(arg: &str) -> bool {
    if arg.is_empty() || arg.starts_with('-') || arg.contains("://") {
        return false;
    }
    if Path::new(arg).is_absolute() {
        return false;
    }

    let lower = arg.to_ascii_lowercase();
    arg.contains('/')
        || arg.contains('\\')
        || ENTRYPOINT_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Lexically drop `.` components and fold `..` where possible
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolves relative paths against a project root and the registry directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    project_root: PathBuf,
    registry_dir: PathBuf,
}

impl PathResolver {
    pub fn new(project_root: impl Into<PathBuf>, registry_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            registry_dir: registry_dir.into(),
        }
    }

    /// Derive the search roots from the registry file location.
    ///
    /// The project root is two levels above the registry file's directory
    /// (e.g. `<root>/examples/<app>/mcp.json`).
    pub fn for_registry(registry_path: &Path) -> Self {
        let absolute = if registry_path.is_absolute() {
            registry_path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(registry_path))
                .unwrap_or_else(|_| registry_path.to_path_buf())
        };
        let absolute = normalize(&absolute);

        let registry_dir = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let project_root = registry_dir
            .ancestors()
            .nth(2)
            .or_else(|| registry_dir.ancestors().last())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| registry_dir.clone());

        Self::new(project_root, registry_dir)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn registry_dir(&self) -> &Path {
        &self.registry_dir
    }

    /// Replace the project root, keeping the registry directory
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    /// First existing candidate for a relative path, if any
    fn locate(&self, relative: &str) -> Option<PathBuf> {
        [&self.project_root, &self.registry_dir]
            .into_iter()
            .map(|base| normalize(&base.join(relative)))
            .find(|candidate| candidate.exists())
    }

    /// Resolve the executable of a tool-server.
    ///
    /// Absolute paths and names found on `PATH` are returned unchanged.
    pub fn resolve_command(&self, command: &str) -> String {
        if command.is_empty() || Path::new(command).is_absolute() {
            return command.to_string();
        }
        if which::which(command).is_ok() {
            return command.to_string();
        }
        match self.locate(command) {
            Some(found) => {
                tracing::debug!("resolved command '{}' to {}", command, found.display());
                found.to_string_lossy().into_owned()
            }
            None => command.to_string(),
        }
    }

    /// Resolve a single path argument (no `PATH` lookup)
    pub fn resolve_path_arg(&self, arg: &str) -> String {
        if arg.is_empty() || Path::new(arg).is_absolute() {
            return arg.to_string();
        }
        self.locate(arg)
            .map(|found| found.to_string_lossy().into_owned())
            .unwrap_or_else(|| arg.to_string())
    }

    /// Resolve an argument list.
    ///
    /// With `path_args` only the listed indices are resolved; otherwise each
    /// argument goes through [`is_path_like`].
    pub fn resolve_args(&self, args: &[String], path_args: Option<&[usize]>) -> Vec<String> {
        args.iter()
            .enumerate()
            .map(|(index, arg)| {
                let eligible = match path_args {
                    Some(indices) => indices.contains(&index),
                    None => is_path_like(arg),
                };
                if eligible {
                    self.resolve_path_arg(arg)
                } else {
                    arg.clone()
                }
            })
            .collect()
    }

    /// Resolve a working directory; unresolvable relative dirs stay relative
    pub fn resolve_dir(&self, dir: &str) -> PathBuf {
        PathBuf::from(self.resolve_path_arg(dir))
    }
}
