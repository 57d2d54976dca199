//! Configuration file loading (`.toolhost.toml`)
//!
//! Search order:
//! 1. Walk up the directory tree from the cwd
//! 2. `~/.config/toolhost/<file>` (global fallback)
//! 3. Built-in defaults (a single Ollama backend)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::backend::{BackendConfig, BackendController, BackendKind, BackendResult, BackendSet};
use crate::paths;

/// Settings file name
pub const SETTINGS_FILE: &str = ".toolhost.toml";

/// Registry file looked up when settings name none
pub const REGISTRY_FILE: &str = ".mcp.json";

/// Errors loading the settings file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// `--backend` names neither a configured backend nor a backend kind
    #[error("no backend named '{0}' in configuration")]
    UnknownBackend(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Walk up from `start` looking for `filename`
fn find_upwards(start: &Path, filename: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(filename))
        .find(|candidate| candidate.exists())
}

/// Find a config file from the cwd upwards, then in the global config dir
pub fn find_config_file(filename: &str) -> Option<PathBuf> {
    if let Some(found) = std::env::current_dir()
        .ok()
        .and_then(|cwd| find_upwards(&cwd, filename))
    {
        return Some(found);
    }

    // Fallback: Check global config
    dirs::config_dir()
        .map(|dir| dir.join("toolhost").join(filename))
        .filter(|path| path.exists())
}

/// Top-level settings (from `.toolhost.toml`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// MCP registry path, relative to the settings file
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub default_backend: Option<String>,
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
    #[serde(skip)]
    source: Option<PathBuf>,
}

impl Settings {
    /// Load settings using the standard search order
    pub fn load() -> ConfigResult<Self> {
        if let Some(path) = find_config_file(SETTINGS_FILE) {
            tracing::debug!("Loading config from: {}", path.display());
            return Self::load_from_path(&path);
        }

        tracing::debug!("No {} found, using defaults", SETTINGS_FILE);
        Ok(Self::default())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Settings =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.source = Some(path.to_path_buf());
        Ok(settings)
    }

    /// File these settings were read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Registry file: configured path, else the nearest `.mcp.json`
    pub fn registry_path(&self) -> Option<PathBuf> {
        match &self.registry {
            Some(raw) => {
                let path = paths::expand_path(raw);
                let base = self.source.as_deref().and_then(Path::parent);
                Some(match base {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path,
                })
            }
            None => find_config_file(REGISTRY_FILE),
        }
    }

    /// Configured backends, or a lone default Ollama backend
    pub fn backends(&self) -> BTreeMap<String, BackendConfig> {
        if self.backends.is_empty() {
            let mut defaults = BTreeMap::new();
            defaults.insert(
                BackendKind::Ollama.to_string(),
                BackendConfig::new(BackendKind::Ollama),
            );
            return defaults;
        }
        self.backends.clone()
    }

    /// Pick a backend by name, falling back to `default_backend` and then to
    /// the first configured one.
    ///
    /// A name that is not configured but parses as a backend kind yields that
    /// kind with default settings.
    pub fn backend(&self, name: Option<&str>) -> ConfigResult<(String, BackendConfig)> {
        let backends = self.backends();
        let wanted = name.or(self.default_backend.as_deref());

        match wanted {
            Some(wanted) => {
                if let Some(config) = backends.get(wanted) {
                    return Ok((wanted.to_string(), config.clone()));
                }
                wanted
                    .parse::<BackendKind>()
                    .map(|kind| (wanted.to_string(), BackendConfig::new(kind)))
                    .map_err(|_| ConfigError::UnknownBackend(wanted.to_string()))
            }
            None => backends
                .into_iter()
                .next()
                .ok_or_else(|| ConfigError::UnknownBackend(String::new())),
        }
    }

    /// A controller for every configured backend
    pub fn backend_set(&self) -> BackendResult<BackendSet> {
        let mut set = BackendSet::new();
        for (name, config) in self.backends() {
            set.insert(name, Box::new(BackendController::new(config)?));
        }
        Ok(set)
    }
}
