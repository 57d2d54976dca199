//! Per-backend data: ports, health endpoints, launch arguments
//!
//! The controller engine is generic; everything that differs between Ollama,
//! llama.cpp and ComfyUI lives in a [`BackendProfile`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::{BackendError, BackendResult};
use super::launch::LaunchCommand;
use crate::paths;

/// Supported inference backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Ollama,
    LlamaCpp,
    ComfyUi,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [Self::Ollama, Self::LlamaCpp, Self::ComfyUi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::LlamaCpp => "llama-cpp",
            Self::ComfyUi => "comfy-ui",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "ollama" => Ok(Self::Ollama),
            "llama-cpp" | "llamacpp" | "llama" => Ok(Self::LlamaCpp),
            "comfy-ui" | "comfyui" | "comfy" => Ok(Self::ComfyUi),
            other => Err(format!("unknown backend kind: {}", other)),
        }
    }
}

/// Settings for one backend, usually a `[backends.<name>]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Ollama tag or llama.cpp weights file name (relative to `models_dir`)
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub executable_path: Option<String>,
    pub models_dir: Option<String>,
    /// ComfyUI checkout containing `main.py`
    pub install_dir: Option<String>,
    pub context_size: Option<u32>,
    pub gpu_layers: Option<u32>,
    pub parallel: Option<u32>,
    pub startup_attempts: Option<u32>,
    pub log_file: Option<String>,
}

impl BackendConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn executable(&self) -> Option<PathBuf> {
        self.executable_path.as_deref().map(paths::expand_path)
    }

    pub fn models_dir(&self) -> Option<PathBuf> {
        self.models_dir.as_deref().map(paths::expand_path)
    }

    pub fn install_dir(&self) -> Option<PathBuf> {
        self.install_dir.as_deref().map(paths::expand_path)
    }

    /// Configured log file, or the per-kind default under the cache dir
    pub fn log_file(&self) -> PathBuf {
        self.log_file
            .as_deref()
            .map(paths::expand_path)
            .unwrap_or_else(|| paths::backend_log_file(self.kind))
    }
}

/// Where a backend listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// API base URL without a trailing slash
    pub base_url: String,
}

impl Endpoint {
    /// Derive host and port from `base_url`, falling back to profile defaults
    pub fn resolve(profile: &BackendProfile, base_url: Option<&str>) -> BackendResult<Self> {
        let raw = base_url.unwrap_or(profile.default_base_url);
        let url = Url::parse(raw).map_err(|source| BackendError::InvalidBaseUrl {
            url: raw.to_string(),
            source,
        })?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            host: url.host_str().unwrap_or("127.0.0.1").to_string(),
            port: explicit_port(&url, raw).unwrap_or(profile.default_port),
            base_url: raw.trim_end_matches('/').to_string(),
        })
    }

    /// `scheme://host:port`
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Port written in `raw`, including one equal to the scheme default.
///
/// `Url::port` hides `:80` on http and `:443` on https, so the authority is
/// checked for a spelled-out port before trusting the known default.
fn explicit_port(url: &Url, raw: &str) -> Option<u16> {
    if let Some(port) = url.port() {
        return Some(port);
    }

    let rest = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    // IPv6 literals carry colons inside the brackets
    let tail = host_port.rsplit_once(']').map_or(host_port, |(_, tail)| tail);
    let spelled_out = tail
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()));

    if spelled_out {
        url.port_or_known_default()
    } else {
        None
    }
}

/// Why a launch could not be assembled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchBlocker {
    /// Required settings are absent; reported as an error
    NotConfigured(String),
    /// Settings point at files that do not exist; reported as a failed start
    Missing(String),
}

/// Static description of a backend family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendProfile {
    pub kind: BackendKind,
    pub default_port: u16,
    pub default_base_url: &'static str,
    /// Substring of the server's process name, used when killing strays
    pub process_name: Option<&'static str>,
    /// Whether the configured executable's file name identifies the server
    pub match_executable_name: bool,
    /// Programs looked up on `PATH` when no executable is configured
    pub default_entrypoints: &'static [&'static str],
    pub startup_attempts: u32,
    /// Kill whatever holds the port before launching
    pub clean_slate: bool,
}

impl BackendProfile {
    pub fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Ollama => Self {
                kind,
                default_port: 11434,
                default_base_url: "http://localhost:11434/v1",
                process_name: Some("ollama"),
                match_executable_name: true,
                default_entrypoints: &["ollama"],
                startup_attempts: 15,
                clean_slate: false,
            },
            BackendKind::LlamaCpp => Self {
                kind,
                default_port: 8080,
                default_base_url: "http://localhost:8080/v1",
                process_name: Some("llama-server"),
                match_executable_name: true,
                default_entrypoints: &["llama-server"],
                startup_attempts: 30,
                clean_slate: true,
            },
            // The executable is a Python interpreter, so neither name is safe to match
            BackendKind::ComfyUi => Self {
                kind,
                default_port: 8188,
                default_base_url: "http://127.0.0.1:8188",
                process_name: None,
                match_executable_name: false,
                default_entrypoints: &["python3", "python"],
                startup_attempts: 30,
                clean_slate: false,
            },
        }
    }

    /// URLs tried in order by the health check; any 2xx counts as healthy
    pub fn health_urls(&self, endpoint: &Endpoint) -> Vec<String> {
        match self.kind {
            BackendKind::Ollama => vec![format!("{}/api/tags", endpoint.origin())],
            BackendKind::LlamaCpp => {
                let root = endpoint
                    .base_url
                    .strip_suffix("/v1")
                    .unwrap_or(&endpoint.base_url);
                vec![
                    format!("{}/health", root),
                    format!("{}/models", endpoint.base_url),
                ]
            }
            BackendKind::ComfyUi => vec![format!("{}/", endpoint.origin())],
        }
    }

    /// Configured executable or the first default entrypoint found on `PATH`
    fn program(&self, config: &BackendConfig) -> Result<PathBuf, LaunchBlocker> {
        if let Some(exe) = config.executable() {
            if !exe.exists() {
                return Err(LaunchBlocker::Missing(format!(
                    "executable not found: {}",
                    exe.display()
                )));
            }
            return Ok(exe);
        }

        self.default_entrypoints
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| {
                LaunchBlocker::NotConfigured(format!(
                    "executable_path not set and {} not found on PATH",
                    self.default_entrypoints.join("/")
                ))
            })
    }

    /// Assemble the launch for this backend.
    ///
    /// Required-setting checks run before any filesystem checks so a
    /// half-configured backend is always reported as not configured.
    pub fn plan_launch(
        &self,
        config: &BackendConfig,
        endpoint: &Endpoint,
    ) -> Result<LaunchCommand, LaunchBlocker> {
        let mut command = match self.kind {
            BackendKind::Ollama => {
                let program = self.program(config)?;
                LaunchCommand::new(program)
                    .arg("serve")
                    .env("OLLAMA_HOST", format!("{}:{}", endpoint.host, endpoint.port))
            }
            BackendKind::LlamaCpp => {
                let (models_dir, model) = match (config.models_dir(), config.model.as_deref()) {
                    (Some(dir), Some(model)) => (dir, model),
                    _ => {
                        return Err(LaunchBlocker::NotConfigured(
                            "models_dir and model are required".to_string(),
                        ))
                    }
                };
                let program = self.program(config)?;
                let weights = models_dir.join(model);
                if !weights.exists() {
                    return Err(LaunchBlocker::Missing(format!(
                        "model file not found: {}",
                        weights.display()
                    )));
                }

                LaunchCommand::new(program)
                    .arg("-m")
                    .arg(weights.to_string_lossy())
                    .arg("--port")
                    .arg(endpoint.port.to_string())
                    .arg("--host")
                    .arg(&endpoint.host)
                    .arg("--ctx-size")
                    .arg(config.context_size.unwrap_or(8192).to_string())
                    .arg("--n-gpu-layers")
                    .arg(config.gpu_layers.unwrap_or(35).to_string())
                    .arg("--parallel")
                    .arg(config.parallel.unwrap_or(1).to_string())
            }
            BackendKind::ComfyUi => {
                let install_dir = config.install_dir().ok_or_else(|| {
                    LaunchBlocker::NotConfigured("install_dir is required".to_string())
                })?;
                let program = self.program(config)?;
                if !install_dir.join("main.py").exists() {
                    return Err(LaunchBlocker::Missing(format!(
                        "main.py not found in {}",
                        install_dir.display()
                    )));
                }

                LaunchCommand::new(program)
                    .arg("main.py")
                    .arg("--listen")
                    .arg(&endpoint.host)
                    .arg("--port")
                    .arg(endpoint.port.to_string())
                    .current_dir(install_dir)
            }
        };

        command.log_file = Some(config.log_file());
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn endpoint(kind: BackendKind, base_url: Option<&str>) -> Endpoint {
        Endpoint::resolve(&BackendProfile::for_kind(kind), base_url).unwrap()
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!("LlamaCpp".parse::<BackendKind>().unwrap(), BackendKind::LlamaCpp);
        assert!("vllm".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_default_endpoints() {
        let ollama = endpoint(BackendKind::Ollama, None);
        assert_eq!((ollama.host.as_str(), ollama.port), ("localhost", 11434));

        let llama = endpoint(BackendKind::LlamaCpp, None);
        assert_eq!(llama.port, 8080);

        let comfy = endpoint(BackendKind::ComfyUi, None);
        assert_eq!((comfy.host.as_str(), comfy.port), ("127.0.0.1", 8188));
    }

    #[test]
    fn test_missing_port_uses_profile_default() {
        let e = endpoint(BackendKind::LlamaCpp, Some("http://gpu-box/v1"));
        assert_eq!(e.host, "gpu-box");
        assert_eq!(e.port, 8080);
        assert_eq!(e.base_url, "http://gpu-box/v1");
    }

    #[test]
    fn test_scheme_default_port_is_kept_when_written() {
        let http = endpoint(BackendKind::Ollama, Some("http://127.0.0.1:80/v1"));
        assert_eq!(http.port, 80);
        assert_eq!(http.origin(), "http://127.0.0.1:80");

        let https = endpoint(BackendKind::LlamaCpp, Some("https://gpu-box:443/v1"));
        assert_eq!(https.port, 443);

        let v6 = endpoint(BackendKind::ComfyUi, Some("http://user@[::1]:80/"));
        assert_eq!(v6.port, 80);

        // Not written at all: profile default, not the scheme default
        let bare = endpoint(BackendKind::Ollama, Some("https://[::1]/v1"));
        assert_eq!(bare.port, 11434);
        let empty = endpoint(BackendKind::Ollama, Some("http://ollama-host:/v1"));
        assert_eq!(empty.port, 11434);
    }

    #[test]
    fn test_invalid_base_url() {
        let err = Endpoint::resolve(&BackendProfile::for_kind(BackendKind::Ollama), Some("not a url"))
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn test_health_urls() {
        let ollama = BackendProfile::for_kind(BackendKind::Ollama);
        assert_eq!(
            ollama.health_urls(&endpoint(BackendKind::Ollama, Some("http://localhost:11434/v1"))),
            vec!["http://localhost:11434/api/tags"]
        );

        let llama = BackendProfile::for_kind(BackendKind::LlamaCpp);
        assert_eq!(
            llama.health_urls(&endpoint(BackendKind::LlamaCpp, Some("http://localhost:9000/v1/"))),
            vec!["http://localhost:9000/health", "http://localhost:9000/v1/models"]
        );

        let comfy = BackendProfile::for_kind(BackendKind::ComfyUi);
        assert_eq!(
            comfy.health_urls(&endpoint(BackendKind::ComfyUi, None)),
            vec!["http://127.0.0.1:8188/"]
        );
    }

    #[test]
    fn test_configured_executable_missing() {
        let profile = BackendProfile::for_kind(BackendKind::Ollama);
        let mut config = BackendConfig::new(BackendKind::Ollama);
        config.executable_path = Some("/nonexistent/ollama".to_string());

        let blocker = profile
            .plan_launch(&config, &endpoint(BackendKind::Ollama, None))
            .unwrap_err();
        assert!(matches!(blocker, LaunchBlocker::Missing(_)));
    }

    #[test]
    fn test_llama_requires_models_dir() {
        let profile = BackendProfile::for_kind(BackendKind::LlamaCpp);
        let mut config = BackendConfig::new(BackendKind::LlamaCpp);
        config.executable_path = Some("/nonexistent/llama-server".to_string());

        let blocker = profile
            .plan_launch(&config, &endpoint(BackendKind::LlamaCpp, None))
            .unwrap_err();
        assert!(matches!(blocker, LaunchBlocker::NotConfigured(_)));
    }

    #[test]
    fn test_llama_missing_weights() {
        let tmp = TempDir::new().unwrap();
        let exe = tmp.path().join("llama-server");
        fs::write(&exe, "").unwrap();

        let profile = BackendProfile::for_kind(BackendKind::LlamaCpp);
        let mut config = BackendConfig::new(BackendKind::LlamaCpp);
        config.executable_path = Some(exe.to_string_lossy().into_owned());
        config.models_dir = Some(tmp.path().to_string_lossy().into_owned());
        config.model = Some("missing.gguf".to_string());

        match profile.plan_launch(&config, &endpoint(BackendKind::LlamaCpp, None)) {
            Err(LaunchBlocker::Missing(reason)) => assert!(reason.contains("missing.gguf")),
            other => panic!("expected missing weights, got {:?}", other),
        }
    }

    #[test]
    fn test_llama_launch_arguments() {
        let tmp = TempDir::new().unwrap();
        let exe = tmp.path().join("llama-server");
        fs::write(&exe, "").unwrap();
        fs::write(tmp.path().join("qwen.gguf"), "").unwrap();

        let profile = BackendProfile::for_kind(BackendKind::LlamaCpp);
        let mut config = BackendConfig::new(BackendKind::LlamaCpp);
        config.executable_path = Some(exe.to_string_lossy().into_owned());
        config.models_dir = Some(tmp.path().to_string_lossy().into_owned());
        config.model = Some("qwen.gguf".to_string());
        config.context_size = Some(4096);
        config.log_file = Some(tmp.path().join("l.log").to_string_lossy().into_owned());

        let command = profile
            .plan_launch(&config, &endpoint(BackendKind::LlamaCpp, Some("http://127.0.0.1:8081/v1")))
            .unwrap();
        assert_eq!(command.program, exe);
        assert_eq!(
            command.args,
            vec![
                "-m".to_string(),
                tmp.path().join("qwen.gguf").to_string_lossy().into_owned(),
                "--port".into(),
                "8081".into(),
                "--host".into(),
                "127.0.0.1".into(),
                "--ctx-size".into(),
                "4096".into(),
                "--n-gpu-layers".into(),
                "35".into(),
                "--parallel".into(),
                "1".into(),
            ]
        );
        assert_eq!(command.log_file, Some(tmp.path().join("l.log")));
    }

    #[test]
    fn test_ollama_sets_host_env() {
        let tmp = TempDir::new().unwrap();
        let exe = tmp.path().join("ollama");
        fs::write(&exe, "").unwrap();

        let profile = BackendProfile::for_kind(BackendKind::Ollama);
        let mut config = BackendConfig::new(BackendKind::Ollama);
        config.executable_path = Some(exe.to_string_lossy().into_owned());

        let command = profile
            .plan_launch(&config, &endpoint(BackendKind::Ollama, Some("http://0.0.0.0:11500")))
            .unwrap();
        assert_eq!(command.args, vec!["serve"]);
        assert_eq!(
            command.env,
            vec![("OLLAMA_HOST".to_string(), "0.0.0.0:11500".to_string())]
        );
    }

    #[test]
    fn test_comfy_requires_main_py() {
        let tmp = TempDir::new().unwrap();
        let python = tmp.path().join("python");
        fs::write(&python, "").unwrap();

        let profile = BackendProfile::for_kind(BackendKind::ComfyUi);
        let mut config = BackendConfig::new(BackendKind::ComfyUi);
        config.executable_path = Some(python.to_string_lossy().into_owned());
        config.install_dir = Some(tmp.path().to_string_lossy().into_owned());

        let e = endpoint(BackendKind::ComfyUi, None);
        assert!(matches!(
            profile.plan_launch(&config, &e),
            Err(LaunchBlocker::Missing(_))
        ));

        fs::write(tmp.path().join("main.py"), "").unwrap();
        let command = profile.plan_launch(&config, &e).unwrap();
        assert_eq!(command.cwd.as_deref(), Some(tmp.path()));
        assert_eq!(command.args[0], "main.py");
    }

    #[test]
    fn test_comfy_without_install_dir_is_not_configured() {
        let profile = BackendProfile::for_kind(BackendKind::ComfyUi);
        let config = BackendConfig::new(BackendKind::ComfyUi);
        assert!(matches!(
            profile.plan_launch(&config, &endpoint(BackendKind::ComfyUi, None)),
            Err(LaunchBlocker::NotConfigured(_))
        ));
    }
}
