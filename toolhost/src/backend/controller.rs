//! Backend server supervision
//!
//! [`BackendController`] drives one local inference server through
//! `NotRunning -> Starting -> {Healthy | FailedToStart}` and back to
//! `NotRunning` on stop. Health probing, process inspection and launching are
//! injected so the state machine can be tested without real servers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;

use super::error::{BackendError, BackendResult};
use super::launch::{DetachedLauncher, Launcher};
use super::ollama::{has_model, OllamaApi, DEFAULT_PULL_TIMEOUT};
use super::profile::{BackendConfig, BackendKind, BackendProfile, Endpoint, LaunchBlocker};
use crate::process::{
    HealthProbe, HttpProbe, ProcessInspector, SystemInspector, Termination, DEFAULT_PROBE_TIMEOUT,
};

/// Delay between health polls while a server starts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on waiting for a killed or stopped process to exit
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a supervised backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendState {
    NotRunning,
    Starting,
    Healthy,
    FailedToStart { reason: String },
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendState::NotRunning => write!(f, "not running"),
            BackendState::Starting => write!(f, "starting"),
            BackendState::Healthy => write!(f, "healthy"),
            BackendState::FailedToStart { reason } => write!(f, "failed to start: {}", reason),
        }
    }
}

/// Lifecycle operations shared by every inference backend
#[async_trait]
pub trait ServerController: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Last state recorded by a lifecycle operation
    fn state(&self) -> BackendState;

    /// Probe the server's health endpoints. Never fails.
    async fn check_status(&self) -> bool;

    /// Start the server unless it already answers.
    ///
    /// `Ok(false)` covers every failure that configuration can't fix from
    /// here (missing files, spawn errors, health timeout). Errors are
    /// reserved for missing configuration.
    async fn start_server(&mut self) -> BackendResult<bool>;

    async fn ensure_server_running(&mut self) -> BackendResult<bool>;

    /// Stop the server. Returns true when nothing is known to survive.
    async fn stop_server(&mut self) -> bool;

    /// Kill every process that looks like this backend or holds its port.
    ///
    /// Returns how many processes were confirmed gone.
    async fn kill_existing_process(&mut self) -> usize;

    /// Make the configured model available. `false` means degraded, not fatal.
    async fn prepare_model(&mut self) -> bool;

    /// Ask the server to load the configured model ahead of the first request
    async fn warm_model(&self) -> bool {
        true
    }

    /// Health polls a start waits through before giving up
    fn startup_attempts(&self) -> u32;

    /// [`ServerController::ensure_server_running`] with failures as errors
    async fn require_running(&mut self) -> BackendResult<()> {
        if self.ensure_server_running().await? {
            return Ok(());
        }
        Err(match self.state() {
            BackendState::FailedToStart { reason } => BackendError::FailedToStart {
                kind: self.kind(),
                reason,
            },
            _ => BackendError::HealthTimeout {
                kind: self.kind(),
                attempts: self.startup_attempts(),
            },
        })
    }
}

/// Generic controller parameterised by a [`BackendProfile`]
pub struct BackendController {
    profile: BackendProfile,
    config: BackendConfig,
    endpoint: Endpoint,
    probe: Arc<dyn HealthProbe>,
    inspector: Arc<dyn ProcessInspector>,
    launcher: Arc<dyn Launcher>,
    poll_interval: Duration,
    probe_timeout: Duration,
    stop_timeout: Duration,
    pull_timeout: Duration,
    state: BackendState,
    /// Server process started by this controller
    child: Option<Child>,
}

impl std::fmt::Debug for BackendController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendController")
            .field("kind", &self.profile.kind)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("child", &self.child.as_ref().and_then(|c| c.id()))
            .finish()
    }
}

impl BackendController {
    /// Build a controller with the real probe, inspector and launcher
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        let profile = BackendProfile::for_kind(config.kind);
        let endpoint = Endpoint::resolve(&profile, config.base_url.as_deref())?;

        Ok(Self {
            profile,
            config,
            endpoint,
            probe: Arc::new(HttpProbe::new()),
            inspector: Arc::new(SystemInspector::new()),
            launcher: Arc::new(DetachedLauncher),
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            state: BackendState::NotRunning,
            child: None,
        })
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn ProcessInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    /// PID of the server process this controller started, if any
    pub fn child_pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    fn fail(&mut self, reason: impl Into<String>) {
        self.state = BackendState::FailedToStart {
            reason: reason.into(),
        };
    }

    /// Gracefully stop an owned server and its process tree, escalating to
    /// hard kills. True only when nothing is known to survive.
    async fn stop_owned(&self, mut child: Child) -> bool {
        let Some(pid) = child.id() else {
            // Already reaped
            return true;
        };

        let mut lingering = Vec::new();
        for descendant in self.inspector.descendants_of(pid).await {
            if !self
                .inspector
                .terminate(descendant.pid, Termination::Graceful, self.stop_timeout)
                .await
            {
                lingering.push(descendant);
            }
        }
        self.inspector
            .terminate(pid, Termination::Graceful, self.stop_timeout)
            .await;

        let mut clean = match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(pid, %status, "backend process exited");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(pid, "failed to wait for backend process: {}", e);
                false
            }
            Err(_) => {
                tracing::warn!(pid, "backend ignored SIGTERM after {:?}, killing", self.stop_timeout);
                match child.kill().await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            "{}: {}",
                            BackendError::TerminationFailure {
                                pid,
                                name: self.profile.kind.to_string(),
                            },
                            e
                        );
                        false
                    }
                }
            }
        };

        for descendant in lingering {
            tracing::warn!(
                pid = descendant.pid,
                "{} ignored SIGTERM, killing",
                descendant.name
            );
            if !self
                .inspector
                .terminate(descendant.pid, Termination::Forced, self.stop_timeout)
                .await
            {
                tracing::warn!(
                    "{}",
                    BackendError::TerminationFailure {
                        pid: descendant.pid,
                        name: descendant.name,
                    }
                );
                clean = false;
            }
        }

        clean
    }

    /// Force-kill matching processes; returns (confirmed gone, survivors)
    async fn kill_matching(&mut self) -> (usize, usize) {
        let own = std::process::id();
        let mut targets: BTreeMap<u32, String> = BTreeMap::new();

        if let Some(name) = self.profile.process_name {
            for p in self.inspector.processes_by_name(name).await {
                targets.insert(p.pid, p.name);
            }
        }
        if self.profile.match_executable_name {
            let stem = self
                .config
                .executable()
                .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()));
            if let Some(stem) = stem.filter(|s| !s.is_empty()) {
                for p in self.inspector.processes_by_name(&stem).await {
                    targets.insert(p.pid, p.name);
                }
            }
        }
        for p in self.inspector.processes_on_port(self.endpoint.port).await {
            targets.insert(p.pid, p.name);
        }
        targets.remove(&own);

        if targets.is_empty() {
            tracing::info!(
                "No existing {} process found on port {}",
                self.profile.kind,
                self.endpoint.port
            );
            return (0, 0);
        }

        let mut killed = 0;
        let mut survivors = 0;
        for (pid, name) in targets {
            tracing::warn!("Found process {} (PID: {}). Killing...", name, pid);
            if self
                .inspector
                .terminate(pid, Termination::Forced, self.stop_timeout)
                .await
            {
                killed += 1;
            } else {
                survivors += 1;
                tracing::warn!("{}", BackendError::TerminationFailure { pid, name });
            }
        }

        // Reap our own server if it was among the victims
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(Some(_))) {
                self.child = None;
            }
        }
        if killed > 0 {
            self.state = BackendState::NotRunning;
        }

        (killed, survivors)
    }
}

#[async_trait]
impl ServerController for BackendController {
    fn kind(&self) -> BackendKind {
        self.profile.kind
    }

    fn state(&self) -> BackendState {
        self.state.clone()
    }

    fn startup_attempts(&self) -> u32 {
        self.config
            .startup_attempts
            .unwrap_or(self.profile.startup_attempts)
            .max(1)
    }

    async fn check_status(&self) -> bool {
        for url in self.profile.health_urls(&self.endpoint) {
            if self.probe.probe(&url, self.probe_timeout).await {
                return true;
            }
        }
        false
    }

    async fn start_server(&mut self) -> BackendResult<bool> {
        let kind = self.profile.kind;
        if self.check_status().await {
            tracing::info!("{} server is already running", kind);
            self.state = BackendState::Healthy;
            return Ok(true);
        }

        let command = match self.profile.plan_launch(&self.config, &self.endpoint) {
            Ok(command) => command,
            Err(LaunchBlocker::NotConfigured(reason)) => {
                self.fail(reason.clone());
                return Err(BackendError::BackendNotConfigured { kind, reason });
            }
            Err(LaunchBlocker::Missing(reason)) => {
                tracing::error!("Cannot start {} server: {}", kind, reason);
                self.fail(reason);
                return Ok(false);
            }
        };

        // A previous launch that never became healthy
        if let Some(stale) = self.child.take() {
            self.stop_owned(stale).await;
        }
        if self.profile.clean_slate {
            self.kill_existing_process().await;
        }

        tracing::info!("Starting {} server: {}", kind, command.display());
        self.state = BackendState::Starting;
        let child = match self.launcher.launch(&command) {
            Ok(child) => child,
            Err(source) => {
                let err = BackendError::SpawnFailure {
                    kind,
                    program: command.program.display().to_string(),
                    source,
                };
                tracing::error!("{}", err);
                self.fail(err.to_string());
                return Ok(false);
            }
        };
        tracing::debug!(pid = ?child.id(), "spawned {} server", kind);
        self.child = Some(child);

        let attempts = self.startup_attempts();
        for attempt in 1..=attempts {
            tokio::time::sleep(self.poll_interval).await;

            if self.check_status().await {
                tracing::info!("{} server started successfully", kind);
                self.state = BackendState::Healthy;
                return Ok(true);
            }

            let exited = match self.child.as_mut().map(|c| c.try_wait()) {
                Some(Ok(Some(status))) => Some(status.to_string()),
                _ => None,
            };
            if let Some(status) = exited {
                self.child = None;
                let reason = format!("server process exited during startup ({})", status);
                tracing::error!("{} {}", kind, reason);
                self.fail(reason);
                return Ok(false);
            }

            tracing::debug!(attempt, attempts, "waiting for {} server", kind);
        }

        let err = BackendError::HealthTimeout { kind, attempts };
        tracing::error!("{}", err);
        if let Some(child) = self.child.take() {
            self.stop_owned(child).await;
        }
        self.fail(err.to_string());
        Ok(false)
    }

    async fn ensure_server_running(&mut self) -> BackendResult<bool> {
        if self.check_status().await {
            self.state = BackendState::Healthy;
            return Ok(true);
        }
        self.start_server().await
    }

    async fn stop_server(&mut self) -> bool {
        let stopped = match self.child.take() {
            Some(child) => {
                tracing::info!("Stopping {} server", self.profile.kind);
                self.stop_owned(child).await
            }
            None => {
                let (_, survivors) = self.kill_matching().await;
                survivors == 0
            }
        };
        self.state = BackendState::NotRunning;
        stopped
    }

    async fn kill_existing_process(&mut self) -> usize {
        tracing::info!(
            "Checking for {} processes on port {}",
            self.profile.kind,
            self.endpoint.port
        );
        self.kill_matching().await.0
    }

    /// Ask Ollama to load the configured model (no-op for other backends)
    async fn warm_model(&self) -> bool {
        if self.profile.kind != BackendKind::Ollama {
            return true;
        }
        let Some(model) = self.config.model.as_deref() else {
            tracing::warn!("No model specified for loading");
            return false;
        };

        tracing::info!("Loading model '{}'", model);
        match OllamaApi::new(self.endpoint.origin()).warm(model).await {
            Ok(()) => {
                tracing::info!("Model load request sent for '{}'", model);
                true
            }
            Err(e) => {
                tracing::warn!("Error loading model {}: {}", model, e);
                false
            }
        }
    }

    async fn prepare_model(&mut self) -> bool {
        if self.profile.kind != BackendKind::Ollama {
            return true;
        }
        let Some(model) = self.config.model.clone() else {
            tracing::warn!("No model specified for Ollama");
            return false;
        };

        let api = OllamaApi::new(self.endpoint.origin());
        match api.list_models().await {
            Ok(models) if has_model(&models, &model) => {
                tracing::debug!("Model {} already available", model);
                true
            }
            Ok(_) => match api.pull(&model, self.pull_timeout).await {
                Ok(()) => {
                    tracing::info!("Pulled model {}", model);
                    true
                }
                Err(e) => {
                    tracing::warn!("Failed to pull model {}: {}", model, e);
                    false
                }
            },
            Err(e) => {
                tracing::warn!("Cannot list Ollama models: {}", e);
                false
            }
        }
    }
}
