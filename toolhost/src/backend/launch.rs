//! Spawning backend server processes

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

/// Everything needed to start one backend server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Variables added on top of the inherited environment
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Where stdout and stderr go; discarded when `None`
    pub log_file: Option<PathBuf>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            log_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Shell-style rendering for log lines
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Starts backend processes. Swapped out in tests.
pub trait Launcher: Send + Sync {
    fn launch(&self, command: &LaunchCommand) -> std::io::Result<Child>;
}

/// Launches servers in their own session with output sent to a log file.
///
/// The child outlives a crashed supervisor and is not hit by signals aimed at
/// the caller's process group.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher;

fn log_stdio(path: &Path) -> (Stdio, Stdio) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::debug!("cannot create log dir {}: {}", parent.display(), e);
        }
    }

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            let stdout = file
                .try_clone()
                .map(Stdio::from)
                .unwrap_or_else(|_| Stdio::null());
            (stdout, Stdio::from(file))
        }
        Err(e) => {
            tracing::warn!("cannot open backend log {}: {}", path.display(), e);
            (Stdio::null(), Stdio::null())
        }
    }
}

impl Launcher for DetachedLauncher {
    fn launch(&self, command: &LaunchCommand) -> std::io::Result<Child> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let (stdout, stderr) = match &command.log_file {
            Some(path) => log_stdio(path),
            None => (Stdio::null(), Stdio::null()),
        };
        cmd.stdout(stdout).stderr(stderr);

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn()
    }
}
