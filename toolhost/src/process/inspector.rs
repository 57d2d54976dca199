//! OS process inspection and termination
//!
//! [`ProcessInspector`] is the seam between backend supervision and the real
//! process table, so controllers can be exercised against a fake in tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, Signal, System};

use super::port;

/// Poll interval while waiting for a signalled process to exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A process seen in the OS process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// How to ask a process to go away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGTERM (falls back to a hard kill where unsupported)
    Graceful,
    /// SIGKILL / TerminateProcess
    Forced,
}

/// Best-effort view of OS processes.
///
/// None of these operations fail: processes that vanish mid-scan or cannot be
/// signalled are simply skipped or reported as not terminated.
#[async_trait]
pub trait ProcessInspector: Send + Sync {
    /// Processes holding a listening socket on `port`
    async fn processes_on_port(&self, port: u16) -> Vec<ProcessInfo>;

    /// Processes whose executable name contains `needle` (case-insensitive)
    async fn processes_by_name(&self, needle: &str) -> Vec<ProcessInfo>;

    /// All descendants of `pid`, deepest first
    async fn descendants_of(&self, pid: u32) -> Vec<ProcessInfo>;

    /// Signal `pid` and wait up to `timeout` for it to exit.
    ///
    /// Returns true once the process is gone (or was never there).
    async fn terminate(&self, pid: u32, how: Termination, timeout: Duration) -> bool;
}

/// [`ProcessInspector`] backed by sysinfo and `lsof`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInspector;

impl SystemInspector {
    pub fn new() -> Self {
        Self
    }

    fn snapshot() -> System {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        sys
    }
}

fn process_name(process: &Process) -> String {
    Path::new(process.name()).to_string_lossy().into_owned()
}

fn is_gone(sys: &System, pid: Pid) -> bool {
    match sys.process(pid) {
        None => true,
        // An exited child that nobody reaped yet no longer holds anything
        Some(p) => matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
    }
}

#[async_trait]
impl ProcessInspector for SystemInspector {
    async fn processes_on_port(&self, port: u16) -> Vec<ProcessInfo> {
        let pids = port::listening_pids(port).await;
        if pids.is_empty() {
            return Vec::new();
        }

        let sys = Self::snapshot();
        pids.into_iter()
            .map(|pid| ProcessInfo {
                pid,
                name: sys
                    .process(Pid::from_u32(pid))
                    .map(process_name)
                    .unwrap_or_else(|| "?".to_string()),
            })
            .collect()
    }

    async fn processes_by_name(&self, needle: &str) -> Vec<ProcessInfo> {
        let needle = needle.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let own = std::process::id();
        let sys = Self::snapshot();
        let mut found: Vec<ProcessInfo> = sys
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != own)
            .filter(|(_, p)| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .filter_map(|(pid, p)| {
                let name = process_name(p);
                name.to_lowercase().contains(&needle).then(|| ProcessInfo {
                    pid: pid.as_u32(),
                    name,
                })
            })
            .collect();
        found.sort_by_key(|p| p.pid);
        found
    }

    async fn descendants_of(&self, pid: u32) -> Vec<ProcessInfo> {
        let sys = Self::snapshot();

        let mut children: HashMap<u32, Vec<(u32, String)>> = HashMap::new();
        for (child_pid, process) in sys.processes() {
            if let Some(parent) = process.parent() {
                children
                    .entry(parent.as_u32())
                    .or_default()
                    .push((child_pid.as_u32(), process_name(process)));
            }
        }

        // Breadth-first walk, then reverse so leaves come out first
        let mut ordered = Vec::new();
        let mut queue = VecDeque::from([pid]);
        while let Some(current) = queue.pop_front() {
            if let Some(kids) = children.get(&current) {
                for (kid, name) in kids {
                    if *kid == pid || ordered.iter().any(|p: &ProcessInfo| p.pid == *kid) {
                        continue;
                    }
                    ordered.push(ProcessInfo {
                        pid: *kid,
                        name: name.clone(),
                    });
                    queue.push_back(*kid);
                }
            }
        }
        ordered.reverse();
        ordered
    }

    async fn terminate(&self, pid: u32, how: Termination, timeout: Duration) -> bool {
        let target = Pid::from_u32(pid);

        let signalled = {
            let mut sys = System::new();
            sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
            if is_gone(&sys, target) {
                return true;
            }
            match sys.process(target) {
                Some(process) => match how {
                    Termination::Graceful => process
                        .kill_with(Signal::Term)
                        .unwrap_or_else(|| process.kill()),
                    Termination::Forced => process.kill(),
                },
                None => return true,
            }
        };

        if !signalled {
            tracing::warn!(pid, ?how, "could not signal process (permission denied?)");
            return false;
        }

        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut sys = System::new();
                sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
                if is_gone(&sys, target) {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                tracing::warn!(pid, ?how, "process still alive after {:?}", timeout);
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_missing_pid_is_noop() {
        // PIDs near u32::MAX are never allocated on Linux or macOS
        let inspector = SystemInspector::new();
        assert!(
            inspector
                .terminate(u32::MAX - 7, Termination::Forced, Duration::from_millis(200))
                .await
        );
    }

    #[tokio::test]
    async fn test_terminate_real_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sleep");
        let pid = child.id().expect("child pid");

        // Reap in the background so the zombie disappears promptly
        let reaper = tokio::spawn(async move { child.wait().await });

        let inspector = SystemInspector::new();
        assert!(
            inspector
                .terminate(pid, Termination::Graceful, Duration::from_secs(5))
                .await
        );
        let _ = reaper.await;
    }

    #[tokio::test]
    async fn test_processes_by_name_excludes_self() {
        let inspector = SystemInspector::new();
        let own = std::process::id();
        let me = inspector.processes_by_name("toolhost").await;
        assert!(me.iter().all(|p| p.pid != own));
    }

    #[tokio::test]
    async fn test_descendants_of_lists_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sleep");
        let pid = child.id().expect("child pid");

        let inspector = SystemInspector::new();
        let descendants = inspector.descendants_of(std::process::id()).await;
        assert!(descendants.iter().any(|p| p.pid == pid));

        child.kill().await.ok();
    }
}
