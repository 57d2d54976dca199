//! Listening-socket owner lookup
//!
//! The process table (via sysinfo) does not expose sockets. On Linux the
//! owners are read from `/proc`: listening entries in `/proc/net/tcp{,6}`
//! give socket inodes and `/proc/<pid>/fd` links map those back to
//! processes. Elsewhere, or when `/proc` cannot be read, `lsof` is asked.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Upper bound for a single `lsof` invocation
const LSOF_TIMEOUT: Duration = Duration::from_secs(5);

/// PIDs of processes holding a listening TCP socket on `port`
#[instrument]
pub async fn listening_pids(port: u16) -> Vec<u32> {
    #[cfg(target_os = "linux")]
    {
        match tokio::task::spawn_blocking(move || procnet::listening_pids(port)).await {
            Ok(Ok(scan)) => {
                if scan.hidden {
                    warn!(
                        "a listener on port {} belongs to a process that cannot be inspected",
                        port
                    );
                }
                return scan.pids;
            }
            Ok(Err(e)) => warn!("cannot read /proc for port {}, trying lsof: {}", port, e),
            Err(e) => warn!("port scan task failed, trying lsof: {}", e),
        }
    }

    match lsof_pids(port).await {
        Some(pids) => pids,
        None => {
            warn!("cannot resolve owners of port {}: lsof unavailable", port);
            Vec::new()
        }
    }
}

/// Ask `lsof`; `None` when it cannot be run to completion
async fn lsof_pids(port: u16) -> Option<Vec<u32>> {
    let filter = format!("-iTCP:{port}");
    let args = ["-nP", "-t", filter.as_str(), "-sTCP:LISTEN"];

    let child = Command::new("lsof")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(c) => c,
        Err(e) => {
            debug!("lsof unavailable: {}", e);
            return None;
        }
    };

    let output = match tokio::time::timeout(LSOF_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!("lsof failed: {}", e);
            return None;
        }
        Err(_) => {
            debug!("lsof timed out after {:?}", LSOF_TIMEOUT);
            return None;
        }
    };

    // lsof exits 1 when nothing matches; stdout is still authoritative
    Some(parse_pid_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `lsof -t` output: one PID per line
pub(crate) fn parse_pid_list(stdout: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

#[cfg(target_os = "linux")]
mod procnet {
    use std::collections::HashSet;

    use procfs::net::TcpState;
    use procfs::process::FDTarget;

    pub(super) struct Scan {
        pub pids: Vec<u32>,
        /// A listening socket exists whose owner was not found
        pub hidden: bool,
    }

    pub(super) fn listening_pids(port: u16) -> procfs::ProcResult<Scan> {
        let mut entries = procfs::net::tcp()?;
        // IPv6 may be disabled
        entries.extend(procfs::net::tcp6().unwrap_or_default());

        let inodes: HashSet<u64> = entries
            .iter()
            .filter(|e| matches!(e.state, TcpState::Listen) && e.local_address.port() == port)
            .map(|e| e.inode)
            .collect();
        if inodes.is_empty() {
            return Ok(Scan {
                pids: Vec::new(),
                hidden: false,
            });
        }

        let mut owned = HashSet::new();
        let mut pids = Vec::new();
        for process in procfs::process::all_processes()? {
            // Gone mid-scan, or owned by a user we cannot inspect
            let Ok(process) = process else { continue };
            let Ok(fds) = process.fd() else { continue };

            let mut holds = false;
            for fd in fds.flatten() {
                if let FDTarget::Socket(inode) = fd.target {
                    if inodes.contains(&inode) {
                        owned.insert(inode);
                        holds = true;
                    }
                }
            }
            if holds {
                pids.push(process.pid() as u32);
            }
        }

        pids.sort_unstable();
        pids.dedup();
        Ok(Scan {
            hidden: owned.len() < inodes.len(),
            pids,
        })
    }
}
