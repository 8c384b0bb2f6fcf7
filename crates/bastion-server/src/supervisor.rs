//! Routing daemon supervision.
//!
//! Owns the routing daemon child process, restarts it when the registry
//! fires a reload, and respawns it if it exits on its own.

use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::registry::ReloadHook;

/// Delay before respawning a daemon that exited unexpectedly.
const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// How the routing daemon is launched.
#[derive(Debug, Clone)]
pub struct DaemonCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Grace period between SIGTERM and SIGKILL.
    pub terminate_timeout: Duration,
}

impl DaemonCommand {
    /// Parse a whitespace-separated command line. `None` if it is blank.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            terminate_timeout: Duration::from_secs(5),
        })
    }

    fn spawn(&self) -> std::io::Result<Child> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .spawn()?;
        info!(program = %self.program, pid = ?child.id(), "Routing daemon started");
        Ok(child)
    }
}

/// Reload hook that asks the supervisor task to restart the daemon.
///
/// Requests are coalesced: while one restart is pending, further requests
/// are dropped.
#[derive(Debug, Clone)]
pub struct DaemonHandle {
    tx: mpsc::Sender<()>,
}

impl ReloadHook for DaemonHandle {
    fn reload(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!("Routing daemon supervisor is gone; reload dropped");
            }
        }
    }
}

/// Start supervising the routing daemon.
pub fn spawn_supervisor(
    command: DaemonCommand,
    shutdown: watch::Receiver<bool>,
) -> (DaemonHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(supervise(command, rx, shutdown));
    (DaemonHandle { tx }, task)
}

async fn supervise(
    command: DaemonCommand,
    mut reloads: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut child = start(&command);

    loop {
        tokio::select! {
            request = reloads.recv() => {
                if let Some(c) = child.take() {
                    terminate(c, command.terminate_timeout).await;
                }
                if request.is_none() {
                    info!("Reload channel closed; routing daemon supervisor exiting");
                    return;
                }
                info!("Config changed, restarting routing daemon");
                child = start(&command);
            }
            status = wait_child(&mut child) => {
                warn!(status = ?status, "Routing daemon exited; respawning");
                child = None;
                tokio::select! {
                    () = tokio::time::sleep(RESPAWN_DELAY) => {}
                    _ = shutdown.changed() => {
                        info!("Routing daemon supervisor shutting down");
                        return;
                    }
                }
                child = start(&command);
            }
            _ = shutdown.changed() => {
                if let Some(c) = child.take() {
                    terminate(c, command.terminate_timeout).await;
                }
                info!("Routing daemon supervisor shutting down");
                return;
            }
        }
    }
}

fn start(command: &DaemonCommand) -> Option<Child> {
    match command.spawn() {
        Ok(child) => Some(child),
        Err(e) => {
            error!(program = %command.program, error = %e, "Failed to start routing daemon");
            None
        }
    }
}

/// Resolves when the child exits; pends forever when there is no child.
async fn wait_child(child: &mut Option<Child>) -> std::io::Result<std::process::ExitStatus> {
    match child {
        Some(c) => c.wait().await,
        None => std::future::pending().await,
    }
}

/// SIGTERM, wait up to `timeout`, then SIGKILL.
async fn terminate(mut child: Child, timeout: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid comes from our own live Child handle.
            #[allow(unsafe_code)]
            #[allow(clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(pid, error = %err, "Failed to send SIGTERM");
            }
        }
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => info!(?status, "Routing daemon stopped"),
        Ok(Err(e)) => {
            warn!(error = %e, "Error waiting for routing daemon");
            child.kill().await.ok();
        }
        Err(_) => {
            warn!("Timeout waiting for routing daemon, killing");
            child.kill().await.ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_command_line() {
        let line = "/usr/local/bin/sshpiperd -p 2223 yaml --config /data/sshpiper.yaml";
        let cmd = DaemonCommand::parse(line).unwrap();
        assert_eq!(cmd.program, "/usr/local/bin/sshpiperd");
        assert_eq!(cmd.args, ["-p", "2223", "yaml", "--config", "/data/sshpiper.yaml"]);
        assert!(DaemonCommand::parse("   ").is_none());
    }

    #[tokio::test]
    async fn reload_requests_are_coalesced() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = DaemonHandle { tx };
        handle.reload();
        handle.reload();
        handle.reload();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reload_after_supervisor_exit_is_harmless() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        DaemonHandle { tx }.reload();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn supervisor_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let command = DaemonCommand::parse("sleep 30").unwrap();
        let (handle, task) = spawn_supervisor(command, shutdown_rx);

        handle.reload();
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
    }
}
