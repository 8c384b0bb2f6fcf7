//! Reverse tunnel process loop with exponential-backoff restart.

use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use tokio::process::Command;
use tokio::sync::watch;
use tracing::{info, warn};

use super::config::TunnelConfig;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("tunnel gave up after {0} attempts")]
    RetriesExhausted(u32),
}

enum Outcome {
    Exited(ExitStatus),
    SpawnFailed(std::io::Error),
    Shutdown,
}

/// Keep the reverse tunnel up until `shutdown` fires.
///
/// Returns `Ok(())` on shutdown; only a bounded `max_attempts` policy can
/// make it return an error.
pub async fn run_tunnel(
    config: TunnelConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TunnelError> {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        info!(
            attempt = attempt + 1,
            server = %config.server_host,
            remote_port = config.remote_port,
            "Connecting tunnel"
        );
        let started = Instant::now();

        match run_once(&config, &mut shutdown).await {
            Outcome::Shutdown => {
                info!("Tunnel shutting down");
                return Ok(());
            }
            Outcome::Exited(status) => warn!(%status, "Tunnel disconnected"),
            Outcome::SpawnFailed(e) => warn!(error = %e, "Failed to start ssh"),
        }

        if started.elapsed() >= config.reconnect.stable_after {
            attempt = 0;
        }
        if !config.reconnect.should_retry(attempt) {
            return Err(TunnelError::RetriesExhausted(attempt));
        }

        let delay = config.reconnect.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        info!(?delay, "Reconnecting after backoff");

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                info!("Tunnel shutting down during backoff");
                return Ok(());
            }
        }
    }
}

async fn run_once(config: &TunnelConfig, shutdown: &mut watch::Receiver<bool>) -> Outcome {
    let mut child = match Command::new(&config.ssh_program)
        .args(config.ssh_args())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return Outcome::SpawnFailed(e),
    };

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Outcome::Exited(status),
            Err(e) => Outcome::SpawnFailed(e),
        },
        _ = shutdown.changed() => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to stop ssh");
            }
            Outcome::Shutdown
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::*;
    use crate::tunnel::ReconnectPolicy;

    fn config(program: &Path, reconnect: ReconnectPolicy) -> TunnelConfig {
        TunnelConfig {
            server_host: "bastion.invalid".into(),
            tunnel_port: 2222,
            ssh_user: "bastion".into(),
            local_port: 22,
            remote_port: 10022,
            key_path: PathBuf::from("/nonexistent/key"),
            ssh_program: program.to_path_buf(),
            reconnect,
        }
    }

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ssh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fast_policy(max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_attempts,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn bounded_policy_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "exit 1");
        let (_tx, rx) = watch::channel(false);

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            run_tunnel(config(&program, fast_policy(Some(3))), rx),
        )
        .await
        .expect("runner should give up");
        assert!(matches!(result, Err(TunnelError::RetriesExhausted(3))));
    }

    #[tokio::test]
    async fn missing_binary_is_retried() {
        let (_tx, rx) = watch::channel(false);
        let result = run_tunnel(
            config(Path::new("/nonexistent/ssh"), fast_policy(Some(2))),
            rx,
        )
        .await;
        assert!(matches!(result, Err(TunnelError::RetriesExhausted(2))));
    }

    #[tokio::test]
    async fn shutdown_stops_running_child() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "sleep 30");
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(run_tunnel(config(&program, fast_policy(None)), rx));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("shutdown should be prompt")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "exit 1");
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
            ..Default::default()
        };
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(run_tunnel(config(&program, policy), rx));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("backoff should not delay shutdown")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn already_shut_down_returns_immediately() {
        let (_tx, rx) = watch::channel(true);
        let result = run_tunnel(config(Path::new("/nonexistent/ssh"), fast_policy(None)), rx).await;
        assert!(result.is_ok());
    }
}
