//! Reverse tunnel configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Configuration for the reverse SSH tunnel to the bastion.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Bastion hostname (no scheme or port).
    pub server_host: String,
    /// SSH port of the tunnel endpoint.
    pub tunnel_port: u16,
    /// Login user at the tunnel endpoint.
    pub ssh_user: String,
    /// Local sshd port exposed through the tunnel.
    pub local_port: u16,
    /// Port the server assigned to this machine.
    pub remote_port: u16,
    /// Private key for the tunnel login.
    pub key_path: PathBuf,
    /// SSH client binary.
    pub ssh_program: PathBuf,
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
}

/// Exponential backoff reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Initial delay before first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier applied to delay after each failed attempt.
    pub multiplier: f64,
    /// Maximum number of reconnect attempts (None = unlimited).
    pub max_attempts: Option<u32>,
    /// A connection that stayed up this long resets the attempt counter.
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
            stable_after: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Calculate the delay for a given attempt number (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.min(64) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether another attempt should be made.
    pub const fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

impl TunnelConfig {
    /// Build the tunnel settings from a registered client config.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self> {
        let remote_port = config
            .assigned_port
            .ok_or(ClientError::NotConfigured("assigned_port"))?;
        Ok(Self {
            server_host: crate::config::server_host(config.require_server_url()?)?,
            tunnel_port: config.tunnel_port(),
            ssh_user: config.ssh_user().to_string(),
            local_port: config.local_port(),
            remote_port,
            key_path: config.key_path()?,
            ssh_program: PathBuf::from("ssh"),
            reconnect: ReconnectPolicy::default(),
        })
    }

    /// Host keys of the bastion are pinned next to the tunnel key.
    pub fn known_hosts_path(&self) -> PathBuf {
        self.key_path
            .parent()
            .map_or_else(|| PathBuf::from("bastion_known_hosts"), |d| d.join("bastion_known_hosts"))
    }

    /// Arguments for `ssh`: no remote command, keepalives, and a single
    /// remote forward of `remote_port` back to the local sshd.
    pub fn ssh_args(&self) -> Vec<String> {
        vec![
            "-N".into(),
            "-o".into(),
            "ExitOnForwardFailure=yes".into(),
            "-o".into(),
            "ServerAliveInterval=30".into(),
            "-o".into(),
            "ServerAliveCountMax=3".into(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            format!("UserKnownHostsFile={}", self.known_hosts_path().display()),
            "-i".into(),
            self.key_path.display().to_string(),
            "-R".into(),
            format!("{}:localhost:{}", self.remote_port, self.local_port),
            "-p".into(),
            self.tunnel_port.to_string(),
            format!("{}@{}", self.ssh_user, self.server_host),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn tunnel() -> TunnelConfig {
        TunnelConfig {
            server_host: "bastion.example.com".into(),
            tunnel_port: 2222,
            ssh_user: "bastion".into(),
            local_port: 22,
            remote_port: 10024,
            key_path: PathBuf::from("/home/alice/.ssh/bastion-key"),
            ssh_program: PathBuf::from("ssh"),
            reconnect: ReconnectPolicy::default(),
        }
    }

    #[test]
    fn default_reconnect_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.multiplier, 2.0);
        assert!(policy.max_attempts.is_none());
    }

    #[test]
    fn exponential_backoff_delays() {
        let policy = ReconnectPolicy::default();

        // 2s, 4s, 8s, 16s, 32s, 60s (capped)
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(32));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(1000), Duration::from_secs(60));
    }

    #[test]
    fn retry_unlimited_by_default() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(u32::MAX));

        let bounded = ReconnectPolicy {
            max_attempts: Some(2),
            ..Default::default()
        };
        assert!(bounded.should_retry(1));
        assert!(!bounded.should_retry(2));
    }

    #[test]
    fn ssh_args_forward_assigned_port() {
        let args = tunnel().ssh_args();
        assert_eq!(args[0], "-N");
        assert!(args.contains(&"ExitOnForwardFailure=yes".to_string()));
        let known_hosts = "UserKnownHostsFile=/home/alice/.ssh/bastion_known_hosts";
        assert!(args.iter().any(|a| a == known_hosts));

        let r = args.iter().position(|a| a == "-R").unwrap();
        assert_eq!(args[r + 1], "10024:localhost:22");
        let p = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[p + 1], "2222");
        assert_eq!(args.last().unwrap(), "bastion@bastion.example.com");
    }

    #[test]
    fn from_client_config_requires_registration() {
        let mut cfg = ClientConfig {
            server_url: "https://bastion.example.com:8443".into(),
            key_path: Some(PathBuf::from("/k/id")),
            ..Default::default()
        };
        assert!(matches!(
            TunnelConfig::from_client_config(&cfg),
            Err(ClientError::NotConfigured("assigned_port"))
        ));

        cfg.assigned_port = Some(10030);
        cfg.tunnel_port = Some(2200);
        let t = TunnelConfig::from_client_config(&cfg).unwrap();
        assert_eq!(t.server_host, "bastion.example.com");
        assert_eq!(t.remote_port, 10030);
        assert_eq!(t.tunnel_port, 2200);
        assert_eq!(t.ssh_user, "bastion");
    }
}
