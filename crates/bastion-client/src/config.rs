//! Client configuration management.
//!
//! Persists the server URL, API key, machine identity, and the port the
//! server assigned at registration to `~/.config/bastion/config.json`.

use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Keys accepted by `bastion config get`.
pub const KEYS: &[&str] = &[
    "server_url",
    "api_key",
    "machine_name",
    "key_path",
    "assigned_port",
];

/// Keys the server owns; `config set` refuses them.
const READ_ONLY_KEYS: &[&str] = &["assigned_port"];

pub const DEFAULT_TUNNEL_PORT: u16 = 2222;
pub const DEFAULT_SSH_USER: &str = "bastion";
pub const DEFAULT_LOCAL_PORT: u16 = 22;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);

/// Persistent client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub machine_name: String,
    /// Set from the register response; cleared when this machine is deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_port: Option<u16>,
    /// Private key used for the tunnel; `<key_path>.pub` is registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    /// SSH port of the tunnel endpoint, as reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_port: Option<u16>,
    /// Login user of the tunnel endpoint, as reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
    /// Local sshd port exposed through the tunnel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,
}

impl ClientConfig {
    /// `~/.config/bastion/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(".config").join("bastion").join("config.json"))
            .ok_or(ClientError::NoHomeDir)
    }

    /// Load the config, failing if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ClientError::ConfigMissing(path.to_path_buf())
            } else {
                ClientError::ConfigIo {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        serde_json::from_str(&data).map_err(|source| ClientError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the config, starting from defaults if the file does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load_from(path) {
            Err(ClientError::ConfigMissing(_)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Write the config with owner-only permissions.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let io_err = |source| ClientError::ConfigIo {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                .map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ClientError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(io_err)?;
        // `mode` only applies on creation.
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.write_all(b"\n").map_err(io_err)?;
        Ok(())
    }

    /// Read a single value by key, unmasked.
    pub fn get(&self, key: &str) -> Result<String> {
        Ok(match key {
            "server_url" => self.server_url.clone(),
            "api_key" => self.api_key.clone(),
            "machine_name" => self.machine_name.clone(),
            "key_path" => self.key_path()?.display().to_string(),
            "assigned_port" => self
                .assigned_port
                .map(|p| p.to_string())
                .unwrap_or_default(),
            _ => return Err(ClientError::UnknownKey(key.to_string())),
        })
    }

    /// Update a single value by key, validating it first.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if READ_ONLY_KEYS.contains(&key) {
            return Err(ClientError::ReadOnlyKey(key.to_string()));
        }
        match key {
            "server_url" => {
                check_server_url(value)?;
                self.server_url = value.trim_end_matches('/').to_string();
            }
            "api_key" => self.api_key = value.to_string(),
            "machine_name" => {
                bastion_core::validate::validate_identifier("machine name", value)?;
                self.machine_name = value.to_string();
            }
            "key_path" => self.key_path = Some(expand_tilde(value)),
            _ => return Err(ClientError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn require_server_url(&self) -> Result<&str> {
        non_empty(&self.server_url, "server_url")
    }

    pub fn require_api_key(&self) -> Result<&str> {
        non_empty(&self.api_key, "api_key")
    }

    pub fn require_machine_name(&self) -> Result<&str> {
        non_empty(&self.machine_name, "machine_name")
    }

    /// Configured private key path, or `~/.ssh/bastion-key`.
    pub fn key_path(&self) -> Result<PathBuf> {
        match &self.key_path {
            Some(p) => Ok(p.clone()),
            None => dirs::home_dir()
                .map(|h| h.join(".ssh").join("bastion-key"))
                .ok_or(ClientError::NoHomeDir),
        }
    }

    pub fn tunnel_port(&self) -> u16 {
        self.tunnel_port.unwrap_or(DEFAULT_TUNNEL_PORT)
    }

    pub fn ssh_user(&self) -> &str {
        self.ssh_user.as_deref().unwrap_or(DEFAULT_SSH_USER)
    }

    pub fn local_port(&self) -> u16 {
        self.local_port.unwrap_or(DEFAULT_LOCAL_PORT)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval_secs
            .map_or(DEFAULT_HEARTBEAT_INTERVAL, Duration::from_secs)
    }
}

fn non_empty<'a>(value: &'a str, key: &'static str) -> Result<&'a str> {
    if value.is_empty() {
        Err(ClientError::NotConfigured(key))
    } else {
        Ok(value)
    }
}

/// Require `https://`, except for loopback hosts used in development.
pub fn check_server_url(url: &str) -> Result<()> {
    if url.starts_with("https://") {
        server_host(url).map(|_| ())
    } else if url.starts_with("http://") {
        let host = server_host(url)?;
        if matches!(host.as_str(), "localhost" | "127.0.0.1" | "::1") {
            Ok(())
        } else {
            Err(ClientError::InsecureUrl(url.to_string()))
        }
    } else {
        Err(ClientError::InsecureUrl(url.to_string()))
    }
}

/// Host component of a server URL, without scheme, port, or path.
pub fn server_host(url: &str) -> Result<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or_default()
    } else {
        authority.split(':').next().unwrap_or_default()
    };
    if host.is_empty() {
        Err(ClientError::InvalidUrl(url.to_string()))
    } else {
        Ok(host.to_string())
    }
}

fn expand_tilde(value: &str) -> PathBuf {
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}

/// Show only the first four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    match secret.char_indices().nth(4) {
        _ if secret.is_empty() => String::new(),
        Some((idx, _)) => format!("{}****", &secret[..idx]),
        None => "****".to_string(),
    }
}
