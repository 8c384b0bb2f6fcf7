//! On-disk routing artifacts: per-machine key files, the routing document
//! and the merged credential file.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::render::{key_file_path, render_authorized_keys, render_routing_config};
use crate::storage::Machine;

/// Default location of the merged credential file.
pub const DEFAULT_AUTHORIZED_KEYS: &str = "/home/bastion/.ssh/authorized_keys";

/// Failure writing or removing a routing artifact.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to remove {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("failed to read server public key {path}: {source}")]
    ServerKey { path: PathBuf, source: io::Error },
}

/// Paths of every generated artifact.
#[derive(Debug, Clone)]
pub struct RoutingFiles {
    /// Routing daemon YAML document.
    pub config_path: PathBuf,
    /// Directory holding one `{name}.pub` per machine.
    pub keys_dir: PathBuf,
    /// Server private key; its public half is `{server_key}.pub`.
    pub server_key: PathBuf,
    /// Merged credential file for the tunnel endpoint.
    pub authorized_keys_path: PathBuf,
}

impl RoutingFiles {
    pub fn new(
        config_path: PathBuf,
        keys_dir: PathBuf,
        server_key: PathBuf,
        authorized_keys_path: PathBuf,
    ) -> Self {
        Self {
            config_path,
            keys_dir,
            server_key,
            authorized_keys_path,
        }
    }

    fn server_public_key_path(&self) -> PathBuf {
        let mut path = self.server_key.clone().into_os_string();
        path.push(".pub");
        PathBuf::from(path)
    }

    /// Read the server's public key, trimmed.
    pub fn server_public_key(&self) -> Result<String, RoutingError> {
        let path = self.server_public_key_path();
        std::fs::read_to_string(&path)
            .map(|key| key.trim().to_string())
            .map_err(|source| RoutingError::ServerKey { path, source })
    }

    pub fn key_path(&self, name: &str) -> PathBuf {
        key_file_path(&self.keys_dir, name)
    }

    /// Write a machine's public key to `{keys_dir}/{name}.pub`.
    pub fn write_key(&self, name: &str, public_key: &str) -> Result<(), RoutingError> {
        let path = self.key_path(name);
        write_atomic(&path, format!("{public_key}\n").as_bytes(), 0o644)
            .map_err(|source| RoutingError::Write { path, source })
    }

    /// Remove a machine's key file. A file that is already gone is fine.
    pub fn remove_key(&self, name: &str) -> Result<(), RoutingError> {
        let path = self.key_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Key file already absent");
                Ok(())
            }
            Err(source) => Err(RoutingError::Remove { path, source }),
        }
    }

    /// Rewrite the routing document from `machines`.
    pub fn write_routing_config(&self, machines: &[Machine]) -> Result<(), RoutingError> {
        let doc = render_routing_config(machines, &self.keys_dir, &self.server_key);
        write_atomic(&self.config_path, doc.as_bytes(), 0o644).map_err(|source| {
            RoutingError::Write {
                path: self.config_path.clone(),
                source,
            }
        })
    }

    /// Rewrite the merged credential file from `machines`.
    pub fn write_authorized_keys(
        &self,
        server_public_key: Option<&str>,
        machines: &[Machine],
    ) -> Result<(), RoutingError> {
        let text = render_authorized_keys(server_public_key, machines);
        let path = &self.authorized_keys_path;
        if let Some(parent) = path.parent() {
            create_dir_with_mode(parent, 0o700).map_err(|source| RoutingError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        write_atomic(path, text.as_bytes(), 0o600).map_err(|source| RoutingError::Write {
            path: path.clone(),
            source,
        })
    }
}

fn create_dir_with_mode(dir: &Path, mode: u32) -> io::Result<()> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    set_mode(dir, mode)
}

/// Write `contents` to a sibling temp file and rename it over `path`, so
/// readers never observe a half-written file.
fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents)?;
    set_mode(&tmp, mode)?;
    std::fs::rename(&tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
