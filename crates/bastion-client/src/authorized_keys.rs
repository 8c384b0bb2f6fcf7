//! Local `~/.ssh/authorized_keys` maintenance.
//!
//! Connections routed through the tunnel authenticate to this machine's
//! sshd with the bastion server's key, so registration installs it here.

use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use crate::error::{ClientError, Result};

pub fn default_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|h| h.join(".ssh").join("authorized_keys"))
        .ok_or(ClientError::NoHomeDir)
}

/// Append `key` unless an identical line is already present.
///
/// Returns whether the file was changed.
pub fn install_key(path: &Path, key: &str) -> std::io::Result<bool> {
    let key = key.trim();
    if let Some(dir) = path.parent() {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)?;
    }

    let existing = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    if existing.lines().any(|line| line.trim() == key) {
        return Ok(false);
    }

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .mode(0o600)
        .open(path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    writeln!(file, "{key}")?;
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    const KEY: &str = "ssh-ed25519 AAAASERVER bastion@server";

    #[test]
    fn creates_file_with_private_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ssh").join("authorized_keys");

        assert!(install_key(&path, KEY).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{KEY}\n"));

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        assert!(install_key(&path, KEY).unwrap());
        assert!(!install_key(&path, &format!("  {KEY}\n")).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn appends_after_unterminated_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        std::fs::write(&path, "ssh-rsa AAAAOTHER me@laptop").unwrap();

        assert!(install_key(&path, KEY).unwrap());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("ssh-rsa AAAAOTHER me@laptop\n{KEY}\n"));
    }
}
