//! Pure renderers for the routing document and the credential file.
//!
//! Output depends only on the machine slice (including its order) and the
//! fixed paths, so identical input always renders byte-identical text.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use crate::storage::Machine;

/// Location of a machine's public key inside `keys_dir`.
pub fn key_file_path(keys_dir: &Path, name: &str) -> PathBuf {
    keys_dir.join(format!("{name}.pub"))
}

/// Render the routing daemon's YAML pipe configuration.
///
/// Each machine becomes one pipe: logins as `name` that authenticate with
/// the key in `{keys_dir}/{name}.pub` are forwarded to `localhost:{port}`
/// as `local_user`, using `server_key` upstream and skipping host key
/// verification.
pub fn render_routing_config(machines: &[Machine], keys_dir: &Path, server_key: &Path) -> String {
    let mut out = String::from("version: \"1.0\"\n");
    if machines.is_empty() {
        out.push_str("pipes: []\n");
        return out;
    }

    out.push_str("pipes:\n");
    for m in machines {
        let _ = write!(
            out,
            concat!(
                "  - from:\n",
                "      - username: \"{name}\"\n",
                "        authorized_keys:\n",
                "          - {key}\n",
                "    to:\n",
                "      host: localhost:{port}\n",
                "      username: \"{user}\"\n",
                "      private_key: {server_key}\n",
                "      ignore_hostkey: true\n",
            ),
            name = m.name,
            key = key_file_path(keys_dir, &m.name).display(),
            port = m.port,
            user = m.local_user,
            server_key = server_key.display(),
        );
    }
    out
}

/// Options that restrict a machine key to one reverse listener.
fn restrictions(port: u16) -> String {
    format!("permitlisten=\"localhost:{port}\",no-pty,no-agent-forwarding,no-X11-forwarding")
}

/// Render the merged `authorized_keys` file for the tunnel endpoint.
///
/// The server's own key (when known) is always the first line, followed by
/// one restricted entry per machine.
pub fn render_authorized_keys(server_public_key: Option<&str>, machines: &[Machine]) -> String {
    let mut out = String::new();
    if let Some(key) = server_public_key.map(str::trim).filter(|k| !k.is_empty()) {
        out.push_str(key);
        out.push('\n');
    }
    for m in machines {
        let _ = writeln!(out, "{} {}", restrictions(m.port), m.public_key);
    }
    out
}
