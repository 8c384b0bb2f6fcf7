//! Bastion CLI
//!
//! Registers this machine with a bastion server and keeps its reverse SSH
//! tunnel open.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use bastion_client::api::{ApiClient, MachineEntry, RegisterRequest};
use bastion_client::authorized_keys;
use bastion_client::config::{ClientConfig, KEYS, mask_secret, server_host};
use bastion_client::error::ClientError;
use bastion_client::heartbeat::spawn_heartbeat_task;
use bastion_client::tunnel::{TunnelConfig, run_tunnel};

#[derive(Parser, Debug)]
#[command(name = "bastion")]
#[command(version, long_about = None)]
#[command(about = "Reach this machine by name through a bastion server")]
struct Cli {
    /// Config file path (default: ~/.config/bastion/config.json).
    #[arg(long, global = true, env = "BASTION_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register this machine with the bastion server.
    Register {
        /// Owner of the machine.
        #[arg(long)]
        owner: String,
        /// Local account SSH sessions land in.
        #[arg(long, env = "USER")]
        local_user: String,
        /// Machine name (defaults to the configured machine_name).
        #[arg(long)]
        name: Option<String>,
    },
    /// Run the reverse tunnel in the foreground until interrupted.
    Connect,
    /// List all registered machines.
    List,
    /// Delete a machine from the server (defaults to this machine).
    Delete {
        name: Option<String>,
    },
    /// Rename this machine on the server.
    Rename {
        new_name: String,
    },
    /// Show local registration and server health.
    Status,
    /// View or update client configuration.
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show all values (default).
    Show,
    /// Print one value.
    Get { key: String },
    /// Set one value.
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    bastion_core::tracing_init::init_tracing("bastion_client=info,bastion=info", false);

    let config_path = match cli.config {
        Some(p) => p,
        None => ClientConfig::default_path()?,
    };

    match cli.command {
        Command::Register {
            owner,
            local_user,
            name,
        } => register(&config_path, &owner, &local_user, name.as_deref()).await,
        Command::Connect => connect(&config_path).await,
        Command::List => list(&config_path).await,
        Command::Delete { name } => delete(&config_path, name.as_deref()).await,
        Command::Rename { new_name } => rename(&config_path, &new_name).await,
        Command::Status => status(&config_path).await,
        Command::Config { action } => config(&config_path, action.unwrap_or(ConfigAction::Show)),
    }
}

async fn register(
    config_path: &std::path::Path,
    owner: &str,
    local_user: &str,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let mut cfg = ClientConfig::load_from(config_path)?;
    let name = match name {
        Some(n) => n.to_string(),
        None => cfg.require_machine_name()?.to_string(),
    };
    bastion_core::validate::validate_identifier("machine name", &name)?;

    let pub_key_path = PathBuf::from(format!("{}.pub", cfg.key_path()?.display()));
    let public_key = std::fs::read_to_string(&pub_key_path).map_err(|source| {
        ClientError::PublicKey {
            path: pub_key_path.clone(),
            source,
        }
    })?;

    let client = ApiClient::from_config(&cfg)?;
    let reg = client
        .register(&RegisterRequest {
            name: &name,
            owner,
            local_user,
            public_key: public_key.trim(),
        })
        .await
        .context("registration failed")?;
    info!(name = %reg.name, port = reg.port, "Registered");

    cfg.machine_name.clone_from(&reg.name);
    cfg.assigned_port = Some(reg.port);
    cfg.tunnel_port = Some(reg.tunnel_port);
    cfg.ssh_user = Some(reg.ssh_user.clone());
    cfg.save_to(config_path)?;

    let mut out = io::stdout();
    if !reg.server_public_key.is_empty() {
        match authorized_keys::default_path()
            .map_err(anyhow::Error::from)
            .and_then(|p| {
                authorized_keys::install_key(&p, &reg.server_public_key)
                    .map_err(anyhow::Error::from)
            })
        {
            Ok(true) => writeln!(out, "Added server public key to ~/.ssh/authorized_keys")?,
            Ok(false) => {}
            Err(e) => {
                writeln!(out, "Warning: failed to add server key to authorized_keys: {e}")?;
                writeln!(
                    out,
                    "You may need to add this key manually:\n  {}",
                    reg.server_public_key
                )?;
            }
        }
    }

    let host = server_host(&cfg.server_url)?;
    writeln!(out, "Registered successfully!")?;
    writeln!(out, "  Machine: {}", reg.name)?;
    writeln!(out, "  Port:    {}", reg.port)?;
    writeln!(out, "  Server:  {}", reg.server)?;
    writeln!(out, "\nRun 'bastion connect' to start the tunnel.")?;
    writeln!(out, "\nTo reach this machine from any SSH client:\n")?;
    writeln!(out, "  ssh -i <your-bastion-key> {}@{host}\n", reg.name)?;
    writeln!(out, "Or add to ~/.ssh/config:\n")?;
    writeln!(out, "  Host {}", reg.name)?;
    writeln!(out, "      HostName {host}")?;
    writeln!(out, "      User {}", reg.name)?;
    writeln!(out, "      IdentityFile ~/.ssh/bastion-key")?;
    Ok(())
}

async fn connect(config_path: &std::path::Path) -> anyhow::Result<()> {
    let cfg = ClientConfig::load_from(config_path)?;
    let tunnel = TunnelConfig::from_client_config(&cfg)
        .context("no assigned port - run 'bastion register' first")?;
    let client = ApiClient::from_config(&cfg)?;
    let name = cfg.require_machine_name()?.to_string();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let heartbeat =
        spawn_heartbeat_task(client, name, cfg.heartbeat_interval(), shutdown_rx.clone());

    let mut out = io::stdout();
    writeln!(
        out,
        "Connecting tunnel: localhost:{} -> {}:{} (remote port {})",
        tunnel.local_port, tunnel.server_host, tunnel.tunnel_port, tunnel.remote_port
    )?;

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
        let _ = signal_tx.send(true);
    });

    let result = run_tunnel(tunnel, shutdown_rx).await;
    let _ = shutdown_tx.send(true);
    let _ = heartbeat.await;
    writeln!(out, "Disconnected.")?;
    result?;
    Ok(())
}

async fn list(config_path: &std::path::Path) -> anyhow::Result<()> {
    let cfg = ClientConfig::load_from(config_path)?;
    let machines = ApiClient::from_config(&cfg)?.list().await?;

    let mut out = io::stdout();
    if machines.is_empty() {
        writeln!(out, "No machines registered.")?;
        return Ok(());
    }
    let now = bastion_core::db::unix_timestamp();
    writeln!(
        out,
        "{:<20} {:<10} {:<6} {:<15} LAST SEEN",
        "NAME", "OWNER", "PORT", "USER"
    )?;
    for MachineEntry {
        name,
        owner,
        port,
        local_user,
        last_seen,
    } in &machines
    {
        writeln!(
            out,
            "{name:<20} {owner:<10} {port:<6} {local_user:<15} {}",
            format_last_seen(*last_seen, now)
        )?;
    }
    Ok(())
}

async fn delete(config_path: &std::path::Path, name: Option<&str>) -> anyhow::Result<()> {
    let mut cfg = ClientConfig::load_from(config_path)?;
    let name = match name {
        Some(n) => n.to_string(),
        None => cfg.require_machine_name()?.to_string(),
    };
    ApiClient::from_config(&cfg)?
        .delete(&name)
        .await
        .context("delete failed")?;

    let mut out = io::stdout();
    writeln!(out, "Deleted machine {name:?}")?;
    if name == cfg.machine_name {
        cfg.assigned_port = None;
        cfg.save_to(config_path)?;
        writeln!(out, "Cleared assigned port from local config.")?;
    }
    Ok(())
}

async fn rename(config_path: &std::path::Path, new_name: &str) -> anyhow::Result<()> {
    let mut cfg = ClientConfig::load_from(config_path)?;
    bastion_core::validate::validate_identifier("machine name", new_name)?;
    let old_name = cfg.require_machine_name()?.to_string();

    ApiClient::from_config(&cfg)?
        .rename(&old_name, new_name)
        .await
        .context("rename failed")?;

    cfg.machine_name = new_name.to_string();
    cfg.save_to(config_path)?;
    writeln!(io::stdout(), "Renamed {old_name:?} -> {new_name:?}")?;
    Ok(())
}

async fn status(config_path: &std::path::Path) -> anyhow::Result<()> {
    let cfg = ClientConfig::load_from(config_path)?;
    let mut out = io::stdout();
    writeln!(out, "Machine: {}", cfg.machine_name)?;
    writeln!(
        out,
        "Port:    {}",
        cfg.assigned_port
            .map_or_else(|| "not registered".to_string(), |p| p.to_string())
    )?;
    writeln!(out, "Key:     {}", cfg.key_path()?.display())?;

    writeln!(out, "\nServer status:")?;
    let result = match ApiClient::new(cfg.require_server_url()?, &cfg.api_key) {
        Ok(client) => client.status().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(s) => {
            writeln!(out, "  status: {}", s.status)?;
            writeln!(out, "  machine_count: {}", s.machine_count)?;
        }
        Err(e) => writeln!(out, "  Error: {e}")?,
    }
    Ok(())
}

fn config(config_path: &std::path::Path, action: ConfigAction) -> anyhow::Result<()> {
    let mut out = io::stdout();
    match action {
        ConfigAction::Show => {
            let cfg = ClientConfig::load_from(config_path)?;
            for key in KEYS {
                writeln!(out, "{key:<15} {}", display_value(&cfg, key)?)?;
            }
        }
        ConfigAction::Get { key } => {
            let cfg = ClientConfig::load_from(config_path)?;
            writeln!(out, "{}", display_value(&cfg, &key)?)?;
        }
        ConfigAction::Set { key, value } => {
            let mut cfg = ClientConfig::load_or_default(config_path)?;
            cfg.set(&key, &value)?;
            cfg.save_to(config_path)?;
            let shown = if key == "api_key" {
                mask_secret(&value)
            } else {
                value
            };
            writeln!(out, "Set {key} = {shown}")?;
        }
    }
    Ok(())
}

fn display_value(cfg: &ClientConfig, key: &str) -> Result<String, ClientError> {
    let value = cfg.get(key)?;
    Ok(if key == "api_key" {
        mask_secret(&value)
    } else {
        value
    })
}

fn format_last_seen(last_seen: Option<i64>, now: i64) -> String {
    let Some(ts) = last_seen else {
        return "never".to_string();
    };
    let age = (now - ts).max(0);
    match age {
        0..60 => format!("{age}s ago"),
        60..3600 => format!("{}m ago", age / 60),
        3600..86_400 => format!("{}h ago", age / 3600),
        _ => format!("{}d ago", age / 86_400),
    }
}
