//! Bastion Registry Server
//!
//! Registers machines, assigns forwarded ports, and keeps the routing
//! daemon's configuration in sync with the registry.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use bastion_server::allocator::{DEFAULT_PORT_MAX, DEFAULT_PORT_MIN};
use bastion_server::api::{
    ApiKey, AppState, DEFAULT_AUTHED_LIMIT, DEFAULT_GLOBAL_LIMIT, RateLimits, build_router,
};
use bastion_server::registry::{NoDaemon, Registry, ReloadHook};
use bastion_server::routing::{DEFAULT_AUTHORIZED_KEYS, RoutingFiles};
use bastion_server::storage::RegistryDatabase;
use bastion_server::supervisor::{DaemonCommand, spawn_supervisor};
use bastion_server::PortPool;

#[derive(Parser, Debug)]
#[command(name = "bastiond")]
#[command(version, about = "Bastion registry server - machine registry and routing config")]
struct Args {
    /// HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:8080", env = "BASTION_LISTEN")]
    listen: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long, default_value = "/data/db/bastion.db", env = "BASTION_DB_PATH")]
    db_path: PathBuf,

    /// Directory for per-machine public keys.
    #[arg(long, default_value = "/data/keys", env = "BASTION_KEYS_DIR")]
    keys_dir: PathBuf,

    /// Path of the generated routing daemon config.
    #[arg(long, default_value = "/data/sshpiper.yaml", env = "BASTION_CONFIG_PATH")]
    config_path: PathBuf,

    /// Path to the server's SSH private key (`<path>.pub` holds the public key).
    #[arg(long, default_value = "/data/server-key", env = "BASTION_SERVER_KEY")]
    server_key: PathBuf,

    /// Path of the merged authorized_keys file for the tunnel endpoint.
    #[arg(long, default_value = DEFAULT_AUTHORIZED_KEYS, env = "BASTION_AUTHORIZED_KEYS")]
    authorized_keys: PathBuf,

    /// Lowest port in the forwarded-port pool.
    #[arg(long, default_value_t = DEFAULT_PORT_MIN, env = "BASTION_PORT_MIN")]
    port_min: u16,

    /// Highest port (inclusive) in the forwarded-port pool.
    #[arg(long, default_value_t = DEFAULT_PORT_MAX, env = "BASTION_PORT_MAX")]
    port_max: u16,

    /// Bearer secret required by the authenticated API routes.
    #[arg(long, env = "BASTION_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Public server hostname echoed to registering machines.
    #[arg(long, env = "BASTION_SERVER_URL")]
    server_url: String,

    /// SSH port machines use for their reverse tunnel.
    #[arg(long, default_value_t = 2222, env = "BASTION_TUNNEL_PORT")]
    tunnel_port: u16,

    /// SSH user machines log in as for their reverse tunnel.
    #[arg(long, default_value = "bastion", env = "BASTION_TUNNEL_USER")]
    tunnel_user: String,

    /// Routing daemon command line, restarted on every routing change.
    #[arg(long, env = "BASTION_ROUTING_DAEMON")]
    routing_daemon: Option<String>,

    /// Requests per minute allowed from one client IP (0 disables).
    #[arg(long, default_value_t = DEFAULT_GLOBAL_LIMIT, env = "BASTION_RATE_LIMIT")]
    rate_limit: u32,

    /// Requests per minute allowed from one client IP on authenticated
    /// routes (0 disables).
    #[arg(long, default_value_t = DEFAULT_AUTHED_LIMIT, env = "BASTION_AUTH_RATE_LIMIT")]
    auth_rate_limit: u32,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    bastion_core::tracing_init::init_tracing("bastion_server=info,bastiond=info", args.log_json);

    let ports = PortPool::new(args.port_min, args.port_max)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %args.listen,
        ports = %ports,
        capacity = ports.capacity(),
        "Starting bastiond"
    );

    let db = RegistryDatabase::open(&args.db_path).await?;
    std::fs::create_dir_all(&args.keys_dir)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let files = RoutingFiles::new(
        args.config_path.clone(),
        args.keys_dir.clone(),
        args.server_key.clone(),
        args.authorized_keys.clone(),
    );

    let mut supervisor_task = None;
    let daemon = args.routing_daemon.as_deref().and_then(DaemonCommand::parse);
    let reload: Arc<dyn ReloadHook> = match daemon {
        Some(command) => {
            let (handle, task) = spawn_supervisor(command, shutdown_rx.clone());
            supervisor_task = Some(task);
            Arc::new(handle)
        }
        None => {
            warn!("No routing daemon configured; config changes will not trigger a reload");
            Arc::new(NoDaemon)
        }
    };

    let registry = Arc::new(Registry::new(db, ports, files, reload));

    // Bring generated files in line with the store before serving.
    if let bastion_server::DerivedState::Stale(failures) = registry.regenerate_all().await {
        warn!(?failures, "Initial routing artifact generation incomplete");
    }

    let app = build_router(AppState {
        registry,
        api_key: ApiKey::new(&args.api_key),
        server_url: args.server_url,
        tunnel_port: args.tunnel_port,
        tunnel_user: args.tunnel_user,
        rate_limits: RateLimits {
            global: args.rate_limit,
            authed: args.auth_rate_limit,
        },
    });

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(addr = %args.listen, "API server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = supervisor_task {
        let _ = task.await;
    }

    info!("bastiond stopped");
    Ok(())
}
