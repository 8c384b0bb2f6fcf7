//! REST surface over the registry.
//!
//! `GET /api/status` is public; every other route requires
//! `Authorization: Bearer <api key>`. Every client IP is rate limited, and
//! more tightly on the authenticated routes.

mod auth;
mod error;
mod machines;
mod rate_limit;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;

use crate::registry::Registry;

pub use auth::ApiKey;
pub use error::ApiError;
pub use rate_limit::{DEFAULT_AUTHED_LIMIT, DEFAULT_GLOBAL_LIMIT, RateLimiter, RateLimits};
pub use machines::{
    HeartbeatRequest, MachineEntry, RegisterRequest, RegisterResponse, RenameRequest,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub api_key: ApiKey,
    /// Public hostname echoed to registering machines.
    pub server_url: String,
    /// Port of the reverse-tunnel SSH endpoint.
    pub tunnel_port: u16,
    /// Login used by machines when opening the reverse tunnel.
    pub tunnel_user: String,
    pub rate_limits: RateLimits,
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let global_limiter = Arc::new(RateLimiter::per_minute(state.rate_limits.global));
    let authed_limiter = Arc::new(RateLimiter::per_minute(state.rate_limits.authed));

    let authed = Router::new()
        .route("/api/register", post(machines::register))
        .route("/api/machines", get(machines::list))
        .route("/api/machines/{name}", delete(machines::remove))
        .route("/api/machines/{name}/rename", put(machines::rename))
        .route("/api/heartbeat", post(machines::heartbeat))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .route_layer(middleware::from_fn_with_state(
            authed_limiter,
            rate_limit::limit_by_ip,
        ));

    Router::new()
        .route("/api/status", get(machines::status))
        .merge(authed)
        .layer(middleware::from_fn_with_state(
            global_limiter,
            rate_limit::limit_by_ip,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
