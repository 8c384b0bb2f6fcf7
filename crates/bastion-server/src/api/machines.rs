//! Machine endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{instrument, warn};

use super::AppState;
use super::error::ApiError;
use crate::registry::DerivedState;
use crate::storage::Machine;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub local_user: String,
    #[serde(default)]
    pub public_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub name: String,
    pub port: u16,
    pub server: String,
    pub tunnel_port: u16,
    pub ssh_user: String,
    pub server_public_key: String,
}

/// Listing entry; the public key is deliberately omitted.
#[derive(Debug, Serialize, Deserialize)]
pub struct MachineEntry {
    pub name: String,
    pub owner: String,
    pub port: u16,
    pub local_user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

impl From<Machine> for MachineEntry {
    fn from(m: Machine) -> Self {
        Self {
            name: m.name,
            owner: m.owner,
            port: m.port,
            local_user: m.local_user,
            last_seen: m.last_seen,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub new_name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub name: String,
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "invalid json"))
}

fn log_stale(operation: &str, name: &str, derived: &DerivedState) {
    if let DerivedState::Stale(failures) = derived {
        warn!(operation, name, ?failures, "Mutation committed but routing artifacts are stale");
    }
}

/// `GET /api/status`
pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let count = state.registry.count().await?;
    Ok(Json(json!({ "status": "ok", "machine_count": count })))
}

/// `POST /api/register`
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let req = parse_body(body)?;
    let committed = state
        .registry
        .register(&req.name, &req.owner, &req.local_user, &req.public_key)
        .await?;
    log_stale("register", &committed.value.name, &committed.derived);

    let machine = committed.value;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            name: machine.name,
            port: machine.port,
            server: state.server_url.clone(),
            tunnel_port: state.tunnel_port,
            ssh_user: state.tunnel_user.clone(),
            server_public_key: state.registry.server_public_key().unwrap_or_default(),
        }),
    ))
}

/// `GET /api/machines`
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<MachineEntry>>, ApiError> {
    let machines = state.registry.list().await?;
    Ok(Json(machines.into_iter().map(MachineEntry::from).collect()))
}

/// `DELETE /api/machines/{name}`
#[instrument(skip(state))]
pub async fn remove(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let committed = state.registry.delete(&name).await?;
    log_stale("delete", &name, &committed.derived);
    Ok(Json(json!({ "ok": true })))
}

/// `PUT /api/machines/{name}/rename`
#[instrument(skip(state, body))]
pub async fn rename(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<RenameRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = parse_body(body)?;
    let committed = state.registry.rename(&name, &req.new_name).await?;
    log_stale("rename", &req.new_name, &committed.derived);
    Ok(Json(json!({ "ok": true, "name": committed.value.name })))
}

/// `POST /api/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = parse_body(body)?;
    if req.name.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "name is required"));
    }
    state.registry.heartbeat(&req.name).await?;
    Ok(Json(json!({ "ok": true })))
}
