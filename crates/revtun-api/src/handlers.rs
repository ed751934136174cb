use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use revtun_manager::ManagerError;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::*;
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn not_found(id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(
            format!("Tunnel '{}' not found", id),
            "TUNNEL_NOT_FOUND",
        )),
    )
}

impl From<ManagerError> for ErrorResponse {
    fn from(err: ManagerError) -> Self {
        let code = match err {
            ManagerError::Capacity { .. } => "CAPACITY_EXHAUSTED",
            ManagerError::InvalidConfig(_) => "INVALID_CONFIG",
            ManagerError::Agent(_) => "TUNNEL_START_FAILED",
        };
        ErrorResponse::new(err.to_string(), code)
    }
}

fn manager_error(err: ManagerError) -> ApiError {
    let status = match err {
        ManagerError::Capacity { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err.into()))
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Tunnel count and remaining port capacity
pub async fn relay_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let range = state.manager.port_range();

    Json(StatusResponse {
        tunnels: state.manager.tunnel_count(),
        available_ports: state.manager.available_port_count(),
        port_range: PortRange {
            start: *range.start(),
            end: *range.end(),
        },
    })
}

/// List all active tunnels
pub async fn list_tunnels(State(state): State<Arc<AppState>>) -> Json<TunnelList> {
    debug!("Listing tunnels");

    Json(TunnelList {
        tunnels: state.manager.client_ids(),
    })
}

/// Create a tunnel.
///
/// The body is optional; an empty body asks for a generated identifier.
pub async fn create_tunnel(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateTunnelResponse>), ApiError> {
    let request: CreateTunnelRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateTunnelRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    format!("Invalid request body: {}", e),
                    "INVALID_REQUEST",
                )),
            )
        })?
    };

    let info = state
        .manager
        .new_client(request.id.as_deref())
        .await
        .map_err(|e| {
            warn!(requested_id = ?request.id, error = %e, "Failed to create tunnel");
            manager_error(e)
        })?;

    info!(tunnel_id = %info.id, port = info.port, "Tunnel provisioned");
    Ok((StatusCode::CREATED, Json(info.into())))
}

/// Get tunnel information
pub async fn get_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TunnelInfo>, ApiError> {
    debug!("Getting tunnel: {}", id);

    let client = state.manager.get_client(&id).ok_or_else(|| not_found(&id))?;

    Ok(Json(TunnelInfo {
        port: state.manager.client_port(&id),
        state: client.state(),
        stats: client.stats(),
        id,
    }))
}

/// Delete a tunnel
pub async fn delete_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    info!("Deleting tunnel: {}", id);

    if state.manager.remove_client(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&id))
    }
}
