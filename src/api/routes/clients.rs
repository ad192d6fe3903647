use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use ipnet::IpNet;
use serde_json::{json, Value};

use crate::api::errors::error_response;
use crate::api::models::HeartbeatRequest;
use crate::api::AppState;
use crate::models::{ClientState, Heartbeat};

/// Heartbeat doubles as registration: unknown clients are created pending
/// approval and answered with 403 until an operator approves them.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    if req.client_id != id {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "client_id in body does not match path"})),
        ));
    }

    let scan_range = match &req.scan_range {
        Some(raw) if !raw.is_empty() => Some(raw.parse::<IpNet>().map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("invalid scan_range: {}", e)})),
            )
        })?),
        _ => None,
    };

    let hb = Heartbeat {
        client_id: req.client_id,
        hostname: req.hostname,
        address: format!("{}:{}", req.ip_address, req.port),
        scan_range,
        capacity: req.capacity.unwrap_or(1),
    };

    let client_state = state
        .registry
        .record_heartbeat(&hb)
        .await
        .map_err(error_response)?;

    let approved = client_state == ClientState::Approved;
    let status = if approved {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    Ok((
        status,
        Json(json!({
            "status": "success",
            "approved": approved,
            "state": client_state.as_str(),
        })),
    ))
}

pub async fn approve_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let client_state = state.registry.approve(&id).await.map_err(error_response)?;
    Ok(Json(json!({
        "status": "success",
        "client_id": id,
        "state": client_state.as_str(),
    })))
}

pub async fn revoke_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let client_state = state.registry.revoke(&id).await.map_err(error_response)?;
    Ok(Json(json!({
        "status": "success",
        "client_id": id,
        "state": client_state.as_str(),
    })))
}

pub async fn list_clients(State(state): State<AppState>) -> Json<Value> {
    let clients = state.registry.list().await;
    let rows: Vec<Value> = clients
        .iter()
        .map(|c| {
            json!({
                "client_id": c.client_id,
                "hostname": c.hostname,
                "address": c.address,
                "scan_range": c.scan_range.map(|r| r.to_string()),
                "state": c.state.as_str(),
                "capacity": c.capacity,
                "last_seen": c.last_seen.to_rfc3339(),
                "created_at": c.created_at.to_rfc3339(),
            })
        })
        .collect();
    Json(json!({ "clients": rows, "total": rows.len() }))
}
