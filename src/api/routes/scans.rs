use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::api::errors::error_response;
use crate::api::models::{CreateScanRequest, ListQuery};
use crate::api::AppState;
use crate::errors::FleetError;
use crate::models::ScanDefinition;
use crate::targets::expand_targets;

pub async fn create_scan(
    State(state): State<AppState>,
    Json(req): Json<CreateScanRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    // Reject unparseable target specs at definition time, not execution time.
    expand_targets(&req.targets, crate::targets::DEFAULT_MAX_TARGETS).map_err(error_response)?;

    let now = Utc::now();
    let mut definition = ScanDefinition::new(
        uuid::Uuid::new_v4().to_string(),
        req.name,
        req.targets,
        req.ports.unwrap_or_else(|| "1-1000".to_string()),
        now,
    );
    definition.description = req.description;
    definition.interval_minutes = req.interval_minutes;
    if let Some(args) = req.scan_arguments {
        definition.scan_arguments = args;
    }

    state.db.create_scan(&definition).map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": definition.id,
            "name": definition.name,
            "targets": definition.targets,
            "ports": definition.ports,
            "is_active": definition.is_active,
        })),
    ))
}

pub async fn list_scans(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let limit = query.limit.unwrap_or(20);
    let offset = query.offset.unwrap_or(0);

    let scans = state.db.list_scans(limit, offset).map_err(error_response)?;
    Ok(Json(json!({ "scans": scans, "total": scans.len() })))
}

pub async fn get_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.db.get_scan(&id) {
        Ok(Some(scan)) => Ok(Json(serde_json::to_value(&scan).unwrap_or(Value::Null))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Scan not found"})),
        )),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn delete_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.db.delete_scan(&id) {
        Ok(true) => Ok(Json(json!({"deleted": true}))),
        Ok(false) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Scan not found"})),
        )),
        Err(e) => Err(error_response(e)),
    }
}

/// Trigger one execution of the definition against the current fleet.
pub async fn execute_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let definition = state
        .db
        .get_scan(&id)
        .map_err(error_response)?
        .ok_or_else(|| error_response(FleetError::UnknownScan(id.clone())))?;

    let started = state
        .coordinator
        .execute(&definition)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::to_value(&started).unwrap_or(Value::Null)),
    ))
}
