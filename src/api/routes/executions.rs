use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::api::errors::error_response;
use crate::api::AppState;

pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.coordinator.execution_status(&id).await {
        Some(status) => Ok(Json(status)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Execution not found"})),
        )),
    }
}

pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let result = state
        .coordinator
        .cancel_execution(&id)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "cancelled": true,
        "result_id": result.result_id,
        "completeness": result.completeness.as_str(),
    })))
}
