use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::api::errors::error_response;
use crate::api::models::TaskResultRequest;
use crate::api::AppState;

/// Agent progress signal: the task moved from dispatched to running.
pub async fn task_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .coordinator
        .mark_task_running(&id)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({"status": "success"})))
}

/// Asynchronous result submission for a dispatched task.
pub async fn submit_task_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TaskResultRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let completed = match req.status.as_str() {
        "completed" => true,
        "failed" => false,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("unknown status: {}", other)})),
            ))
        }
    };

    let frozen = state
        .coordinator
        .submit_task_result(&id, completed, req.error, req.hosts)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "status": "success",
        "execution_frozen": frozen.is_some(),
        "completeness": frozen.map(|r| r.completeness.as_str()),
    })))
}
