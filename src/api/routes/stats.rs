use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use crate::api::errors::error_response;
use crate::api::AppState;

pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let stats = state.db.fleet_stats().map_err(error_response)?;
    Ok(Json(stats))
}
