use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::api::errors::error_response;
use crate::api::models::ListQuery;
use crate::api::AppState;

pub async fn list_scan_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let limit = query.limit.unwrap_or(20);
    let results = state
        .db
        .list_results_for_scan(&id, limit)
        .map_err(error_response)?;
    Ok(Json(json!({ "results": results, "total": results.len() })))
}

pub async fn list_scan_reports(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let limit = query.limit.unwrap_or(20);
    let only_changes = query.only_changes.unwrap_or(false);
    let reports = state
        .db
        .list_reports_for_scan(&id, limit, only_changes)
        .map_err(error_response)?;
    Ok(Json(json!({ "reports": reports, "total": reports.len() })))
}

pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.db.get_result(&id) {
        Ok(Some(result)) => {
            let summary = result.summary();
            let mut body = serde_json::to_value(&result).unwrap_or(Value::Null);
            if let Value::Object(ref mut map) = body {
                map.insert(
                    "summary".to_string(),
                    serde_json::to_value(&summary).unwrap_or(Value::Null),
                );
            }
            Ok(Json(body))
        }
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Result not found"})),
        )),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.db.get_report(&id) {
        Ok(Some(report)) => Ok(Json(report)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Report not found"})),
        )),
        Err(e) => Err(error_response(e)),
    }
}
