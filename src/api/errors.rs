use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::errors::FleetError;

/// Map core errors onto HTTP responses.
pub fn error_response(e: FleetError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        FleetError::UnknownClient(_)
        | FleetError::UnknownTask(_)
        | FleetError::UnknownScan(_)
        | FleetError::UnknownExecution(_) => StatusCode::NOT_FOUND,
        FleetError::InvalidTarget(_) | FleetError::Config(_) => StatusCode::BAD_REQUEST,
        FleetError::InvalidTransition(_) | FleetError::DeltaInputMismatch(_) => {
            StatusCode::CONFLICT
        }
        FleetError::ClientUnapproved(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}
