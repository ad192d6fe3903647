pub mod errors;
pub mod models;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::coordinator::ScanCoordinator;
use crate::db::Database;
use crate::registry::ClientRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<ClientRegistry>,
    pub coordinator: ScanCoordinator,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", axum::routing::get(routes::health::health_check))
        .route(
            "/api/clients",
            axum::routing::get(routes::clients::list_clients),
        )
        .route(
            "/api/clients/{id}/heartbeat",
            axum::routing::post(routes::clients::heartbeat),
        )
        .route(
            "/api/clients/{id}/approve",
            axum::routing::post(routes::clients::approve_client),
        )
        .route(
            "/api/clients/{id}/revoke",
            axum::routing::post(routes::clients::revoke_client),
        )
        .route(
            "/api/scans",
            axum::routing::post(routes::scans::create_scan).get(routes::scans::list_scans),
        )
        .route(
            "/api/scans/{id}",
            axum::routing::get(routes::scans::get_scan).delete(routes::scans::delete_scan),
        )
        .route(
            "/api/scans/{id}/execute",
            axum::routing::post(routes::scans::execute_scan),
        )
        .route(
            "/api/scans/{id}/results",
            axum::routing::get(routes::reports::list_scan_results),
        )
        .route(
            "/api/scans/{id}/reports",
            axum::routing::get(routes::reports::list_scan_reports),
        )
        .route(
            "/api/results/{id}",
            axum::routing::get(routes::reports::get_result),
        )
        .route(
            "/api/reports/{id}",
            axum::routing::get(routes::reports::get_report),
        )
        .route(
            "/api/executions/{id}",
            axum::routing::get(routes::executions::get_execution),
        )
        .route(
            "/api/executions/{id}/cancel",
            axum::routing::post(routes::executions::cancel_execution),
        )
        .route(
            "/api/tasks/{id}/progress",
            axum::routing::post(routes::tasks::task_progress),
        )
        .route(
            "/api/tasks/{id}/result",
            axum::routing::post(routes::tasks::submit_task_result),
        )
        .route("/api/stats", axum::routing::get(routes::stats::get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
