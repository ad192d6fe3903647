use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::aggregator::ResultAggregator;
use crate::api::{self, AppState};
use crate::cli::commands::ServeArgs;
use crate::config::{parse_config, FleetConfig};
use crate::coordinator::{HttpTransport, ScanCoordinator};
use crate::db::Database;
use crate::errors::FleetError;
use crate::registry::{ClientRegistry, LivenessSweeper};

pub async fn handle_serve(args: ServeArgs) -> Result<(), FleetError> {
    let config = match &args.config {
        Some(path) => parse_config(&PathBuf::from(path)).await?,
        None => FleetConfig::default(),
    };

    let host = args.host.unwrap_or_else(|| config.host());
    let port = args.port.unwrap_or_else(|| config.port());
    let db_path = args.db.unwrap_or_else(|| config.db_path());

    info!(host = %host, port = port, db = %db_path, "Starting coordination server");

    let db = Database::new(&db_path)?;
    let registry = Arc::new(ClientRegistry::load(db.clone())?);
    let aggregator = Arc::new(ResultAggregator::new(db.clone()));
    let policy = config.dispatch_policy();
    let transport = Arc::new(HttpTransport::new(policy.request_timeout)?);
    let coordinator = ScanCoordinator::new(
        registry.clone(),
        aggregator,
        transport,
        db.clone(),
        policy,
    );

    // Process-wide liveness sweep, stopped again at shutdown.
    let sweeper = LivenessSweeper::start(
        registry.clone(),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
    );

    let state = AppState {
        db,
        registry,
        coordinator,
    };
    let app = api::build_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| FleetError::Internal(format!("Server error: {}", e)))?;

    info!("Shutting down");
    sweeper.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
