use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid target specification: {0}")]
    InvalidTarget(String),

    #[error("Client unreachable: {0}")]
    ClientUnreachable(String),

    #[error("Client not approved: {0}")]
    ClientUnapproved(String),

    #[error("Task timed out: {0}")]
    TaskTimeout(String),

    #[error("Aggregation conflict: {0}")]
    AggregationConflict(String),

    #[error("Delta input mismatch: {0}")]
    DeltaInputMismatch(String),

    #[error("Unknown client: {0}")]
    UnknownClient(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Unknown scan: {0}")]
    UnknownScan(String),

    #[error("Unknown execution: {0}")]
    UnknownExecution(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
