use std::path::Path;

use tracing::warn;

use super::types::FleetConfig;
use crate::errors::FleetError;

pub async fn parse_config(path: &Path) -> Result<FleetConfig, FleetError> {
    if !path.exists() {
        return Err(FleetError::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > 1_048_576 {
        return Err(FleetError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    let config: FleetConfig = serde_yaml::from_str(&content)?;

    validate_conflicts(&config)?;

    Ok(config)
}

/// Detect semantic conflicts in the parsed configuration.
fn validate_conflicts(config: &FleetConfig) -> Result<(), FleetError> {
    if let Some(heartbeat) = &config.heartbeat {
        if heartbeat.interval_secs == Some(0) {
            return Err(FleetError::Config(
                "heartbeat.interval_secs must be greater than zero".into(),
            ));
        }
        if let Some(multiplier) = heartbeat.timeout_multiplier {
            if multiplier < 2 {
                warn!(
                    multiplier,
                    "heartbeat.timeout_multiplier below 2 risks flapping clients offline"
                );
            }
        }
    }

    if let Some(dispatch) = &config.dispatch {
        if dispatch.per_target_timeout_secs == Some(0) && dispatch.base_timeout_secs == Some(0) {
            return Err(FleetError::Config(
                "dispatch timeouts cannot both be zero".into(),
            ));
        }
    }

    if config.partition.as_ref().and_then(|p| p.max_targets) == Some(0) {
        return Err(FleetError::Config(
            "partition.max_targets must be greater than zero".into(),
        ));
    }

    Ok(())
}
