use std::path::PathBuf;

use crate::cli::commands::ValidateArgs;
use crate::config::parse_config;
use crate::errors::FleetError;

pub async fn handle_validate(args: ValidateArgs) -> Result<(), FleetError> {
    let path = PathBuf::from(&args.config);
    let _config = parse_config(&path).await?;
    println!("Configuration is valid: {}", args.config);
    Ok(())
}
