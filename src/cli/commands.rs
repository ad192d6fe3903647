use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fleetscan", version, about = "Distributed network scan coordinator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the coordination server
    Serve(ServeArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Listen address (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port (overrides config)
    #[arg(long)]
    pub port: Option<u16>,

    /// SQLite database path (overrides config)
    #[arg(long)]
    pub db: Option<String>,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Config file to validate
    pub config: String,
}
