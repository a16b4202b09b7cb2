pub mod api; // HTTP boundary
pub mod batch; // Directory batch runs
pub mod cli;
pub mod config;
pub mod core_state; // Startup wiring
pub mod models;
pub mod pipeline;

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    cli::execute(cli::Cli::parse())
}
