//! # FoodLens CLI - Main Entry Point
//!
//! Lists models, classifies images and reports model health.

use clap::Parser;
use foodlens_inference::LoggingConfig;
use tracing_subscriber::EnvFilter;

mod cli_options;

use cli_options::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_logging(&config.logging);

    cli.run(config).await
}

/// Logs go to stderr so command output on stdout stays valid JSON.
/// `FOODLENS_LOG` takes precedence over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_env("FOODLENS_LOG")
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.init(),
    }
}
