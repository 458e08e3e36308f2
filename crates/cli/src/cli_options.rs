//! Command-line options for the `foodlens` binary

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use foodlens_inference::{
    HealthChecker, InferenceConfig, ModelRegistry, PredictionService, RegistryHealthChecker,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// FoodLens - food image classification from the command line
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, or JSON by extension)
    #[arg(long, short, env = "FOODLENS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Additional artifact search root, searched before the configured ones
    #[arg(long = "model-root", value_name = "DIR", global = true)]
    pub model_roots: Vec<PathBuf>,

    /// Device placement: auto, cpu, cuda or metal
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Load the default model before running the command
    #[arg(long, global = true)]
    pub preload: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured models without loading them
    Models,

    /// Classify an image
    Predict {
        /// Image file (JPEG, PNG, WebP, GIF or BMP)
        image: PathBuf,

        /// Model key; defaults to the configured default model
        #[arg(long, short)]
        model: Option<String>,
    },

    /// Report model health without loading anything
    Health {
        /// Model key; defaults to the configured default model
        #[arg(long, short)]
        model: Option<String>,
    },
}

impl Cli {
    /// Build the configuration: file or defaults, then environment, then flags
    pub fn load_config(&self) -> Result<InferenceConfig> {
        let mut config = match &self.config {
            Some(path) => InferenceConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => InferenceConfig::default(),
        };
        config.apply_env()?;

        for root in self.model_roots.iter().rev() {
            config.model_roots.insert(0, root.clone());
        }
        if let Some(device) = &self.device {
            config.device = device.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Run the selected command
    pub async fn run(self, config: InferenceConfig) -> Result<()> {
        let service = PredictionService::new(ModelRegistry::new(&config)?);

        if self.preload {
            for (key, outcome) in service.registry().preload([&config.default_model]).await {
                outcome.with_context(|| format!("preloading '{key}'"))?;
                info!("Preloaded '{}'", key);
            }
        }

        match self.command {
            Commands::Models => emit(&service.list_models(), self.pretty),
            Commands::Predict { image, model } => {
                let key = model.unwrap_or(config.default_model);
                let bytes = std::fs::read(&image)
                    .with_context(|| format!("reading image {}", image.display()))?;

                let response = service.predict_response(&key, bytes).await;
                emit(&response, self.pretty)?;
                if !response.is_success() {
                    anyhow::bail!("prediction with '{key}' failed");
                }
                Ok(())
            }
            Commands::Health { model } => {
                let key = model.unwrap_or(config.default_model);
                let checker = RegistryHealthChecker::new(service.registry().clone());

                let report = HealthReport {
                    model: service.health(&key)?,
                    registry: checker.check_health_detailed().await?,
                    checker: checker.name(),
                };
                emit(&report, self.pretty)
            }
        }
    }
}

#[derive(Serialize)]
struct HealthReport {
    model: foodlens_inference::ModelHealth,
    registry: foodlens_inference::health::HealthCheckResult,
    checker: &'static str,
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}
