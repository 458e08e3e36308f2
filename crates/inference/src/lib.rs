//! # FoodLens Inference
//!
//! Model registry and prediction pipeline for food image classification.
//! Networks are built with Candle from SafeTensors checkpoints found on a list
//! of search roots, loaded lazily on first use and cached for the life of the
//! process.
//!
//! ## Features
//!
//! - **Registry**: static descriptor table, single-flight lazy loading, retry after failure
//! - **Strict weights**: every network parameter must be present with the right shape
//! - **Preprocessing**: deterministic ImageNet-style resize, crop and normalization
//! - **Service**: top-5 predictions, model listing and per-model health
//!
//! ## Usage
//!
//! ```rust,no_run
//! use foodlens_inference::{InferenceConfig, ModelRegistry, PredictionService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = InferenceConfig::from_env()?;
//!     let service = PredictionService::new(ModelRegistry::new(&config)?);
//!     let image = std::fs::read("pizza.jpg")?;
//!     let result = service.predict(&config.default_model, image).await?;
//!     println!("{} ({:.1}%)", result.food_name, result.confidence * 100.0);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::missing_const_for_fn,
    clippy::uninlined_format_args,
    clippy::must_use_candidate,
    clippy::cast_precision_loss,
    clippy::significant_drop_tightening,
    clippy::needless_pass_by_value
)]

// Core modules
pub mod config;
pub mod device;
pub mod error;

// Pipeline components
pub mod inference;
pub mod models;
pub mod preprocess;
pub mod registry;

// Service surface
pub mod health;
pub mod service;

pub use config::{InferenceConfig, InferenceConfigBuilder, LoggingConfig};
pub use device::DevicePreference;
pub use error::{ArtifactKind, ErrorResponse, InferenceError, InferenceResult};
pub use health::{HealthChecker, HealthStatus, ModelHealth, RegistryHealthChecker};
pub use inference::{Checkpoint, ImageClassifier, ModelRuntime};
pub use models::{Architecture, ArtifactLocator, ClassMap, ModelDescriptor, ModelKind};
pub use preprocess::{preprocess, PreprocessPolicy};
pub use registry::{LoadedModel, ModelRegistry};
pub use service::{
    ModelSummary, PredictResponse, PredictionResult, PredictionService, RankedClass, ServiceStats,
};

/// Current version of the FoodLens inference crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
