//! Configuration management for the FoodLens inference pipeline

use crate::device::DevicePreference;
use crate::error::{InferenceError, InferenceResult};
use crate::models::{default_descriptors, ModelDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

/// Main configuration: the static descriptor table and where to find artifacts
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct InferenceConfig {
    /// Directories searched for artifacts, in priority order
    #[validate(length(min = 1, message = "At least one model root is required"))]
    pub model_roots: Vec<PathBuf>,

    /// Key used when a caller does not name a model
    #[validate(length(min = 1, message = "Default model cannot be empty"))]
    pub default_model: String,

    /// Device placement for loaded models
    pub device: DevicePreference,

    /// Logging configuration
    #[validate(nested)]
    pub logging: LoggingConfig,

    /// Static descriptor table, fixed for the life of the process
    #[validate(length(min = 1, message = "Model table cannot be empty"))]
    pub models: Vec<ModelDescriptor>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,

    /// Log format (json, text, compact)
    #[validate(custom(function = "validate_log_format"))]
    pub format: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_roots: vec![PathBuf::from("ml_models"), PathBuf::from("../ml_models")],
            default_model: "resnet_food101".to_string(),
            device: DevicePreference::Auto,
            logging: LoggingConfig::default(),
            models: default_descriptors(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Configuration builder for fluent configuration construction
#[derive(Debug)]
pub struct InferenceConfigBuilder {
    config: InferenceConfig,
}

impl InferenceConfigBuilder {
    /// Create a new configuration builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: InferenceConfig::default(),
        }
    }

    /// Replace the search roots
    #[must_use]
    pub fn model_roots<I, P>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.config.model_roots = roots.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        self
    }

    /// Add a search root with the highest priority
    #[must_use]
    pub fn prepend_model_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.config.model_roots.insert(0, root.as_ref().to_path_buf());
        self
    }

    /// Replace the descriptor table
    #[must_use]
    pub fn models(mut self, models: Vec<ModelDescriptor>) -> Self {
        self.config.models = models;
        self
    }

    /// Set the default model key
    #[must_use]
    pub fn default_model<S: Into<String>>(mut self, key: S) -> Self {
        self.config.default_model = key.into();
        self
    }

    /// Set the device preference
    #[must_use]
    pub const fn device(mut self, device: DevicePreference) -> Self {
        self.config.device = device;
        self
    }

    /// Set the log level
    #[must_use]
    pub fn log_level<S: Into<String>>(mut self, level: S) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> InferenceResult<InferenceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for InferenceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> InferenceResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `FOODLENS_*` environment variables
    pub fn apply_env(&mut self) -> InferenceResult<()> {
        if let Some(roots) = env::var_os("FOODLENS_MODEL_ROOTS") {
            self.model_roots = env::split_paths(&roots)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        if let Ok(default_model) = env::var("FOODLENS_DEFAULT_MODEL") {
            self.default_model = default_model;
        }

        if let Ok(device) = env::var("FOODLENS_DEVICE") {
            self.device = device.parse()?;
        }

        if let Ok(log_level) = env::var("FOODLENS_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        if let Ok(log_format) = env::var("FOODLENS_LOG_FORMAT") {
            self.logging.format = log_format;
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> InferenceResult<Self> {
        let content = read_config(path.as_ref())?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            InferenceError::Configuration(format!("Failed to parse TOML: {e}"))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> InferenceResult<Self> {
        let content = read_config(path.as_ref())?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            InferenceError::Configuration(format!("Failed to parse JSON: {e}"))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load a file, choosing the parser by extension (`.json`, else TOML)
    pub fn load<P: AsRef<Path>>(path: P) -> InferenceResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_file(path),
            _ => Self::from_file(path),
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> InferenceResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            InferenceError::Configuration(format!("Failed to serialize TOML: {e}"))
        })?;

        fs::write(path.as_ref(), content).map_err(|e| {
            InferenceError::Configuration(format!("Failed to write config file: {e}"))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> InferenceResult<()> {
        Validate::validate(self)?;

        let mut seen = HashSet::new();
        for descriptor in &self.models {
            descriptor.check().map_err(InferenceError::Configuration)?;
            if !seen.insert(descriptor.key.as_str()) {
                return Err(InferenceError::Configuration(format!(
                    "duplicate model key '{}'",
                    descriptor.key
                )));
            }
        }

        if !seen.contains(self.default_model.as_str()) {
            return Err(InferenceError::Configuration(format!(
                "default model '{}' is not in the model table",
                self.default_model
            )));
        }

        Ok(())
    }

    /// Descriptor for a configured key
    #[must_use]
    pub fn descriptor(&self, key: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|d| d.key == key)
    }
}

fn read_config(path: &Path) -> InferenceResult<String> {
    fs::read_to_string(path).map_err(|e| {
        InferenceError::Configuration(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })
}

// Custom validators
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("Invalid log level")),
    }
}

fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    match format.to_lowercase().as_str() {
        "json" | "text" | "compact" => Ok(()),
        _ => Err(ValidationError::new("Invalid log format")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Architecture;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = InferenceConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.descriptor("vit_food101").is_some());
    }

    #[test]
    fn test_config_builder() {
        let config = InferenceConfigBuilder::new()
            .model_roots(["/srv/models"])
            .prepend_model_root("/tmp/models")
            .device(DevicePreference::Cpu)
            .default_model("vit_food101")
            .build()
            .unwrap();

        assert_eq!(
            config.model_roots,
            vec![PathBuf::from("/tmp/models"), PathBuf::from("/srv/models")]
        );
        assert_eq!(config.device, DevicePreference::Cpu);
    }

    #[test]
    fn test_rejects_unknown_default_model() {
        let result = InferenceConfigBuilder::new().default_model("pizza_net").build();
        assert!(matches!(result, Err(InferenceError::Configuration(_))));
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let mut models = default_descriptors();
        models.push(ModelDescriptor::new("resnet_food101", "dup", Architecture::ResNet18, "x.safetensors"));
        let result = InferenceConfigBuilder::new().models(models).build();
        let err = result.unwrap_err().to_string();
        assert!(err.contains("duplicate model key"));
    }

    #[test]
    fn test_rejects_invalid_log_level() {
        let result = InferenceConfigBuilder::new().log_level("verbose").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_empty_roots() {
        let result = InferenceConfigBuilder::new().model_roots(Vec::<PathBuf>::new()).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_descriptor_table() {
        let toml = r#"
            model_roots = ["/opt/foodlens/models"]
            default_model = "resnet_small"
            device = "cpu"

            [[models]]
            key = "resnet_small"
            name = "ResNet-18 Food-101"
            type = "convnet"
            file = "resnet18_food101.safetensors"
            architecture = "resnet18"
            input_size = 224
            class_map = "food101_classes.json"
        "#;
        let config: InferenceConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].architecture, Architecture::ResNet18);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foodlens.toml");
        let config = InferenceConfig::default();
        config.save_to_file(&path).unwrap();

        let loaded = InferenceConfig::load(&path).unwrap();
        assert_eq!(loaded.models, config.models);
        assert_eq!(loaded.model_roots, config.model_roots);
    }

    #[test]
    fn test_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foodlens.json");
        std::fs::write(&path, serde_json::to_string(&InferenceConfig::default()).unwrap()).unwrap();
        assert!(InferenceConfig::load(&path).is_ok());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(InferenceConfig::load(&path), Err(InferenceError::Configuration(_))));
    }
}
