//! Health reporting for configured models

use crate::error::InferenceResult;
use crate::models::{ModelDescriptor, ModelKind};
use crate::preprocess::PreprocessPolicy;
use crate::registry::{LoadedModel, ModelRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Health status enumeration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    /// Every configured model can be served
    Healthy,
    /// Some models cannot be served
    Degraded(String),
    /// No model can be served
    Unhealthy(String),
}

/// Health checker trait
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Health status type returned by this checker
    type Status;

    /// Perform a health check
    async fn check_health(&self) -> InferenceResult<Self::Status>;

    /// Get the name of this health checker
    fn name(&self) -> &'static str;
}

/// Health of a single model, as reported by the `health` operation
///
/// Load-time details are present only once the model is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    /// Whether the model is loaded
    pub model_loaded: bool,
    /// Key of the model
    pub model_key: String,
    /// Display name of the model
    pub model_name: String,
    /// Architecture family
    pub model_type: ModelKind,
    /// Every configured key, sorted
    pub available_models: Vec<String>,
    /// Preprocessing applied to inputs of this model
    pub preprocessing: String,
    /// Device the model runs on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Resolved checkpoint path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights_path: Option<String>,
    /// Classifier output count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,
    /// When loading finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
}

impl ModelHealth {
    /// Build the report for `descriptor`, with details from `loaded` if present
    #[must_use]
    pub fn new(descriptor: &ModelDescriptor, loaded: Option<&LoadedModel>, available_models: Vec<String>) -> Self {
        Self {
            model_loaded: loaded.is_some(),
            model_key: descriptor.key.clone(),
            model_name: descriptor.display_name.clone(),
            model_type: descriptor.kind,
            available_models,
            preprocessing: PreprocessPolicy::for_architecture(descriptor.architecture).describe(descriptor.input_size),
            device: loaded.map(LoadedModel::device_label),
            weights_path: loaded.map(|m| m.weights_path.display().to_string()),
            num_classes: loaded.map(|m| m.runtime.num_classes()),
            loaded_at: loaded.map(|m| m.loaded_at),
        }
    }
}

/// Checks that every configured model is loaded or has its artifacts in place
///
/// Never loads a model; an unloaded model counts as servable if its
/// checkpoint and class map resolve against the search roots.
pub struct RegistryHealthChecker {
    registry: ModelRegistry,
}

impl RegistryHealthChecker {
    /// Create a checker over a registry
    #[must_use]
    pub const fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }

    fn issues(&self) -> (usize, Vec<String>) {
        let mut total = 0;
        let mut issues = Vec::new();

        for descriptor in self.registry.descriptors() {
            total += 1;
            if self.registry.is_loaded(&descriptor.key) {
                continue;
            }
            if let Err(e) = self.registry.locator().locate(descriptor) {
                issues.push(format!("{}: {e}", descriptor.key));
            }
        }

        (total, issues)
    }

    /// Perform a health check and gather registry metrics
    #[allow(clippy::cast_possible_truncation)]
    pub async fn check_health_detailed(&self) -> InferenceResult<HealthCheckResult> {
        let start_time = Instant::now();
        let status = self.check_health().await?;
        let duration = start_time.elapsed();

        Ok(HealthCheckResult {
            status,
            timestamp: Utc::now(),
            check_duration_ms: duration.as_millis() as u64,
            metrics: HealthMetrics {
                configured_models: self.registry.keys().len(),
                loaded_models: self.registry.loaded_keys(),
                load_attempts: self.registry.load_count(),
            },
        })
    }
}

#[async_trait]
impl HealthChecker for RegistryHealthChecker {
    type Status = HealthStatus;

    async fn check_health(&self) -> InferenceResult<Self::Status> {
        let (total, issues) = self.issues();

        Ok(match issues.len() {
            0 => HealthStatus::Healthy,
            n if n < total => HealthStatus::Degraded(issues.join("; ")),
            _ => HealthStatus::Unhealthy(issues.join("; ")),
        })
    }

    fn name(&self) -> &'static str {
        "foodlens-registry"
    }
}

/// Health check result with detailed information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Overall health status
    pub status: HealthStatus,
    /// Timestamp of the check
    pub timestamp: DateTime<Utc>,
    /// Duration of the health check in milliseconds
    pub check_duration_ms: u64,
    /// Registry metrics
    pub metrics: HealthMetrics,
}

/// Registry metrics reported with a health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Number of configured models
    pub configured_models: usize,
    /// Keys currently loaded
    pub loaded_models: Vec<String>,
    /// Load attempts since startup
    pub load_attempts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DevicePreference;
    use crate::models::{Architecture, ArtifactLocator};
    use tempfile::TempDir;

    fn registry(root: &std::path::Path) -> ModelRegistry {
        ModelRegistry::from_parts(
            vec![
                ModelDescriptor::new("resnet_food101", "ResNet", Architecture::ResNet18, "r.safetensors")
                    .with_class_map("classes.json"),
                ModelDescriptor::new("vit_food101", "ViT", Architecture::VitB16, "v.safetensors"),
            ],
            ArtifactLocator::new([root]),
            DevicePreference::Cpu,
        )
    }

    #[test]
    fn test_unloaded_model_health() {
        let descriptor = ModelDescriptor::new("vit_food101", "ViT", Architecture::VitB16, "v.safetensors");
        let health = ModelHealth::new(&descriptor, None, vec!["vit_food101".to_string()]);

        assert!(!health.model_loaded);
        assert_eq!(health.model_type, ModelKind::Transformer);
        assert!(health.preprocessing.contains("bicubic"));

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["model_loaded"], false);
        assert_eq!(json["model_type"], "transformer");
        assert!(json.get("device").is_none());
        assert!(json.get("num_classes").is_none());
    }

    #[tokio::test]
    async fn test_missing_artifacts_are_unhealthy() {
        let dir = TempDir::new().unwrap();
        let checker = RegistryHealthChecker::new(registry(dir.path()));
        assert_eq!(checker.name(), "foodlens-registry");

        match checker.check_health().await.unwrap() {
            HealthStatus::Unhealthy(msg) => {
                assert!(msg.contains("resnet_food101"));
                assert!(msg.contains("vit_food101"));
            }
            other => panic!("expected unhealthy, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_partial_artifacts_are_degraded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("v.safetensors"), b"placeholder").unwrap();
        let registry = registry(dir.path());
        let checker = RegistryHealthChecker::new(registry.clone());

        match checker.check_health().await.unwrap() {
            HealthStatus::Degraded(msg) => {
                assert!(msg.contains("resnet_food101"));
                assert!(!msg.contains("vit_food101"));
            }
            other => panic!("expected degraded, got {other:?}"),
        }

        // Checking never loads anything
        assert_eq!(registry.load_count(), 0);
    }

    #[tokio::test]
    async fn test_detailed_health_check() {
        let dir = TempDir::new().unwrap();
        for file in ["r.safetensors", "classes.json", "v.safetensors"] {
            std::fs::write(dir.path().join(file), b"placeholder").unwrap();
        }
        let checker = RegistryHealthChecker::new(registry(dir.path()));

        let result = checker.check_health_detailed().await.unwrap();
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.metrics.configured_models, 2);
        assert!(result.metrics.loaded_models.is_empty());
        assert_eq!(result.metrics.load_attempts, 0);
    }

    #[test]
    fn test_health_status_serialization() {
        let status = HealthStatus::Degraded("test issue".to_string());
        let json = serde_json::to_string(&status).unwrap();
        let deserialized: HealthStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, status);
    }
}
