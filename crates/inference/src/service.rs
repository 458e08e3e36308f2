//! Prediction service: registry lookup, preprocessing, forward pass, ranking

use crate::error::{InferenceError, InferenceResult};
use crate::health::ModelHealth;
use crate::models::{ModelDescriptor, ModelKind};
use crate::preprocess;
use crate::registry::ModelRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Maximum number of ranked entries returned with a prediction
pub const TOP_K: usize = 5;

/// One ranked class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedClass {
    /// Raw class label
    pub class_name: String,
    /// Softmax probability
    pub confidence: f32,
}

/// Outcome of a successful prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Raw label of the top class
    pub class_name: String,
    /// Display form of the top label, e.g. `Apple Pie`
    pub food_name: String,
    /// Probability of the top class
    pub confidence: f32,
    /// Up to five classes in descending probability
    pub top5: Vec<RankedClass>,
    /// Key of the model that produced the result
    pub model_used: String,
    /// Display name of that model
    pub model_name: String,
}

/// Wire shape of a prediction: the result fields flattened next to
/// `success`, or `success: false` with an error message
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PredictResponse {
    /// Prediction succeeded
    Success {
        /// Always `true`
        success: bool,
        /// Result fields
        #[serde(flatten)]
        result: PredictionResult,
    },
    /// Prediction failed
    Failure {
        /// Always `false`
        success: bool,
        /// Error message
        error: String,
        /// Machine-readable error kind
        error_kind: &'static str,
    },
}

impl From<InferenceResult<PredictionResult>> for PredictResponse {
    fn from(outcome: InferenceResult<PredictionResult>) -> Self {
        match outcome {
            Ok(result) => Self::Success {
                success: true,
                result,
            },
            Err(e) => Self::Failure {
                success: false,
                error: e.to_string(),
                error_kind: e.kind(),
            },
        }
    }
}

impl PredictResponse {
    /// Whether this response carries a result
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Entry of the model listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Display name
    pub name: String,
    /// Architecture family
    #[serde(rename = "type")]
    pub kind: ModelKind,
    /// Checkpoint file name
    pub file: String,
}

impl From<&ModelDescriptor> for ModelSummary {
    fn from(descriptor: &ModelDescriptor) -> Self {
        Self {
            name: descriptor.display_name.clone(),
            kind: descriptor.kind,
            file: descriptor.artifact_filename.clone(),
        }
    }
}

/// Request statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Predictions attempted
    pub total_predictions: u64,
    /// Predictions that returned an error
    pub failed_predictions: u64,
    /// Mean wall time per prediction in milliseconds
    pub avg_latency_ms: f64,
    /// Model load attempts started
    pub load_attempts: u64,
}

#[derive(Default)]
struct StatsInner {
    total_predictions: AtomicU64,
    failed_predictions: AtomicU64,
    total_latency_us: AtomicU64,
}

/// Serves predictions against the models of a registry
#[derive(Clone)]
pub struct PredictionService {
    registry: ModelRegistry,
    stats: Arc<StatsInner>,
}

impl PredictionService {
    /// Create a service over a registry
    #[must_use]
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            stats: Arc::new(StatsInner::default()),
        }
    }

    /// The underlying registry
    #[must_use]
    pub const fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Classify an encoded image with the model registered under `model_key`
    pub async fn predict(&self, model_key: &str, image_bytes: Vec<u8>) -> InferenceResult<PredictionResult> {
        let started = Instant::now();
        let outcome = self.run_prediction(model_key, image_bytes).await;

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_us = started.elapsed().as_micros() as u64;
        self.stats.total_predictions.fetch_add(1, Ordering::Relaxed);
        self.stats.total_latency_us.fetch_add(elapsed_us, Ordering::Relaxed);

        match &outcome {
            Ok(result) => debug!(
                "Predicted '{}' ({:.3}) with '{}' in {:.1}ms",
                result.class_name,
                result.confidence,
                model_key,
                elapsed_us as f64 / 1000.0
            ),
            Err(e) => {
                self.stats.failed_predictions.fetch_add(1, Ordering::Relaxed);
                warn!("Prediction with '{}' failed: {}", model_key, e);
            }
        }

        outcome
    }

    /// Like [`Self::predict`], shaped for the wire
    pub async fn predict_response(&self, model_key: &str, image_bytes: Vec<u8>) -> PredictResponse {
        self.predict(model_key, image_bytes).await.into()
    }

    async fn run_prediction(&self, model_key: &str, image_bytes: Vec<u8>) -> InferenceResult<PredictionResult> {
        let model = self.registry.get(model_key).await?;

        // Decode and forward pass are CPU/GPU bound; a panic in either
        // surfaces as a JoinError rather than unwinding into the caller.
        let scores = {
            let model = Arc::clone(&model);
            tokio::task::spawn_blocking(move || {
                let descriptor = &model.descriptor;
                let pixels = preprocess::preprocess(&image_bytes, descriptor.input_size, descriptor.architecture)?;
                model.runtime.forward(&pixels)
            })
            .await??
        };

        if scores.len() != model.runtime.num_classes() {
            return Err(InferenceError::InternalPrediction(format!(
                "model produced {} scores for {} classes",
                scores.len(),
                model.runtime.num_classes()
            )));
        }

        let probabilities = softmax(&scores);
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(InferenceError::InternalPrediction(
                "model produced non-finite scores".to_string(),
            ));
        }

        let ranked = rank_top_k(&probabilities, TOP_K);
        let top = *ranked.first().ok_or_else(|| {
            InferenceError::InternalPrediction("model produced no scores".to_string())
        })?;

        let class_name = model.class_map.label(top);
        let top5 = ranked
            .iter()
            .map(|&index| RankedClass {
                class_name: model.class_map.label(index),
                confidence: probabilities[index],
            })
            .collect();

        Ok(PredictionResult {
            food_name: food_name(&class_name),
            class_name,
            confidence: probabilities[top],
            top5,
            model_used: model.descriptor.key.clone(),
            model_name: model.descriptor.display_name.clone(),
        })
    }

    /// Configured models keyed by model key; never triggers a load
    #[must_use]
    pub fn list_models(&self) -> BTreeMap<String, ModelSummary> {
        self.registry
            .descriptors()
            .map(|descriptor| (descriptor.key.clone(), ModelSummary::from(descriptor)))
            .collect()
    }

    /// Health of one model; never triggers a load
    pub fn health(&self, model_key: &str) -> InferenceResult<ModelHealth> {
        let descriptor = self.registry.descriptor(model_key)?;
        Ok(ModelHealth::new(
            descriptor,
            self.registry.cached(model_key).as_deref(),
            self.registry.keys(),
        ))
    }

    /// Request statistics
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        let total = self.stats.total_predictions.load(Ordering::Relaxed);
        let total_latency_us = self.stats.total_latency_us.load(Ordering::Relaxed);

        ServiceStats {
            total_predictions: total,
            failed_predictions: self.stats.failed_predictions.load(Ordering::Relaxed),
            avg_latency_ms: if total > 0 {
                total_latency_us as f64 / total as f64 / 1000.0
            } else {
                0.0
            },
            load_attempts: self.registry.load_count(),
        }
    }
}

/// Numerically stable softmax, accumulated in f64
#[must_use]
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = scores.iter().map(|&s| f64::from(s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();

    #[allow(clippy::cast_possible_truncation)]
    exps.iter().map(|&e| (e / sum) as f32).collect()
}

/// Indices of the `k` largest values, descending; equal values keep
/// ascending index order
#[must_use]
pub fn rank_top_k(values: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then(a.cmp(&b)));
    order.truncate(k.min(values.len()));
    order
}

/// `apple_pie` -> `Apple Pie`
#[must_use]
pub fn food_name(label: &str) -> String {
    label
        .replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
