//! Error types for the FoodLens inference pipeline

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for FoodLens inference operations
pub type InferenceResult<T> = Result<T, InferenceError>;

/// Which model artifact a lookup was searching for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// The SafeTensors checkpoint holding the network weights
    Weights,
    /// The JSON index-to-label table
    ClassMap,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weights => write!(f, "weights"),
            Self::ClassMap => write!(f, "classmap"),
        }
    }
}

/// Main error type for registry, runtime and prediction operations
///
/// The type is `Clone` so that the outcome of a single model load can be
/// handed to every caller that waited on it.
#[derive(Error, Debug, Clone)]
pub enum InferenceError {
    /// The requested key is not part of the configured descriptor table
    #[error("Unknown model key '{key}'. Available models: {}", .available.join(", "))]
    UnknownModelKey {
        /// Key that was requested
        key: String,
        /// Keys that are configured, sorted
        available: Vec<String>,
    },

    /// A required artifact is absent from every search root
    #[error("Model artifact not found ({which}): '{filename}' not present in any of [{}]", display_paths(.searched))]
    ArtifactNotFound {
        /// Which artifact is missing
        which: ArtifactKind,
        /// File name that was searched for
        filename: String,
        /// Roots that were searched, in order
        searched: Vec<PathBuf>,
    },

    /// The class map could not be parsed or does not fit the model
    #[error("Malformed class map: {0}")]
    MalformedClassMap(String),

    /// The image payload could not be decoded
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    /// Checkpoint tensors do not match the architecture
    #[error("Weight load error: {0}")]
    WeightLoad(String),

    /// The compute device could not be created or used
    #[error("Device error: {0}")]
    Device(String),

    /// Any other fault raised while serving a prediction
    #[error("Internal prediction error: {0}")]
    InternalPrediction(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<candle_core::Error> for InferenceError {
    fn from(error: candle_core::Error) -> Self {
        Self::InternalPrediction(format!("Candle error: {error}"))
    }
}

impl From<std::io::Error> for InferenceError {
    fn from(error: std::io::Error) -> Self {
        Self::InternalPrediction(format!("IO error: {error}"))
    }
}

impl From<serde_json::Error> for InferenceError {
    fn from(error: serde_json::Error) -> Self {
        Self::InternalPrediction(format!("Serialization error: {error}"))
    }
}

impl From<tokio::task::JoinError> for InferenceError {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_panic() {
            Self::InternalPrediction("worker task panicked".to_string())
        } else {
            Self::InternalPrediction(format!("worker task failed: {error}"))
        }
    }
}

/// Convert from validator errors
impl From<validator::ValidationErrors> for InferenceError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = err
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| {
                    format!(
                        "{}: {}",
                        field,
                        error
                            .message
                            .as_ref()
                            .unwrap_or(&std::borrow::Cow::Borrowed("validation error"))
                    )
                })
            })
            .collect();
        messages.sort();

        if messages.is_empty() {
            // Nested struct failures only show up in the Display output
            return Self::Configuration(err.to_string());
        }
        Self::Configuration(messages.join(", "))
    }
}

impl InferenceError {
    /// Build an `UnknownModelKey` error from the configured keys
    pub fn unknown_key<I, S>(key: &str, available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut available: Vec<String> = available.into_iter().map(Into::into).collect();
        available.sort();
        Self::UnknownModelKey {
            key: key.to_string(),
            available,
        }
    }

    /// Stable machine-readable identifier of the error kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownModelKey { .. } => "unknown_model_key",
            Self::ArtifactNotFound { .. } => "artifact_not_found",
            Self::MalformedClassMap(_) => "malformed_class_map",
            Self::ImageDecode(_) => "image_decode_error",
            Self::WeightLoad(_) => "weight_load_error",
            Self::Device(_) => "device_error",
            Self::InternalPrediction(_) => "internal_prediction_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Convert error to appropriate HTTP status code
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::UnknownModelKey { .. } => 404,
            Self::ImageDecode(_) => 422,
            Self::ArtifactNotFound { .. } | Self::Device(_) => 503,
            _ => 500,
        }
    }

    /// Whether the failure happened while loading a model, as opposed to
    /// while serving a request against a loaded one
    #[must_use]
    pub const fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::ArtifactNotFound { .. }
                | Self::MalformedClassMap(_)
                | Self::WeightLoad(_)
                | Self::Device(_)
        )
    }
}

/// Structured error response for serving layers
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details for API consumers
    pub error: ErrorDetails,
}

/// Detailed error information for structured API responses
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    /// Error type identifier
    pub r#type: String,
    /// Human-readable error message
    pub message: String,
    /// HTTP-style status code
    pub status: u16,
}

impl From<&InferenceError> for ErrorResponse {
    fn from(err: &InferenceError) -> Self {
        Self {
            error: ErrorDetails {
                r#type: err.kind().to_string(),
                message: err.to_string(),
                status: err.status_code(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key_message_lists_available_models() {
        let err = InferenceError::unknown_key("unknown_model", ["vit_food101", "resnet_food101"]);
        let message = err.to_string();
        assert!(message.contains("unknown_model"));
        assert!(message.contains("resnet_food101, vit_food101"));
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_artifact_not_found_names_missing_artifact() {
        let err = InferenceError::ArtifactNotFound {
            which: ArtifactKind::ClassMap,
            filename: "food101_classes.json".to_string(),
            searched: vec![PathBuf::from("/a"), PathBuf::from("/b")],
        };
        let message = err.to_string();
        assert!(message.contains("(classmap)"));
        assert!(message.contains("food101_classes.json"));
        assert!(message.contains("/a, /b"));
        assert!(err.is_load_failure());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(InferenceError::ImageDecode("x".into()).kind(), "image_decode_error");
        assert_eq!(InferenceError::WeightLoad("x".into()).kind(), "weight_load_error");
        assert_eq!(InferenceError::ImageDecode("x".into()).status_code(), 422);
        assert!(!InferenceError::ImageDecode("x".into()).is_load_failure());
    }

    #[test]
    fn test_error_response_conversion() {
        let err = InferenceError::Device("CUDA device 0 unavailable".to_string());
        let response = ErrorResponse::from(&err);

        assert_eq!(response.error.r#type, "device_error");
        assert_eq!(response.error.status, 503);
        assert!(response.error.message.contains("CUDA"));
    }
}
