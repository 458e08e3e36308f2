//! Index-to-label tables derived from a checkpoint's training-time class order

use crate::error::{InferenceError, InferenceResult};
use std::collections::BTreeMap;
use std::path::Path;

/// Immutable index-to-label table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassMap {
    labels: BTreeMap<usize, String>,
}

impl ClassMap {
    /// Parse a JSON object keyed by stringified non-negative integers,
    /// e.g. `{"0": "apple_pie", "1": "baby_back_ribs"}`
    pub fn from_json_str(raw: &str) -> InferenceResult<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| InferenceError::MalformedClassMap(format!("invalid JSON: {e}")))?;
        let object = value.as_object().ok_or_else(|| {
            InferenceError::MalformedClassMap("expected a JSON object of index -> label".to_string())
        })?;

        let mut labels = BTreeMap::new();
        for (key, label) in object {
            let index: usize = key.trim().parse().map_err(|_| {
                InferenceError::MalformedClassMap(format!(
                    "key '{key}' is not a non-negative integer"
                ))
            })?;
            let label = label.as_str().ok_or_else(|| {
                InferenceError::MalformedClassMap(format!("label for index {index} is not a string"))
            })?;
            if labels.insert(index, label.to_string()).is_some() {
                return Err(InferenceError::MalformedClassMap(format!(
                    "index {index} appears more than once"
                )));
            }
        }

        Ok(Self { labels })
    }

    /// Read and parse a class map file
    pub fn from_file(path: &Path) -> InferenceResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            InferenceError::MalformedClassMap(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Build a map from labels listed in index order
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).enumerate().collect(),
        }
    }

    /// Label for `index`; an unmapped index yields the index itself as text
    #[must_use]
    pub fn label(&self, index: usize) -> String {
        self.labels
            .get(&index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }

    /// Label for `index`, if mapped
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(&index).map(String::as_str)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the map has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Whether the keys are exactly `0..len`
    #[must_use]
    pub fn is_contiguous(&self) -> bool {
        self.labels.keys().enumerate().all(|(position, index)| position == *index)
    }

    /// Labels in index order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.values().map(String::as_str)
    }
}
