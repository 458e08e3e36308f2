//! SafeTensors checkpoints with strict, name-matched weight loading
//!
//! Candle's stock backends report missing tensors and shape mismatches but
//! silently ignore tensors the architecture never asks for. [`StrictLoader`]
//! records every name the architecture requests so leftovers can be rejected
//! after construction.

use crate::error::{InferenceError, InferenceResult};
use crate::models::{Architecture, ClassMap};
use candle_core::{DType, Device, Shape, Tensor};
use candle_nn::var_builder::SimpleBackend;
use candle_nn::{Init, VarBuilder};
use parking_lot::Mutex;
use safetensors::SafeTensors;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Metadata key holding the class count
pub const METADATA_NUM_CLASSES: &str = "num_classes";

/// Metadata key holding an embedded class map (JSON object)
pub const METADATA_CLASS_MAP: &str = "class_map";

/// Tensors that are training bookkeeping and never requested by a network
const IGNORED_SUFFIXES: [&str; 1] = [".num_batches_tracked"];

/// A parsed checkpoint, tensors resident on the CPU
pub struct Checkpoint {
    path: PathBuf,
    tensors: HashMap<String, Tensor>,
    metadata: HashMap<String, String>,
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("path", &self.path)
            .field("tensors", &self.tensors.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl Checkpoint {
    /// Read and parse a SafeTensors file
    pub fn open(path: &Path) -> InferenceResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            InferenceError::WeightLoad(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_bytes(path, &bytes)
    }

    /// Parse a SafeTensors buffer; `path` is used for diagnostics only
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> InferenceResult<Self> {
        let (_, header) = SafeTensors::read_metadata(bytes).map_err(|e| {
            InferenceError::WeightLoad(format!("{} is not a valid SafeTensors file: {e}", path.display()))
        })?;
        let metadata = header.metadata().clone().unwrap_or_default();

        let tensors = candle_core::safetensors::load_buffer(bytes, &Device::Cpu).map_err(|e| {
            InferenceError::WeightLoad(format!("failed to decode tensors in {}: {e}", path.display()))
        })?;

        debug!(
            "Parsed checkpoint {} ({} tensors, {} metadata entries)",
            path.display(),
            tensors.len(),
            metadata.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            tensors,
            metadata,
        })
    }

    /// Path the checkpoint was read from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Class count: explicit `num_classes` metadata, else the first
    /// dimension of the architecture's head weight
    pub fn num_classes(&self, architecture: Architecture) -> InferenceResult<usize> {
        if let Some(raw) = self.metadata.get(METADATA_NUM_CLASSES) {
            return match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(InferenceError::WeightLoad(format!(
                    "metadata '{METADATA_NUM_CLASSES}' must be a positive integer, got '{raw}'"
                ))),
            };
        }

        let head = architecture.head_weight_name();
        let tensor = self.tensors.get(head).ok_or_else(|| {
            InferenceError::WeightLoad(format!(
                "cannot infer class count: head tensor '{head}' missing from {}",
                self.path.display()
            ))
        })?;
        match tensor.dims() {
            [n, _] if *n > 0 => Ok(*n),
            dims => Err(InferenceError::WeightLoad(format!(
                "head tensor '{head}' has unexpected shape {dims:?}"
            ))),
        }
    }

    /// Class map embedded in the checkpoint metadata
    pub fn class_map(&self) -> InferenceResult<ClassMap> {
        let raw = self.metadata.get(METADATA_CLASS_MAP).ok_or_else(|| {
            InferenceError::MalformedClassMap(format!(
                "no class map file configured and {} has no '{METADATA_CLASS_MAP}' metadata",
                self.path.display()
            ))
        })?;
        ClassMap::from_json_str(raw)
    }

    /// Hand the tensors to a loader that places them on `device`
    #[must_use]
    pub fn into_strict_loader(self, device: &Device) -> StrictLoader {
        StrictLoader {
            path: self.path,
            backend: Some(TrackedTensors {
                tensors: self.tensors,
                requested: Arc::new(Mutex::new(HashSet::new())),
            }),
            requested: None,
            names: Vec::new(),
            device: device.clone(),
        }
    }
}

/// Builds a [`VarBuilder`] and verifies afterwards that every stored tensor was used
pub struct StrictLoader {
    path: PathBuf,
    backend: Option<TrackedTensors>,
    requested: Option<Arc<Mutex<HashSet<String>>>>,
    names: Vec<String>,
    device: Device,
}

impl StrictLoader {
    /// Var builder over the checkpoint; may be taken once
    pub fn var_builder(&mut self) -> InferenceResult<VarBuilder<'static>> {
        let backend = self.backend.take().ok_or_else(|| {
            InferenceError::InternalPrediction("checkpoint var builder already taken".to_string())
        })?;
        self.names = backend.tensors.keys().cloned().collect();
        self.requested = Some(Arc::clone(&backend.requested));
        Ok(VarBuilder::from_backend(
            Box::new(backend),
            DType::F32,
            self.device.clone(),
        ))
    }

    /// Fail if the checkpoint holds tensors the architecture never requested
    pub fn finish(self) -> InferenceResult<()> {
        let Some(requested) = self.requested else {
            return Err(InferenceError::InternalPrediction(
                "checkpoint was never consumed".to_string(),
            ));
        };
        let requested = requested.lock();

        let mut unexpected: Vec<&str> = self
            .names
            .iter()
            .filter(|name| !requested.contains(name.as_str()))
            .filter(|name| !IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
            .map(String::as_str)
            .collect();

        if unexpected.is_empty() {
            return Ok(());
        }

        unexpected.sort_unstable();
        let shown: Vec<&str> = unexpected.iter().take(8).copied().collect();
        Err(InferenceError::WeightLoad(format!(
            "{} unexpected tensor(s) in {}: {}{}",
            unexpected.len(),
            self.path.display(),
            shown.join(", "),
            if unexpected.len() > shown.len() { ", ..." } else { "" }
        )))
    }
}

struct TrackedTensors {
    tensors: HashMap<String, Tensor>,
    requested: Arc<Mutex<HashSet<String>>>,
}

impl TrackedTensors {
    fn fetch(&self, name: &str) -> candle_core::Result<&Tensor> {
        match self.tensors.get(name) {
            Some(tensor) => {
                self.requested.lock().insert(name.to_string());
                Ok(tensor)
            }
            None => candle_core::bail!("missing tensor '{name}' in checkpoint"),
        }
    }
}

impl SimpleBackend for TrackedTensors {
    fn get(
        &self,
        shape: Shape,
        name: &str,
        _init: Init,
        dtype: DType,
        device: &Device,
    ) -> candle_core::Result<Tensor> {
        let tensor = self.fetch(name)?;
        if tensor.shape() != &shape {
            candle_core::bail!(
                "shape mismatch for '{name}': architecture expects {:?}, checkpoint has {:?}",
                shape.dims(),
                tensor.dims()
            );
        }
        tensor.to_dtype(dtype)?.to_device(device)
    }

    fn get_unchecked(&self, name: &str, dtype: DType, device: &Device) -> candle_core::Result<Tensor> {
        self.fetch(name)?.to_dtype(dtype)?.to_device(device)
    }

    fn contains_tensor(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }
}
