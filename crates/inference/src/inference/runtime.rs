//! Architecture-specific construction, strict weight loading and forward pass

use super::checkpoint::Checkpoint;
use super::traits::ImageClassifier;
use crate::device::device_label;
use crate::error::{InferenceError, InferenceResult};
use crate::models::Architecture;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::{resnet, vit};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// A network with its weights loaded, pinned to one device
pub struct ModelRuntime {
    architecture: Architecture,
    classifier: Box<dyn ImageClassifier>,
    num_classes: usize,
    device: Device,
}

impl std::fmt::Debug for ModelRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRuntime")
            .field("architecture", &self.architecture)
            .field("num_classes", &self.num_classes)
            .field("device", &device_label(&self.device))
            .finish_non_exhaustive()
    }
}

impl ModelRuntime {
    /// Build the network for `architecture` with a `num_classes`-wide head,
    /// pulling every parameter from `vb`
    pub fn construct(
        architecture: Architecture,
        num_classes: usize,
        vb: VarBuilder<'static>,
    ) -> candle_core::Result<Box<dyn ImageClassifier>> {
        Ok(match architecture {
            Architecture::VitB16 => {
                let config = vit::Config::vit_base_patch16_224();
                Box::new(vit::Model::new(&config, num_classes, vb)?)
            }
            Architecture::ResNet18 => Box::new(resnet::resnet18(num_classes, vb)?),
            Architecture::ResNet34 => Box::new(resnet::resnet34(num_classes, vb)?),
            Architecture::ResNet50 => Box::new(resnet::resnet50(num_classes, vb)?),
        })
    }

    /// Read a checkpoint from disk and load it onto `device`
    pub fn load_weights(architecture: Architecture, path: &Path, device: &Device) -> InferenceResult<Self> {
        let checkpoint = Checkpoint::open(path)?;
        Self::from_checkpoint(architecture, checkpoint, device)
    }

    /// Construct the network from an already-parsed checkpoint
    ///
    /// Fails with `WeightLoad` if a tensor is missing, has the wrong shape,
    /// or is left unused by the architecture.
    pub fn from_checkpoint(
        architecture: Architecture,
        checkpoint: Checkpoint,
        device: &Device,
    ) -> InferenceResult<Self> {
        let started = Instant::now();
        let num_classes = checkpoint.num_classes(architecture)?;
        let path = checkpoint.path().display().to_string();

        let mut loader = checkpoint.into_strict_loader(device);
        let classifier = Self::construct(architecture, num_classes, loader.var_builder()?)
            .map_err(|e| {
                InferenceError::WeightLoad(format!(
                    "{path} does not match architecture {architecture}: {e}"
                ))
            })?;
        loader.finish()?;

        info!(
            "Loaded {} with {} classes on {} in {:.1}ms",
            architecture,
            num_classes,
            device_label(device),
            started.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Self {
            architecture,
            classifier,
            num_classes,
            device: device.clone(),
        })
    }

    /// Raw class scores for a single preprocessed image
    ///
    /// `pixels` may live on any device; it is moved to the model's device.
    pub fn forward(&self, pixels: &Tensor) -> InferenceResult<Vec<f32>> {
        let pixels = pixels.to_device(&self.device).map_err(|e| {
            InferenceError::Device(format!(
                "failed to move input to {}: {e}",
                device_label(&self.device)
            ))
        })?;

        let logits = self.classifier.logits(&pixels)?;
        if logits.dims() != [1, self.num_classes] {
            return Err(InferenceError::InternalPrediction(format!(
                "expected logits of shape [1, {}], got {:?}",
                self.num_classes,
                logits.dims()
            )));
        }

        Ok(logits.squeeze(0)?.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }

    /// Architecture of the network
    #[must_use]
    pub const fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Width of the classifier head
    #[must_use]
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Device the weights live on
    #[must_use]
    pub const fn device(&self) -> &Device {
        &self.device
    }
}
