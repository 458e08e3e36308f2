//! The forward-pass capability shared by every supported architecture

use candle_core::Tensor;
use candle_nn::Module;
use candle_transformers::models::vit;

/// A constructed network that maps a pixel batch to class logits
///
/// Implementations hold only immutable weights, so one instance may serve any
/// number of concurrent forward passes.
pub trait ImageClassifier: Send + Sync {
    /// `[batch, 3, H, W]` normalized pixels to `[batch, num_classes]` logits
    fn logits(&self, pixels: &Tensor) -> candle_core::Result<Tensor>;
}

impl ImageClassifier for vit::Model {
    fn logits(&self, pixels: &Tensor) -> candle_core::Result<Tensor> {
        vit::Model::forward(self, pixels)
    }
}

/// ResNet variants are built as a closure over their layers
impl ImageClassifier for candle_nn::Func<'static> {
    fn logits(&self, pixels: &Tensor) -> candle_core::Result<Tensor> {
        self.forward(pixels)
    }
}
