//! Static model descriptors and the closed set of supported architectures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network topology family; fixes the preprocessing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Vision transformer (patch embeddings + encoder)
    Transformer,
    /// Residual convolutional network
    ConvNet,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transformer => write!(f, "transformer"),
            Self::ConvNet => write!(f, "convnet"),
        }
    }
}

/// Supported architectures
///
/// Adding an architecture means adding a variant here and its arms in
/// [`crate::inference::ModelRuntime`]; no other dispatch site exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    /// ViT-B/16 at 224px, Hugging Face tensor naming (`vit.*`, `classifier`)
    #[serde(rename = "vit_b_16")]
    VitB16,
    /// ResNet-18, torchvision tensor naming (`conv1`, `layer1..4`, `fc`)
    #[serde(rename = "resnet18")]
    ResNet18,
    /// ResNet-34
    #[serde(rename = "resnet34")]
    ResNet34,
    /// ResNet-50 (bottleneck blocks)
    #[serde(rename = "resnet50")]
    ResNet50,
}

impl Architecture {
    /// All supported architectures
    pub const ALL: [Self; 4] = [Self::VitB16, Self::ResNet18, Self::ResNet34, Self::ResNet50];

    /// Configuration tag of this architecture
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::VitB16 => "vit_b_16",
            Self::ResNet18 => "resnet18",
            Self::ResNet34 => "resnet34",
            Self::ResNet50 => "resnet50",
        }
    }

    /// Family this architecture belongs to
    #[must_use]
    pub const fn family(self) -> ModelKind {
        match self {
            Self::VitB16 => ModelKind::Transformer,
            Self::ResNet18 | Self::ResNet34 | Self::ResNet50 => ModelKind::ConvNet,
        }
    }

    /// Input edge the architecture is tied to, if any (ViT position
    /// embeddings are sized for one resolution)
    #[must_use]
    pub const fn fixed_input_size(self) -> Option<u32> {
        match self {
            Self::VitB16 => Some(224),
            Self::ResNet18 | Self::ResNet34 | Self::ResNet50 => None,
        }
    }

    /// Name of the classifier head weight, whose first dimension is the class count
    #[must_use]
    pub const fn head_weight_name(self) -> &'static str {
        match self {
            Self::VitB16 => "classifier.weight",
            Self::ResNet18 | Self::ResNet34 | Self::ResNet50 => "fc.weight",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|arch| arch.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|a| a.tag()).collect();
                format!("unknown architecture '{s}' (known: {})", known.join(", "))
            })
    }
}

/// Static configuration record identifying one loadable model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Logical key requests refer to
    pub key: String,
    /// Human-readable model name
    #[serde(rename = "name")]
    pub display_name: String,
    /// Architecture family label
    #[serde(rename = "type")]
    pub kind: ModelKind,
    /// Checkpoint file name, resolved against the search roots
    #[serde(rename = "file")]
    pub artifact_filename: String,
    /// Architecture used to construct the network
    pub architecture: Architecture,
    /// Square edge of the network input
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    /// Class map file name; `None` reads the map from checkpoint metadata
    #[serde(default, rename = "class_map", skip_serializing_if = "Option::is_none")]
    pub class_map_filename: Option<String>,
}

fn default_input_size() -> u32 {
    224
}

impl ModelDescriptor {
    /// Create a descriptor whose kind follows the architecture family
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        architecture: Architecture,
        artifact_filename: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            kind: architecture.family(),
            artifact_filename: artifact_filename.into(),
            architecture,
            input_size: default_input_size(),
            class_map_filename: None,
        }
    }

    /// Set the class map file name
    #[must_use]
    pub fn with_class_map(mut self, filename: impl Into<String>) -> Self {
        self.class_map_filename = Some(filename.into());
        self
    }

    /// Set the input edge length
    #[must_use]
    pub const fn with_input_size(mut self, input_size: u32) -> Self {
        self.input_size = input_size;
        self
    }

    /// Check the record for internal consistency
    pub fn check(&self) -> Result<(), String> {
        if self.key.trim().is_empty() {
            return Err("model key cannot be empty".to_string());
        }
        if self.artifact_filename.trim().is_empty() {
            return Err(format!("model '{}': file cannot be empty", self.key));
        }
        if !(32..=1024).contains(&self.input_size) {
            return Err(format!(
                "model '{}': input_size {} must be between 32 and 1024",
                self.key, self.input_size
            ));
        }
        if let Some(fixed) = self.architecture.fixed_input_size() {
            if self.input_size != fixed {
                return Err(format!(
                    "model '{}': architecture {} requires input_size {fixed}",
                    self.key, self.architecture
                ));
            }
        }
        if self.kind != self.architecture.family() {
            return Err(format!(
                "model '{}': type '{}' does not match architecture '{}' ({})",
                self.key,
                self.kind,
                self.architecture,
                self.architecture.family()
            ));
        }
        if matches!(&self.class_map_filename, Some(name) if name.trim().is_empty()) {
            return Err(format!("model '{}': class_map cannot be empty", self.key));
        }
        Ok(())
    }
}

/// The built-in Food-101 descriptor table
#[must_use]
pub fn default_descriptors() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new(
            "vit_food101",
            "ViT-B/16 Food-101",
            Architecture::VitB16,
            "vit_b16_food101.safetensors",
        )
        .with_class_map("food101_classes.json"),
        ModelDescriptor::new(
            "resnet_food101",
            "ResNet-50 Food-101",
            Architecture::ResNet50,
            "resnet50_food101.safetensors",
        )
        .with_class_map("food101_classes.json"),
    ]
}
