//! Artifact resolution across an ordered list of search roots

use crate::error::{ArtifactKind, InferenceError, InferenceResult};
use crate::models::ModelDescriptor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Paths resolved for one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifacts {
    /// SafeTensors checkpoint
    pub weights: PathBuf,
    /// Class map file, if the descriptor names one
    pub class_map: Option<PathBuf>,
}

/// Searches root directories, in order, for model artifacts
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    roots: Vec<PathBuf>,
}

impl ArtifactLocator {
    /// Create a locator over the given roots; earlier roots win
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    /// Search roots in priority order
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolve the checkpoint and, if configured, the class map of a descriptor
    pub fn locate(&self, descriptor: &ModelDescriptor) -> InferenceResult<ResolvedArtifacts> {
        let weights = self.find(&descriptor.artifact_filename, ArtifactKind::Weights)?;
        let class_map = descriptor
            .class_map_filename
            .as_deref()
            .map(|name| self.find(name, ArtifactKind::ClassMap))
            .transpose()?;

        Ok(ResolvedArtifacts { weights, class_map })
    }

    /// Return the first root containing `filename` as a regular file
    pub fn find(&self, filename: &str, which: ArtifactKind) -> InferenceResult<PathBuf> {
        for root in &self.roots {
            let candidate = root.join(filename);
            if is_file(&candidate) {
                debug!("Resolved {} artifact: {}", which, candidate.display());
                return Ok(candidate);
            }
            debug!("No {} artifact at {}", which, candidate.display());
        }

        Err(InferenceError::ArtifactNotFound {
            which,
            filename: filename.to_string(),
            searched: self.roots.clone(),
        })
    }
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Architecture;
    use std::fs;
    use tempfile::TempDir;

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::new("m", "M", Architecture::ResNet18, "m.safetensors")
            .with_class_map("classes.json")
    }

    #[test]
    fn test_first_root_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(first.path().join("m.safetensors"), b"a").unwrap();
        fs::write(second.path().join("m.safetensors"), b"b").unwrap();
        fs::write(second.path().join("classes.json"), b"{}").unwrap();

        let locator = ArtifactLocator::new([first.path(), second.path()]);
        let resolved = locator.locate(&descriptor()).unwrap();

        assert_eq!(resolved.weights, first.path().join("m.safetensors"));
        assert_eq!(resolved.class_map, Some(second.path().join("classes.json")));
    }

    #[test]
    fn test_missing_roots_are_skipped() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("m.safetensors"), b"a").unwrap();

        let locator = ArtifactLocator::new([PathBuf::from("/nonexistent/foodlens"), root.path().to_path_buf()]);
        let path = locator.find("m.safetensors", ArtifactKind::Weights).unwrap();
        assert_eq!(path, root.path().join("m.safetensors"));
    }

    #[test]
    fn test_missing_weights_reported() {
        let root = TempDir::new().unwrap();
        let locator = ArtifactLocator::new([root.path()]);

        match locator.locate(&descriptor()) {
            Err(InferenceError::ArtifactNotFound { which, filename, searched }) => {
                assert_eq!(which, ArtifactKind::Weights);
                assert_eq!(filename, "m.safetensors");
                assert_eq!(searched, vec![root.path().to_path_buf()]);
            }
            other => panic!("expected ArtifactNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_class_map_reported() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("m.safetensors"), b"a").unwrap();
        let locator = ArtifactLocator::new([root.path()]);

        match locator.locate(&descriptor()) {
            Err(InferenceError::ArtifactNotFound { which, .. }) => {
                assert_eq!(which, ArtifactKind::ClassMap);
            }
            other => panic!("expected ArtifactNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_directory_does_not_match() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("m.safetensors")).unwrap();
        let locator = ArtifactLocator::new([root.path()]);
        assert!(locator.find("m.safetensors", ArtifactKind::Weights).is_err());
    }

    #[test]
    fn test_class_map_optional() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("m.safetensors"), b"a").unwrap();
        let locator = ArtifactLocator::new([root.path()]);
        let descriptor = ModelDescriptor::new("m", "M", Architecture::ResNet18, "m.safetensors");
        let resolved = locator.locate(&descriptor).unwrap();
        assert!(resolved.class_map.is_none());
    }
}
