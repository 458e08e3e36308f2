//! Lazily-populated cache of loaded models, one load attempt per key at a time
//!
//! A key moves from absent, to loading, to ready. While loading, every caller
//! awaits the same shared future, so concurrent requests for a cold key
//! trigger exactly one load and all observe its outcome. A failed load leaves
//! the key absent so the next request retries from scratch. Ready entries are
//! never evicted.

use crate::config::InferenceConfig;
use crate::device::{device_label, DevicePreference};
use crate::error::{InferenceError, InferenceResult};
use crate::inference::{Checkpoint, ModelRuntime};
use crate::models::{ArtifactLocator, ClassMap, ModelDescriptor};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A model ready for prediction; immutable once built
#[derive(Debug)]
pub struct LoadedModel {
    /// Descriptor the model was built from
    pub descriptor: ModelDescriptor,
    /// Network and weights
    pub runtime: ModelRuntime,
    /// Labels for the network's outputs
    pub class_map: ClassMap,
    /// Resolved checkpoint path
    pub weights_path: PathBuf,
    /// When loading finished
    pub loaded_at: DateTime<Utc>,
    /// How long loading took
    pub load_duration: Duration,
}

impl LoadedModel {
    /// Label of the device the model runs on
    #[must_use]
    pub fn device_label(&self) -> String {
        device_label(self.runtime.device())
    }
}

type LoadFuture = Shared<BoxFuture<'static, InferenceResult<Arc<LoadedModel>>>>;

enum Slot {
    Loading(LoadFuture),
    Ready(Arc<LoadedModel>),
}

struct RegistryInner {
    descriptors: BTreeMap<String, ModelDescriptor>,
    locator: ArtifactLocator,
    device: DevicePreference,
    slots: Mutex<HashMap<String, Slot>>,
    load_attempts: AtomicU64,
}

/// Registry of configured models, shared by handle across request handlers
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.inner.descriptors.keys().collect::<Vec<_>>())
            .field("roots", &self.inner.locator.roots())
            .field("device", &self.inner.device)
            .field("loaded", &self.loaded_keys())
            .finish()
    }
}

impl ModelRegistry {
    /// Create a registry from a validated configuration
    pub fn new(config: &InferenceConfig) -> InferenceResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(
            config.models.clone(),
            ArtifactLocator::new(config.model_roots.clone()),
            config.device,
        ))
    }

    /// Create a registry from its parts without further validation
    pub fn from_parts(
        descriptors: Vec<ModelDescriptor>,
        locator: ArtifactLocator,
        device: DevicePreference,
    ) -> Self {
        let descriptors = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.key.clone(), descriptor))
            .collect();

        Self {
            inner: Arc::new(RegistryInner {
                descriptors,
                locator,
                device,
                slots: Mutex::new(HashMap::new()),
                load_attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Descriptor for `key`
    pub fn descriptor(&self, key: &str) -> InferenceResult<&ModelDescriptor> {
        self.inner
            .descriptors
            .get(key)
            .ok_or_else(|| InferenceError::unknown_key(key, self.inner.descriptors.keys().cloned()))
    }

    /// All configured descriptors, ordered by key
    pub fn descriptors(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.inner.descriptors.values()
    }

    /// Artifact search roots
    #[must_use]
    pub fn locator(&self) -> &ArtifactLocator {
        &self.inner.locator
    }

    /// All configured keys, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.descriptors.keys().cloned().collect()
    }

    /// Number of load attempts started since creation
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.inner.load_attempts.load(Ordering::SeqCst)
    }

    /// Whether `key` is loaded; never triggers a load
    #[must_use]
    pub fn is_loaded(&self, key: &str) -> bool {
        matches!(self.inner.slots.lock().get(key), Some(Slot::Ready(_)))
    }

    /// The loaded model for `key`, if already cached; never triggers a load
    #[must_use]
    pub fn cached(&self, key: &str) -> Option<Arc<LoadedModel>> {
        match self.inner.slots.lock().get(key) {
            Some(Slot::Ready(model)) => Some(Arc::clone(model)),
            _ => None,
        }
    }

    /// Keys currently loaded, sorted
    #[must_use]
    pub fn loaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Return the model for `key`, loading it on first use
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn get(&self, key: &str) -> InferenceResult<Arc<LoadedModel>> {
        let pending = {
            let mut slots = self.inner.slots.lock();
            match slots.get(key) {
                Some(Slot::Ready(model)) => return Ok(Arc::clone(model)),
                Some(Slot::Loading(pending)) => {
                    debug!("Waiting on in-flight load of '{}'", key);
                    pending.clone()
                }
                None => {
                    let descriptor = self.descriptor(key)?.clone();
                    let pending = self.start_load(descriptor);
                    slots.insert(key.to_string(), Slot::Loading(pending.clone()));
                    pending
                }
            }
        };

        pending.await
    }

    /// Load each key in turn, reporting per-key outcomes
    pub async fn preload<I, S>(&self, keys: I) -> Vec<(String, InferenceResult<()>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut outcomes = Vec::new();
        for key in keys {
            let key = key.as_ref();
            let outcome = self.get(key).await.map(|_| ());
            if let Err(e) = &outcome {
                warn!("Preloading '{}' failed: {}", key, e);
            }
            outcomes.push((key.to_string(), outcome));
        }
        outcomes
    }

    /// Spawn the load for `descriptor`; the caller holds the slot lock
    fn start_load(&self, descriptor: ModelDescriptor) -> LoadFuture {
        self.inner.load_attempts.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let key = descriptor.key.clone();

        let task = tokio::spawn(async move {
            let locator = inner.locator.clone();
            let device = inner.device;
            let loaded = tokio::task::spawn_blocking(move || load_model(descriptor, &locator, device))
                .await
                .map_err(InferenceError::from)
                .and_then(|result| result)
                .map(Arc::new);

            // Publish the outcome before waiters see it, so a retry after a
            // failure finds the slot empty.
            let mut slots = inner.slots.lock();
            match &loaded {
                Ok(model) => {
                    slots.insert(key, Slot::Ready(Arc::clone(model)));
                }
                Err(e) => {
                    warn!("Loading model '{}' failed: {}", key, e);
                    slots.remove(&key);
                }
            }
            loaded
        });

        async move { task.await.map_err(InferenceError::from).and_then(|result| result) }
            .boxed()
            .shared()
    }
}

/// Locate artifacts, read the class map, then construct and load the network
fn load_model(
    descriptor: ModelDescriptor,
    locator: &ArtifactLocator,
    device: DevicePreference,
) -> InferenceResult<LoadedModel> {
    let started = Instant::now();
    info!(
        "Loading model '{}' ({}, {})",
        descriptor.key, descriptor.display_name, descriptor.architecture
    );

    let artifacts = locator.locate(&descriptor)?;
    let checkpoint = Checkpoint::open(&artifacts.weights)?;
    let class_map = match &artifacts.class_map {
        Some(path) => ClassMap::from_file(path)?,
        None => checkpoint.class_map()?,
    };

    let device = device.create_device()?;
    let runtime = ModelRuntime::from_checkpoint(descriptor.architecture, checkpoint, &device)?;

    if class_map.len() != runtime.num_classes() {
        return Err(InferenceError::MalformedClassMap(format!(
            "class map for '{}' has {} entries but the classifier has {} outputs",
            descriptor.key,
            class_map.len(),
            runtime.num_classes()
        )));
    }
    if !class_map.is_contiguous() {
        warn!(
            "Class map for '{}' has gaps; unmapped indices will be labelled by number",
            descriptor.key
        );
    }

    let load_duration = started.elapsed();
    info!(
        "Model '{}' ready on {} ({} classes, {:.1}ms)",
        descriptor.key,
        device_label(runtime.device()),
        runtime.num_classes(),
        load_duration.as_secs_f64() * 1000.0
    );

    Ok(LoadedModel {
        descriptor,
        runtime,
        class_map,
        weights_path: artifacts.weights,
        loaded_at: Utc::now(),
        load_duration,
    })
}
