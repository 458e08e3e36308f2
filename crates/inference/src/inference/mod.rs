//! Model runtime adapter: checkpoint parsing, network construction and forward pass
//!
//! Networks come from `candle-transformers`; this module adds strict weight
//! matching, device placement and a single forward interface over all of them.

pub mod checkpoint;
pub mod runtime;
pub mod traits;

pub use checkpoint::{Checkpoint, StrictLoader, METADATA_CLASS_MAP, METADATA_NUM_CLASSES};
pub use runtime::ModelRuntime;
pub use traits::ImageClassifier;
