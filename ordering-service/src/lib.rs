//! Sub-intent classification for the food-ordering flow: a schema-constrained
//! LLM call with a deterministic keyword fallback, behind one contract: the
//! classifier always returns a recognised sub-intent.

pub mod classifier;
pub mod fallback;
pub mod state;

pub use classifier::SubIntentClassifier;
pub use fallback::fallback_classification;
pub use state::{Classification, EntityStep, OrderingSnapshot, SubIntent};
