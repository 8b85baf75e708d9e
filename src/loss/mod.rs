//! Composite objective.

pub mod aggregator;
pub mod dict;

pub use aggregator::{LayerWeighting, LossAggregator};
pub use dict::LossDict;
