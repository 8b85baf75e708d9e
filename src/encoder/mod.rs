//! Feature extraction and the caching encoder.
//!
//! A [`FeatureExtractor`] is a frozen network that exposes activations at
//! named layers. The [`Encoder`] wraps one and owns the activation cache that
//! all operations of an objective read from during a step.

pub mod cache;
pub mod sequential;
pub mod traits;
pub mod vgg;

pub use cache::Encoder;
pub use sequential::{Layer, SequentialExtractor};
pub use traits::FeatureExtractor;
pub use vgg::{PREPROCESSING_LAYER, VggArch, normalize_layer_name};
