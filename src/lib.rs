//! # stylr
//!
//! **Neural style transfer on numr: perceptual losses, image optimization, coarse-to-fine pyramids.**
//!
//! stylr optimizes the pixels of an image so that its deep features match a
//! content image and its feature correlations match a style image. Features come
//! from a frozen extractor evaluated with numr's autograd; gradients flow back to
//! the image only.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  PyramidImageOptimizer  (levels, resize, weight swaps)  │
//! ├─────────────────────────────────────────────────────────┤
//! │  ImageOptimizer  (step loop, clamp, callbacks, states)  │
//! ├─────────────────────────────────────────────────────────┤
//! │  LossAggregator  (named, weighted operations)           │
//! ├─────────────────────────────────────────────────────────┤
//! │  Operations  (content MSE, Gram style, total variation) │
//! ├─────────────────────────────────────────────────────────┤
//! │  Encoder  (feature extractor + per-step cache)          │
//! └──────────────────────────┬──────────────────────────────┘
//! │                      numr                                │
//! │        (tensors, ops, runtime, autograd)                 │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design
//!
//! - **Explicit context**: device and precision travel in [`ExecutionContext`]
//! - **Composite ops**: conv, pooling and Gram matrices are built from numr
//!   autograd primitives, same on all backends
//! - **One forward per step**: the encoder caches activations for the union of
//!   layers every operation reads

pub mod config;
pub mod context;
pub mod encoder;
pub mod error;
pub mod image;
pub mod logging;
pub mod loss;
pub mod nn;
pub mod operation;
pub mod optim;
pub mod optimizer;
pub mod pyramid;

pub use config::StyleTransferConfig;
pub use context::{ExecutionContext, StyleClient};
pub use encoder::{Encoder, FeatureExtractor, SequentialExtractor, VggArch};
pub use error::{Error, Result};
pub use image::{Edge, ImageSnapshot};
pub use loss::{LayerWeighting, LossAggregator, LossDict};
pub use operation::{ContentOperation, GramOperation, Operation, TotalVariationOperation};
pub use optim::{
    ImageOptimConfig, ImageOptimizer, OptimizationOutcome, PyramidImageOptimizer, RunState,
    StepControl, StepReport,
};
pub use optimizer::{Adam, AdamConfig, Optimizer, Sgd, SgdConfig};
pub use pyramid::{ImagePyramid, PyramidLevel};

// Re-export numr types that users will commonly need
pub use numr::dtype::DType;
pub use numr::error::{Error as NumrError, Result as NumrResult};
pub use numr::runtime::{Runtime, RuntimeClient};
pub use numr::tensor::Tensor;
