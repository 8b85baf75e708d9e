//! Image optimization: single resolution and coarse-to-fine.

pub mod config;
pub mod image;
pub mod pyramid;

pub use config::{ImageOptimConfig, OptimizationOutcome, RunState, StepControl, StepReport};
pub use image::{ImageOptimizer, StepCallback};
pub use pyramid::{
    LevelHook, LevelOutcome, LevelStepCallback, PyramidImageOptimizer, PyramidOutcome,
};
