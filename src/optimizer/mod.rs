//! Update rules that drive the image optimization loop.

pub mod adam;
pub mod any;
pub mod sgd;
pub mod traits;

pub use adam::{Adam, AdamConfig};
pub use any::AnyOptimizer;
pub use sgd::{Sgd, SgdConfig};
pub use traits::Optimizer;
