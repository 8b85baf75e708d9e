//! Scalar loss functions used by the operations.
//!
//! | Function | Use case |
//! |---|---|
//! | [`mse_loss`] | Content and style distances |
//! | [`total_variation_loss`] | Smoothness regularization on pixels |

pub mod mse;
pub mod total_variation;

pub use mse::mse_loss;
pub use total_variation::total_variation_loss;

/// All dimension indices for a tensor (for full reductions).
fn all_dims(ndim: usize) -> Vec<usize> {
    (0..ndim).collect()
}
