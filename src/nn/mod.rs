pub mod activation;
pub mod conv2d;
pub mod gram;
pub mod loss;
pub mod normalize;
pub mod pool;

pub use activation::{Activation, var_relu};
pub use conv2d::Conv2d;
pub use gram::gram_matrix;
pub use loss::{mse_loss, total_variation_loss};
pub use normalize::Normalize;
pub use pool::{AvgPool2d, MaxPool2d, Pooling};
