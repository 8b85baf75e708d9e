//! Activation selector for feature extractor stages

use crate::context::StyleClient;
use crate::error::{Error, Result};
use numr::autograd::{Var, var_mul};
use numr::dtype::DType;
use numr::ops::{CompareOps, TypeConversionOps};
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Activation stage of a feature extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
}

impl Activation {
    /// Apply this activation with autograd tracking.
    pub fn forward<R>(&self, client: &R::Client, x: &Var<R>) -> Result<Var<R>>
    where
        R: Runtime<DType = DType>,
        R::Client: StyleClient<R>,
    {
        match self {
            Activation::Relu => var_relu(client, x),
        }
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activation::Relu => write!(f, "relu"),
        }
    }
}

/// ReLU as `x * (x > 0)`. The mask is a constant, so the gradient is the
/// upstream gradient where `x > 0` and zero elsewhere.
pub fn var_relu<R>(client: &R::Client, x: &Var<R>) -> Result<Var<R>>
where
    R: Runtime<DType = DType>,
    R::Client: StyleClient<R>,
{
    let dtype = x.tensor().dtype();
    let zeros = Tensor::<R>::zeros(x.shape(), dtype, x.tensor().device());
    let positive = client.lt(&zeros, x.tensor()).map_err(Error::Numr)?;
    let mask = client.cast(&positive, dtype).map_err(Error::Numr)?;
    var_mul(x, &Var::new(mask, false), client).map_err(Error::Numr)
}
