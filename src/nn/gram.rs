//! Channel-wise Gram matrix

use crate::context::StyleClient;
use crate::error::{Error, Result};
use crate::image::image_dims;
use numr::autograd::{Var, var_contiguous, var_matmul, var_mul_scalar, var_reshape, var_transpose};
use numr::dtype::DType;
use numr::runtime::Runtime;

/// Gram matrix of a `[B, C, H, W]` activation: `F @ F^T` with `F = [B, C, H*W]`.
///
/// With `normalize`, the result is divided by `H * W`, which makes it
/// comparable between activations of different spatial size.
///
/// Returns `[B, C, C]`.
pub fn gram_matrix<R>(client: &R::Client, features: &Var<R>, normalize: bool) -> Result<Var<R>>
where
    R: Runtime<DType = DType>,
    R::Client: StyleClient<R>,
{
    let (batch, channels, height, width) = image_dims(features.shape())?;
    let spatial = height * width;

    let flat = var_reshape(&var_contiguous(features), &[batch, channels, spatial])
        .map_err(Error::Numr)?;
    let flat_t = var_contiguous(&var_transpose(&flat).map_err(Error::Numr)?);
    let gram = var_matmul(&flat, &flat_t, client).map_err(Error::Numr)?;

    if normalize {
        var_mul_scalar(&gram, 1.0 / spatial as f64, client).map_err(Error::Numr)
    } else {
        Ok(gram)
    }
}
