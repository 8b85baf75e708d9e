//! Total variation regularizer.

use super::all_dims;
use crate::context::StyleClient;
use crate::error::{Error, Result};
use crate::image::image_dims;
use numr::autograd::{Var, var_add, var_mean, var_mul, var_narrow, var_pow_scalar, var_sub};
use numr::dtype::DType;
use numr::runtime::Runtime;

/// Total variation of a `[B, C, H, W]` image.
///
/// Forward differences are taken on the `(H-1) x (W-1)` interior:
/// `dy = x[.., 1:, :-1] - x[.., :-1, :-1]`, `dx = x[.., :-1, 1:] - x[.., :-1, :-1]`.
/// The loss is `mean((dy^2 + dx^2)^(exponent / 2))`.
///
/// Exponents below 2 have an unbounded gradient where the image is locally flat.
pub fn total_variation_loss<R>(client: &R::Client, image: &Var<R>, exponent: f64) -> Result<Var<R>>
where
    R: Runtime<DType = DType>,
    R::Client: StyleClient<R>,
{
    let (_, _, height, width) = image_dims(image.shape())?;
    if height < 2 || width < 2 {
        return Err(Error::InvalidArgument {
            arg: "image",
            reason: format!("total variation needs at least 2x2 pixels, got {height}x{width}"),
        });
    }

    let narrow = |x: &Var<R>, dim: usize, start: usize, len: usize| {
        var_narrow(x, dim as isize, start, len).map_err(Error::Numr)
    };
    let anchor = narrow(&narrow(image, 2, 0, height - 1)?, 3, 0, width - 1)?;
    let below = narrow(&narrow(image, 2, 1, height - 1)?, 3, 0, width - 1)?;
    let right = narrow(&narrow(image, 2, 0, height - 1)?, 3, 1, width - 1)?;

    let dy = var_sub(&below, &anchor, client).map_err(Error::Numr)?;
    let dx = var_sub(&right, &anchor, client).map_err(Error::Numr)?;
    let dy2 = var_mul(&dy, &dy, client).map_err(Error::Numr)?;
    let dx2 = var_mul(&dx, &dx, client).map_err(Error::Numr)?;
    let grad_sq = var_add(&dy2, &dx2, client).map_err(Error::Numr)?;

    let penalty = if exponent == 2.0 {
        grad_sq
    } else {
        var_pow_scalar(&grad_sq, exponent / 2.0, client).map_err(Error::Numr)?
    };
    var_mean(&penalty, &all_dims(penalty.shape().len()), false, client).map_err(Error::Numr)
}
