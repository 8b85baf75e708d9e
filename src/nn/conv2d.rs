//! 2D convolution layer with autograd support
//!
//! Composed from numr autograd primitives (pad via `var_cat`, im2col via
//! `var_narrow`, then a single matmul), so gradients flow back to the input
//! image on every backend without a dedicated conv backward kernel.

use crate::context::StyleClient;
use crate::error::{Error, Result};
use crate::image::image_dims;
use numr::autograd::{
    Var, var_add, var_cat, var_contiguous, var_matmul, var_narrow, var_permute, var_reshape,
    var_transpose,
};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// 2D convolution, stride 1, zero "same" padding: output = conv2d(input, weight) + bias
///
/// Weight: `[out_channels, in_channels, k, k]` with odd `k`
/// Input:  `[batch, in_channels, height, width]`
/// Output: `[batch, out_channels, height, width]`
pub struct Conv2d<R: Runtime> {
    weight: Var<R>,
    bias: Option<Var<R>>,
    out_channels: usize,
    in_channels: usize,
    kernel_size: usize,
}

impl<R: Runtime<DType = DType>> Conv2d<R> {
    /// Create from loaded tensors. `trainable` controls gradient tracking.
    pub fn new(weight: Tensor<R>, bias: Option<Tensor<R>>, trainable: bool) -> Result<Self> {
        let (out_channels, in_channels, kernel_size) = match *weight.shape() {
            [o, i, kh, kw] if kh == kw && kh % 2 == 1 => (o, i, kh),
            _ => {
                return Err(Error::InvalidArgument {
                    arg: "weight",
                    reason: format!(
                        "expected [out, in, k, k] with odd k, got {:?}",
                        weight.shape()
                    ),
                });
            }
        };
        if let Some(b) = &bias {
            if b.shape() != [out_channels] {
                return Err(Error::InvalidArgument {
                    arg: "bias",
                    reason: format!("expected [{out_channels}], got {:?}", b.shape()),
                });
            }
        }

        Ok(Self {
            weight: Var::new(weight, trainable),
            bias: bias.map(|b| Var::new(b, trainable)),
            out_channels,
            in_channels,
            kernel_size,
        })
    }

    /// Forward pass.
    ///
    /// Input: `[batch, in_channels, height, width]`
    /// Output: `[batch, out_channels, height, width]`
    pub fn forward(&self, client: &R::Client, input: &Var<R>) -> Result<Var<R>>
    where
        R::Client: StyleClient<R>,
    {
        let (batch, channels, height, width) = image_dims(input.shape())?;
        if channels != self.in_channels {
            return Err(Error::InvalidArgument {
                arg: "input",
                reason: format!("expected {} channels, got {channels}", self.in_channels),
            });
        }

        let k = self.kernel_size;
        let pad = k / 2;
        let padded = if pad > 0 {
            zero_pad(client, input, pad)?
        } else {
            input.clone()
        };

        // im2col: [B, C, k*k, H*W], taps ordered (ky, kx) to match weight layout
        let spatial = height * width;
        let mut taps = Vec::with_capacity(k * k);
        for ky in 0..k {
            let rows = var_narrow(&padded, 2, ky, height).map_err(Error::Numr)?;
            for kx in 0..k {
                let tap = var_narrow(&rows, 3, kx, width).map_err(Error::Numr)?;
                let tap = var_reshape(&var_contiguous(&tap), &[batch, channels, 1, spatial])
                    .map_err(Error::Numr)?;
                taps.push(tap);
            }
        }
        let tap_refs: Vec<&Var<R>> = taps.iter().collect();
        let cols = var_cat(&tap_refs, 2, client).map_err(Error::Numr)?;
        let cols = var_reshape(&var_contiguous(&cols), &[batch, channels * k * k, spatial])
            .map_err(Error::Numr)?;
        let cols = var_contiguous(&var_permute(&cols, &[0, 2, 1]).map_err(Error::Numr)?);

        // [B, H*W, C*k*k] @ [C*k*k, O] -> [B, H*W, O]
        let w_flat = var_reshape(&self.weight, &[self.out_channels, channels * k * k])
            .map_err(Error::Numr)?;
        let w_t = var_transpose(&w_flat).map_err(Error::Numr)?;
        let out = var_matmul(&cols, &w_t, client).map_err(Error::Numr)?;
        let out = match &self.bias {
            Some(bias) => var_add(&out, bias, client).map_err(Error::Numr)?,
            None => out,
        };

        let out = var_contiguous(&var_permute(&out, &[0, 2, 1]).map_err(Error::Numr)?);
        var_reshape(&out, &[batch, self.out_channels, height, width]).map_err(Error::Numr)
    }

    pub fn weight(&self) -> &Var<R> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Var<R>> {
        self.bias.as_ref()
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }
}

/// Zero-pad the two spatial dims of a `[B, C, H, W]` var by `pad` on each side.
fn zero_pad<R>(client: &R::Client, input: &Var<R>, pad: usize) -> Result<Var<R>>
where
    R: Runtime<DType = DType>,
    R::Client: StyleClient<R>,
{
    let (batch, channels, height, width) = image_dims(input.shape())?;
    let dtype = input.tensor().dtype();
    let device = input.tensor().device();

    let side = Var::new(
        Tensor::<R>::zeros(&[batch, channels, height, pad], dtype, device),
        false,
    );
    let widened = var_cat(&[&side, input, &side], 3, client).map_err(Error::Numr)?;

    let cap = Var::new(
        Tensor::<R>::zeros(&[batch, channels, pad, width + 2 * pad], dtype, device),
        false,
    );
    var_cat(&[&cap, &widened, &cap], 2, client).map_err(Error::Numr)
}
