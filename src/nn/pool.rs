//! Max and average pooling

use crate::context::StyleClient;
use crate::error::{Error, Result};
use crate::image::image_dims;
use numr::autograd::{Var, var_contiguous, var_max, var_mean, var_narrow, var_reshape};
use numr::dtype::DType;
use numr::runtime::Runtime;

/// Pooling stage placed between the convolution blocks of a VGG stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    #[default]
    Max,
    Avg,
}

fn check_kernel(kernel_size: usize) -> Result<()> {
    if kernel_size == 0 {
        return Err(Error::InvalidArgument {
            arg: "kernel_size",
            reason: "must be > 0".into(),
        });
    }
    Ok(())
}

/// Split `[B, C, H, W]` into `[B, C, H / k, k, W / k, k]` windows, dropping
/// trailing rows and columns that do not fill a whole window.
fn windows<R: Runtime<DType = DType>>(input: &Var<R>, k: usize) -> Result<Var<R>>
where
    R::Client: StyleClient<R>,
{
    let (batch, channels, height, width) = image_dims(input.shape())?;
    let (out_h, out_w) = (height / k, width / k);
    if out_h == 0 || out_w == 0 {
        return Err(Error::InvalidArgument {
            arg: "input",
            reason: format!("{height}x{width} is smaller than the {k}x{k} pooling window"),
        });
    }

    let cropped = if out_h * k != height || out_w * k != width {
        let rows = var_narrow(input, 2, 0, out_h * k).map_err(Error::Numr)?;
        var_narrow(&rows, 3, 0, out_w * k).map_err(Error::Numr)?
    } else {
        input.clone()
    };
    var_reshape(&var_contiguous(&cropped), &[batch, channels, out_h, k, out_w, k])
        .map_err(Error::Numr)
}

/// Non-overlapping max pooling (kernel == stride), floor mode.
///
/// The gradient flows only to the maximum of each window; ties split it.
#[derive(Debug, Clone, Copy)]
pub struct MaxPool2d {
    kernel_size: usize,
}

impl MaxPool2d {
    pub fn new(kernel_size: usize) -> Result<Self> {
        check_kernel(kernel_size)?;
        Ok(Self { kernel_size })
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Input: `[B, C, H, W]`, output: `[B, C, H / k, W / k]`
    pub fn forward<R>(&self, client: &R::Client, input: &Var<R>) -> Result<Var<R>>
    where
        R: Runtime<DType = DType>,
        R::Client: StyleClient<R>,
    {
        let windows = windows(input, self.kernel_size)?;
        var_max(&windows, &[3, 5], false, client).map_err(Error::Numr)
    }
}

/// Non-overlapping average pooling (kernel == stride).
///
/// Trailing rows/columns that do not fill a whole window are dropped,
/// matching floor-mode pooling.
#[derive(Debug, Clone, Copy)]
pub struct AvgPool2d {
    kernel_size: usize,
}

impl AvgPool2d {
    pub fn new(kernel_size: usize) -> Result<Self> {
        check_kernel(kernel_size)?;
        Ok(Self { kernel_size })
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Input: `[B, C, H, W]`, output: `[B, C, H / k, W / k]`
    pub fn forward<R>(&self, client: &R::Client, input: &Var<R>) -> Result<Var<R>>
    where
        R: Runtime<DType = DType>,
        R::Client: StyleClient<R>,
    {
        let windows = windows(input, self.kernel_size)?;
        var_mean(&windows, &[3, 5], false, client).map_err(Error::Numr)
    }
}
