//! Per-channel input normalization

use crate::context::StyleClient;
use crate::error::{Error, Result};
use crate::image::image_dims;
use numr::autograd::{Var, var_mul, var_sub};
use numr::dtype::DType;
use numr::ops::TypeConversionOps;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// `(x - mean[c]) / std[c]` for every channel `c` of a `[B, C, H, W]` image.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalize {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Normalize {
    pub fn new(mean: Vec<f64>, std: Vec<f64>) -> Result<Self> {
        if mean.is_empty() || mean.len() != std.len() {
            return Err(Error::InvalidArgument {
                arg: "std",
                reason: format!(
                    "expected one std per mean ({}), got {}",
                    mean.len(),
                    std.len()
                ),
            });
        }
        if std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(Error::InvalidArgument {
                arg: "std",
                reason: format!("every std must be finite and > 0, got {std:?}"),
            });
        }
        Ok(Self { mean, std })
    }

    /// ImageNet statistics used by torchvision-trained VGG weights.
    pub fn imagenet() -> Self {
        Self {
            mean: vec![0.485, 0.456, 0.406],
            std: vec![0.229, 0.224, 0.225],
        }
    }

    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    pub fn forward<R>(&self, client: &R::Client, input: &Var<R>) -> Result<Var<R>>
    where
        R: Runtime<DType = DType>,
        R::Client: StyleClient<R>,
    {
        let (_, channels, _, _) = image_dims(input.shape())?;
        if channels != self.channels() {
            return Err(Error::InvalidArgument {
                arg: "input",
                reason: format!("expected {} channels, got {channels}", self.channels()),
            });
        }

        let mean = self.channel_tensor::<R>(client, &self.mean, input)?;
        let inv_std: Vec<f64> = self.std.iter().map(|s| 1.0 / s).collect();
        let inv_std = self.channel_tensor::<R>(client, &inv_std, input)?;

        let centered = var_sub(input, &Var::new(mean, false), client).map_err(Error::Numr)?;
        var_mul(&centered, &Var::new(inv_std, false), client).map_err(Error::Numr)
    }

    /// `[1, C, 1, 1]` constant in the input's dtype and device.
    fn channel_tensor<R>(
        &self,
        client: &R::Client,
        values: &[f64],
        like: &Var<R>,
    ) -> Result<Tensor<R>>
    where
        R: Runtime<DType = DType>,
        R::Client: StyleClient<R>,
    {
        let data: Vec<f32> = values.iter().map(|&v| v as f32).collect();
        let t = Tensor::<R>::from_slice(&data, &[1, values.len(), 1, 1], like.tensor().device());
        let dtype = like.tensor().dtype();
        if dtype == DType::F32 {
            Ok(t)
        } else {
            client.cast(&t, dtype).map_err(Error::Numr)
        }
    }
}
