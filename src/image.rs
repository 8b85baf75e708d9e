//! Image tensor helpers: shape checks, edge sizes, bilinear resize.
//!
//! Images are `[batch, channels, height, width]` tensors. Resizing happens on
//! the host: it runs once per pyramid level, never inside the step loop.

use crate::error::{Error, Result};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Which image edge a scalar edge size refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    #[default]
    Short,
    Long,
}

/// Host copy of an image, detached from any device.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSnapshot {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl ImageSnapshot {
    pub fn capture<R: Runtime<DType = DType>>(image: &Tensor<R>) -> Self {
        let image = image.contiguous();
        let data = match image.dtype() {
            DType::F64 => image.to_vec::<f64>().into_iter().map(|v| v as f32).collect(),
            _ => image.to_vec::<f32>(),
        };
        Self {
            shape: image.shape().to_vec(),
            data,
        }
    }

    /// Upload the snapshot back to a device.
    pub fn to_tensor<R: Runtime<DType = DType>>(&self, device: &R::Device) -> Tensor<R> {
        Tensor::<R>::from_slice(&self.data, &self.shape, device)
    }
}

/// Validate that `image` is a 4-D `[B, C, H, W]` tensor and return its dims.
pub fn image_dims(shape: &[usize]) -> Result<(usize, usize, usize, usize)> {
    match *shape {
        [b, c, h, w] if h > 0 && w > 0 => Ok((b, c, h, w)),
        _ => Err(Error::InvalidArgument {
            arg: "image",
            reason: format!("expected a non-empty [B, C, H, W] tensor, got shape {shape:?}"),
        }),
    }
}

/// Spatial size `(height, width)` of an image.
pub fn spatial_size(shape: &[usize]) -> Result<(usize, usize)> {
    let (_, _, h, w) = image_dims(shape)?;
    Ok((h, w))
}

/// Length of the selected edge.
pub fn edge_size(height: usize, width: usize, edge: Edge) -> usize {
    match edge {
        Edge::Short => height.min(width),
        Edge::Long => height.max(width),
    }
}

/// Image size with the selected edge set to `edge_size`, keeping the
/// aspect ratio `width / height`.
pub fn edge_to_image_size(
    edge_size: usize,
    height: usize,
    width: usize,
    edge: Edge,
) -> (usize, usize) {
    if height == width {
        return (edge_size, edge_size);
    }
    let aspect = width as f64 / height as f64;
    let scaled = |len: f64| (len.round() as usize).max(1);
    let edge_is_height = match edge {
        Edge::Short => height < width,
        Edge::Long => height > width,
    };
    if edge_is_height {
        (edge_size, scaled(edge_size as f64 * aspect))
    } else {
        (scaled(edge_size as f64 / aspect), edge_size)
    }
}

/// Bilinear resize of a `[B, C, H, W]` F32 image to `(height, width)`.
///
/// Uses half-pixel centers (`align_corners = false`) without antialiasing.
/// Resizing to the current size returns a copy of the input.
pub fn resize_bilinear<R: Runtime<DType = DType>>(
    image: &Tensor<R>,
    height: usize,
    width: usize,
) -> Result<Tensor<R>> {
    let (b, c, in_h, in_w) = image_dims(image.shape())?;
    if height == 0 || width == 0 {
        return Err(Error::InvalidArgument {
            arg: "size",
            reason: format!("target size must be non-zero, got {height}x{width}"),
        });
    }
    if image.dtype() != DType::F32 {
        return Err(Error::DTypeMismatch {
            expected: DType::F32,
            got: image.dtype(),
        });
    }

    let src = image.contiguous().to_vec::<f32>();
    if in_h == height && in_w == width {
        return Ok(Tensor::<R>::from_slice(&src, &[b, c, height, width], image.device()));
    }

    let rows = sample_positions(in_h, height);
    let cols = sample_positions(in_w, width);

    let mut out = Vec::with_capacity(b * c * height * width);
    for plane in src.chunks_exact(in_h * in_w) {
        for &(y0, y1, ly) in &rows {
            for &(x0, x1, lx) in &cols {
                let top = plane[y0 * in_w + x0] * (1.0 - lx) + plane[y0 * in_w + x1] * lx;
                let bottom = plane[y1 * in_w + x0] * (1.0 - lx) + plane[y1 * in_w + x1] * lx;
                out.push(top * (1.0 - ly) + bottom * ly);
            }
        }
    }

    Ok(Tensor::<R>::from_slice(
        &out,
        &[b, c, height, width],
        image.device(),
    ))
}

/// For each output index: (lower source index, upper source index, weight of upper).
fn sample_positions(in_len: usize, out_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = in_len as f64 / out_len as f64;
    (0..out_len)
        .map(|i| {
            let src = ((i as f64 + 0.5) * scale - 0.5).max(0.0);
            let lo = (src.floor() as usize).min(in_len - 1);
            let hi = (lo + 1).min(in_len - 1);
            (lo, hi, (src - lo as f64) as f32)
        })
        .collect()
}
