//! Explicit execution context and client bounds.

use crate::error::{Error, Result};
use numr::dtype::DType;
use numr::ops::{
    BinaryOps, CompareOps, ReduceOps, ScalarOps, ShapeOps, TensorOps, TypeConversionOps, UnaryOps,
};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Trait alias for the full set of client bounds required by encoders,
/// operations and the optimization loop.
pub trait StyleClient<R: Runtime>:
    RuntimeClient<R>
    + TensorOps<R>
    + ScalarOps<R>
    + ReduceOps<R>
    + BinaryOps<R>
    + UnaryOps<R>
    + CompareOps<R>
    + ShapeOps<R>
    + TypeConversionOps<R>
{
}

impl<R, C> StyleClient<R> for C
where
    R: Runtime,
    C: RuntimeClient<R>
        + TensorOps<R>
        + ScalarOps<R>
        + ReduceOps<R>
        + BinaryOps<R>
        + UnaryOps<R>
        + CompareOps<R>
        + ShapeOps<R>
        + TypeConversionOps<R>,
{
}

/// Device and precision a run executes with.
///
/// Passed to [`Encoder`](crate::encoder::Encoder) and
/// [`ImageOptimizer`](crate::optim::ImageOptimizer) at construction.
pub struct ExecutionContext<R: Runtime> {
    device: R::Device,
    dtype: DType,
}

impl<R: Runtime> Clone for ExecutionContext<R>
where
    R::Device: Clone,
{
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            dtype: self.dtype,
        }
    }
}

impl<R: Runtime<DType = DType>> ExecutionContext<R> {
    pub fn new(device: R::Device, dtype: DType) -> Self {
        Self { device, dtype }
    }

    /// F32 context on `device`.
    pub fn f32(device: R::Device) -> Self {
        Self::new(device, DType::F32)
    }

    pub fn device(&self) -> &R::Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Build a client bound to this context's device.
    pub fn client(&self) -> R::Client {
        R::default_client(&self.device)
    }

    /// Fail if `tensor` was not created with this context's precision.
    pub fn check(&self, tensor: &Tensor<R>) -> Result<()> {
        if tensor.dtype() != self.dtype {
            return Err(Error::DTypeMismatch {
                expected: self.dtype,
                got: tensor.dtype(),
            });
        }
        Ok(())
    }

    /// Constant tensor in this context.
    pub fn full(&self, shape: &[usize], value: f64) -> Tensor<R> {
        Tensor::<R>::full_scalar(shape, self.dtype, value, &self.device)
    }
}

/// Read a one-element tensor (a loss) back to the host.
pub(crate) fn scalar_value<R>(client: &R::Client, tensor: &Tensor<R>) -> Result<f64>
where
    R: Runtime<DType = DType>,
    R::Client: StyleClient<R>,
{
    let first = match tensor.dtype() {
        DType::F64 => tensor.to_vec::<f64>().first().copied(),
        DType::F32 => tensor.to_vec::<f32>().first().map(|v| *v as f64),
        _ => client
            .cast(tensor, DType::F32)?
            .to_vec::<f32>()
            .first()
            .map(|v| *v as f64),
    };
    first.ok_or_else(|| Error::InvalidArgument {
        arg: "tensor",
        reason: "expected a scalar, got an empty tensor".into(),
    })
}

/// Check if a tensor contains NaN or Inf values on-device.
pub(crate) fn has_nan_inf<R>(client: &R::Client, tensor: &Tensor<R>) -> Result<bool>
where
    R: Runtime<DType = DType>,
    R::Client: StyleClient<R>,
{
    let nan_mask = client.isnan(tensor)?;
    let inf_mask = client.isinf(tensor)?;
    let has_nan = client.any(&nan_mask, &[], false)?;
    let has_inf = client.any(&inf_mask, &[], false)?;
    Ok(has_nan.item::<u8>()? != 0 || has_inf.item::<u8>()? != 0)
}
