//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use numr::autograd::{Var, var_mul_scalar, var_pow_scalar, var_sum};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use stylr::context::StyleClient;
use stylr::encoder::FeatureExtractor;
use stylr::operation::{Operation, Role, Source};
use stylr::{Error, Result, Tensor};

pub fn setup() -> (CpuClient, CpuDevice) {
    let device = CpuDevice::new();
    let client = CpuClient::new(device.clone());
    (client, device)
}

/// Deterministic `[1, C, H, W]` image with values in (0, 1).
pub fn pattern(
    channels: usize,
    height: usize,
    width: usize,
    device: &CpuDevice,
) -> Tensor<CpuRuntime> {
    let n = channels * height * width;
    let data: Vec<f32> = (0..n).map(|i| 0.5 + 0.4 * (i as f32 * 0.37).sin()).collect();
    Tensor::<CpuRuntime>::from_slice(&data, &[1, channels, height, width], device)
}

pub fn constant(
    value: f32,
    channels: usize,
    height: usize,
    width: usize,
    device: &CpuDevice,
) -> Tensor<CpuRuntime> {
    Tensor::<CpuRuntime>::from_slice(
        &vec![value; channels * height * width],
        &[1, channels, height, width],
        device,
    )
}

/// Extractor whose layer `i` is `input * (i + 1)`; counts forward passes.
pub struct CountingExtractor {
    names: Vec<String>,
    pub calls: Arc<AtomicUsize>,
}

impl CountingExtractor {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<R: Runtime<DType = DType>> FeatureExtractor<R> for CountingExtractor {
    fn layer_names(&self) -> &[String] {
        &self.names
    }

    fn forward(
        &self,
        client: &R::Client,
        input: &Var<R>,
        layers: &[String],
    ) -> Result<HashMap<String, Var<R>>>
    where
        R::Client: StyleClient<R>,
    {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = HashMap::new();
        for layer in layers {
            let index = self
                .names
                .iter()
                .position(|n| n == layer)
                .ok_or_else(|| Error::Configuration {
                    reason: format!("unknown layer {layer}"),
                })?;
            let scaled = var_mul_scalar(input, (index + 1) as f64, client)?;
            out.insert(layer.clone(), scaled);
        }
        Ok(out)
    }
}

/// How a [`FailingPenalty`] breaks on its failing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The score itself is NaN.
    NanLoss,
    /// The score is a finite zero, `sum(sqrt(0 * x))`, whose gradient is NaN.
    NanGradient,
}

/// Regularizer that scores `0 * sum(x)` until its `fail_at`-th call, which
/// fails as described by its [`Failure`].
pub struct FailingPenalty {
    source: Source,
    pub calls: Arc<AtomicUsize>,
    fail_at: usize,
    failure: Failure,
}

impl FailingPenalty {
    pub fn nan_loss(fail_at: usize) -> Self {
        Self::new(fail_at, Failure::NanLoss)
    }

    pub fn nan_gradient(fail_at: usize) -> Self {
        Self::new(fail_at, Failure::NanGradient)
    }

    fn new(fail_at: usize, failure: Failure) -> Self {
        Self {
            source: Source::Pixel,
            calls: Arc::new(AtomicUsize::new(0)),
            fail_at,
            failure,
        }
    }
}

impl<R: Runtime<DType = DType>> Operation<R> for FailingPenalty {
    fn kind(&self) -> &'static str {
        "failing_penalty"
    }

    fn role(&self) -> Role {
        Role::Regularization
    }

    fn source(&self) -> &Source {
        &self.source
    }

    fn score_weight(&self) -> f64 {
        1.0
    }

    fn has_target(&self) -> bool {
        false
    }

    fn set_target(&mut self, _client: &R::Client, _target: &Tensor<R>) -> Result<()>
    where
        R::Client: StyleClient<R>,
    {
        Err(Error::Configuration {
            reason: "failing_penalty takes no target".into(),
        })
    }

    fn score(&self, client: &R::Client, input: &Var<R>) -> Result<Var<R>>
    where
        R::Client: StyleClient<R>,
    {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let dims = [0, 1, 2, 3];
        if call != self.fail_at {
            let total = var_sum(input, &dims, false, client)?;
            return Ok(var_mul_scalar(&total, 0.0, client)?);
        }
        match self.failure {
            Failure::NanLoss => {
                let total = var_sum(input, &dims, false, client)?;
                Ok(var_mul_scalar(&total, f64::NAN, client)?)
            }
            Failure::NanGradient => {
                // d/dz sqrt(z) is infinite at 0 and the chain multiplies it by 0
                let zeros = var_mul_scalar(input, 0.0, client)?;
                let root = var_pow_scalar(&zeros, 0.5, client)?;
                Ok(var_sum(&root, &dims, false, client)?)
            }
        }
    }
}
