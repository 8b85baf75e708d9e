//! Adam optimizer
//!
//! Adaptive moment estimation (Kingma & Ba, 2015) with bias-corrected
//! moments and optional L2 weight decay folded into the gradient. Uses numr
//! tensor ops directly, so it runs on any backend without host transfers.

use crate::error::Result;
use crate::optimizer::traits::Optimizer;
use numr::autograd::GradStore;
use numr::dtype::DType;
use numr::ops::{BinaryOps, ScalarOps, UnaryOps};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// Adam configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AdamConfig {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

impl AdamConfig {
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

/// Per-parameter optimizer state
struct ParamState<R: Runtime> {
    m: Tensor<R>,
    v: Tensor<R>,
}

/// Adam optimizer
///
/// Maintains first moment (m) and second moment (v) estimates per parameter.
/// State is lazily initialized on first `step()` call for each parameter.
///
/// Update rule:
/// - `m = beta1 * m + (1 - beta1) * grad`
/// - `v = beta2 * v + (1 - beta2) * grad^2`
/// - `param = param - lr * (m / (1 - beta1^t)) / (sqrt(v / (1 - beta2^t)) + eps)`
pub struct Adam<R: Runtime> {
    config: AdamConfig,
    state: HashMap<TensorId, ParamState<R>>,
    timestep: u64,
}

impl<R: Runtime<DType = DType>> Adam<R> {
    pub fn new(config: AdamConfig) -> Self {
        Self {
            config,
            state: HashMap::new(),
            timestep: 0,
        }
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    pub fn timestep(&self) -> u64 {
        self.timestep
    }
}

impl<R: Runtime<DType = DType>> Optimizer<R> for Adam<R> {
    fn step<C>(
        &mut self,
        client: &C,
        params: &mut HashMap<TensorId, Tensor<R>>,
        grads: &GradStore<R>,
    ) -> Result<()>
    where
        C: RuntimeClient<R> + BinaryOps<R> + UnaryOps<R> + ScalarOps<R>,
    {
        self.timestep += 1;
        let t = self.timestep as i32;

        let AdamConfig {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay: wd,
        } = self.config;

        // Bias correction factors
        let bc1 = 1.0 - beta1.powi(t);
        let bc2 = 1.0 - beta2.powi(t);

        let param_ids: Vec<TensorId> = params.keys().copied().collect();

        for id in param_ids {
            let Some(grad) = grads.get(id) else {
                continue;
            };
            let Some(param) = params.get(&id) else {
                continue;
            };

            let grad = if wd > 0.0 {
                let decay_term = client.mul_scalar(param, wd)?;
                client.add(grad, &decay_term)?
            } else {
                grad.clone()
            };

            let state = self.state.entry(id).or_insert_with(|| ParamState {
                m: Tensor::<R>::zeros(param.shape(), param.dtype(), param.device()),
                v: Tensor::<R>::zeros(param.shape(), param.dtype(), param.device()),
            });

            // m = beta1 * m + (1 - beta1) * grad
            let m_kept = client.mul_scalar(&state.m, beta1)?;
            let m_new = client.mul_scalar(&grad, 1.0 - beta1)?;
            let m = client.add(&m_kept, &m_new)?;

            // v = beta2 * v + (1 - beta2) * grad^2
            let grad_sq = client.mul(&grad, &grad)?;
            let v_kept = client.mul_scalar(&state.v, beta2)?;
            let v_new = client.mul_scalar(&grad_sq, 1.0 - beta2)?;
            let v = client.add(&v_kept, &v_new)?;

            let m_hat = client.mul_scalar(&m, 1.0 / bc1)?;
            let v_hat = client.mul_scalar(&v, 1.0 / bc2)?;
            let denom = client.add_scalar(&client.sqrt(&v_hat)?, eps)?;
            let update = client.div(&m_hat, &denom)?;
            let scaled = client.mul_scalar(&update, lr)?;
            let new_param = client.sub(param, &scaled)?;

            state.m = m;
            state.v = v;
            params.insert(id, new_param);
        }

        Ok(())
    }

    fn set_lr(&mut self, lr: f64) {
        self.config.lr = lr;
    }

    fn lr(&self) -> f64 {
        self.config.lr
    }

    fn reset(&mut self) {
        self.state.clear();
        self.timestep = 0;
    }
}
