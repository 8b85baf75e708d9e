//! SGD optimizer with momentum
//!
//! Stochastic gradient descent with optional momentum, dampening, Nesterov
//! momentum and L2 weight decay, composed from client ops.

use crate::error::Result;
use crate::optimizer::traits::Optimizer;
use numr::autograd::GradStore;
use numr::dtype::DType;
use numr::ops::{BinaryOps, ScalarOps, UnaryOps};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// SGD configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SgdConfig {
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub dampening: f64,
    pub nesterov: bool,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            momentum: 0.0,
            weight_decay: 0.0,
            dampening: 0.0,
            nesterov: false,
        }
    }
}

impl SgdConfig {
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_nesterov(mut self, nesterov: bool) -> Self {
        self.nesterov = nesterov;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

/// SGD optimizer with optional momentum
///
/// Update rules:
/// - L2 weight decay: `grad = grad + weight_decay * param`
/// - Momentum: `buf = momentum * buf + (1 - dampening) * grad` (the first
///   step seeds `buf = grad`)
/// - Nesterov: `update = grad + momentum * buf`
/// - Standard: `update = buf`
/// - Parameter: `param = param - lr * update`
pub struct Sgd<R: Runtime> {
    config: SgdConfig,
    velocity: HashMap<TensorId, Tensor<R>>,
}

impl<R: Runtime<DType = DType>> Sgd<R> {
    pub fn new(config: SgdConfig) -> Self {
        Self {
            config,
            velocity: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }
}

impl<R: Runtime<DType = DType>> Optimizer<R> for Sgd<R> {
    fn step<C>(
        &mut self,
        client: &C,
        params: &mut HashMap<TensorId, Tensor<R>>,
        grads: &GradStore<R>,
    ) -> Result<()>
    where
        C: RuntimeClient<R> + BinaryOps<R> + UnaryOps<R> + ScalarOps<R>,
    {
        let SgdConfig {
            lr,
            momentum,
            weight_decay: wd,
            dampening,
            nesterov,
        } = self.config;

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

            let update = if momentum > 0.0 {
                let buf = match self.velocity.get(&id) {
                    Some(prev) => {
                        let kept = client.mul_scalar(prev, momentum)?;
                        let fresh = client.mul_scalar(&grad, 1.0 - dampening)?;
                        client.add(&kept, &fresh)?
                    }
                    None => grad.clone(),
                };
                let update = if nesterov {
                    let look_ahead = client.mul_scalar(&buf, momentum)?;
                    client.add(&grad, &look_ahead)?
                } else {
                    buf.clone()
                };
                self.velocity.insert(id, buf);
                update
            } else {
                grad
            };

            let scaled = client.mul_scalar(&update, lr)?;
            let new_param = client.sub(param, &scaled)?;
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
        self.velocity.clear();
    }
}
