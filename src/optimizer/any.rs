//! Runtime-selected update rule

use super::{Adam, Optimizer, Sgd};
use crate::error::Result;
use numr::autograd::GradStore;
use numr::dtype::DType;
use numr::ops::{BinaryOps, ScalarOps, UnaryOps};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// Either built-in optimizer, chosen from configuration.
pub enum AnyOptimizer<R: Runtime> {
    Adam(Adam<R>),
    Sgd(Sgd<R>),
}

impl<R: Runtime<DType = DType>> From<Adam<R>> for AnyOptimizer<R> {
    fn from(adam: Adam<R>) -> Self {
        AnyOptimizer::Adam(adam)
    }
}

impl<R: Runtime<DType = DType>> From<Sgd<R>> for AnyOptimizer<R> {
    fn from(sgd: Sgd<R>) -> Self {
        AnyOptimizer::Sgd(sgd)
    }
}

impl<R: Runtime<DType = DType>> Optimizer<R> for AnyOptimizer<R> {
    fn step<C>(
        &mut self,
        client: &C,
        params: &mut HashMap<TensorId, Tensor<R>>,
        grads: &GradStore<R>,
    ) -> Result<()>
    where
        C: RuntimeClient<R> + BinaryOps<R> + UnaryOps<R> + ScalarOps<R>,
    {
        match self {
            AnyOptimizer::Adam(opt) => opt.step(client, params, grads),
            AnyOptimizer::Sgd(opt) => opt.step(client, params, grads),
        }
    }

    fn set_lr(&mut self, lr: f64) {
        match self {
            AnyOptimizer::Adam(opt) => opt.set_lr(lr),
            AnyOptimizer::Sgd(opt) => opt.set_lr(lr),
        }
    }

    fn lr(&self) -> f64 {
        match self {
            AnyOptimizer::Adam(opt) => opt.lr(),
            AnyOptimizer::Sgd(opt) => opt.lr(),
        }
    }

    fn reset(&mut self) {
        match self {
            AnyOptimizer::Adam(opt) => opt.reset(),
            AnyOptimizer::Sgd(opt) => opt.reset(),
        }
    }
}
