//! Single-resolution image optimization loop

use super::config::{
    ImageOptimConfig, OptimizationOutcome, RunState, StepControl, StepReport, has_converged,
};
use crate::context::{ExecutionContext, StyleClient, has_nan_inf, scalar_value};
use crate::error::{Error, Result};
use crate::image::{ImageSnapshot, image_dims};
use crate::loss::LossAggregator;
use crate::optimizer::Optimizer;
use numr::autograd::{Var, backward};
use numr::dtype::DType;
use numr::ops::BinaryOps;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Per-step callback. Returning [`StepControl::Stop`] cancels the run.
pub type StepCallback<'a, R> = Box<dyn FnMut(&StepReport<'_, R>) -> StepControl + 'a>;

/// Optimizes the pixels of one image against a [`LossAggregator`].
///
/// Each step invalidates the encoder cache, evaluates the objective,
/// backpropagates, applies one optimizer update, clamps the image into the
/// configured value range and runs the step callbacks. The optimizer holds
/// the only copy of the working image for the duration of [`run`](Self::run).
pub struct ImageOptimizer<'a, R: Runtime, O> {
    ctx: ExecutionContext<R>,
    image: Tensor<R>,
    objective: &'a mut LossAggregator<R>,
    optimizer: O,
    config: ImageOptimConfig,
    callbacks: Vec<StepCallback<'a, R>>,
    state: RunState,
}

impl<'a, R, O> ImageOptimizer<'a, R, O>
where
    R: Runtime<DType = DType>,
    R::Client: StyleClient<R>,
    O: Optimizer<R>,
{
    pub fn new(
        ctx: ExecutionContext<R>,
        image: Tensor<R>,
        objective: &'a mut LossAggregator<R>,
        optimizer: O,
        config: ImageOptimConfig,
    ) -> Result<Self> {
        config.validate()?;
        image_dims(image.shape())?;
        ctx.check(&image)?;
        Ok(Self {
            ctx,
            image,
            objective,
            optimizer,
            config,
            callbacks: Vec::new(),
            state: RunState::Initialized,
        })
    }

    /// Register a callback invoked after every step, in registration order.
    pub fn on_step<F>(&mut self, callback: F)
    where
        F: FnMut(&StepReport<'_, R>) -> StepControl + 'a,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The starting image before [`run`](Self::run), the final image after it.
    pub fn image(&self) -> &Tensor<R> {
        &self.image
    }

    pub fn config(&self) -> &ImageOptimConfig {
        &self.config
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Run until convergence, the step budget or a callback stops it.
    ///
    /// Can be called once; create a new optimizer for another run.
    pub fn run(&mut self) -> Result<OptimizationOutcome<R>> {
        if self.state != RunState::Initialized {
            return Err(Error::state(format!(
                "run() called on an optimizer that is already {}",
                self.state
            )));
        }
        self.state = RunState::Running;
        let result = self.run_steps();
        self.state = match &result {
            Ok(outcome) => outcome.status,
            Err(_) => RunState::Failed,
        };
        result
    }

    fn run_steps(&mut self) -> Result<OptimizationOutcome<R>> {
        let client = self.ctx.client();
        let id = self.image.id();
        let shape = self.image.shape().to_vec();
        let (low, high) = self.config.value_range;
        let lower = self.ctx.full(&shape, low);
        let upper = self.ctx.full(&shape, high);

        let mut params = HashMap::from([(id, self.image.clone())]);
        let mut losses = Vec::with_capacity(self.config.max_steps);
        let mut status = RunState::MaxStepsReached;

        info!(
            shape = ?shape,
            max_steps = self.config.max_steps,
            operations = self.objective.len(),
            "image optimization started"
        );

        for step in 1..=self.config.max_steps {
            self.objective.invalidate_cache();

            let current = params
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::state("working image missing from parameter map"))?;
            let input = Var::with_id(current.clone(), id, true);

            let (loss, breakdown) = self.objective.evaluate_with_breakdown(&client, &input)?;
            let loss_value = scalar_value(&client, loss.tensor())?;
            if !loss_value.is_finite() {
                return Err(diverged(step, loss_value, &current));
            }

            let grads = backward(&loss, &client)?;
            if let Some(grad) = grads.get(id) {
                if has_nan_inf(&client, grad)? {
                    return Err(diverged(step, loss_value, &current));
                }
            }

            self.optimizer.step(&client, &mut params, &grads)?;
            let updated = params
                .get(&id)
                .ok_or_else(|| Error::state("optimizer dropped the working image"))?;
            let clamped = client.minimum(&client.maximum(updated, &lower)?, &upper)?;
            params.insert(id, clamped);
            losses.push(loss_value);

            if self.config.log_every > 0 && step % self.config.log_every == 0 {
                info!(step, loss = loss_value, "optimization step");
            } else {
                debug!(step, loss = loss_value, "optimization step");
            }

            let image = params
                .get(&id)
                .ok_or_else(|| Error::state("working image missing from parameter map"))?;
            let report = StepReport {
                step,
                loss: loss_value,
                breakdown: &breakdown,
                image,
            };
            let mut stop = false;
            for callback in self.callbacks.iter_mut() {
                stop |= callback(&report) == StepControl::Stop;
            }
            if stop {
                info!(step, "optimization cancelled by callback");
                status = RunState::Cancelled;
                break;
            }

            if let Some(tolerance) = self.config.tolerance {
                if has_converged(&losses, self.config.window, tolerance) {
                    info!(step, loss = loss_value, "optimization converged");
                    status = RunState::Converged;
                    break;
                }
            }
        }

        let image = params
            .remove(&id)
            .ok_or_else(|| Error::state("working image missing from parameter map"))?;
        self.image = image.clone();
        let final_loss = losses.last().copied().unwrap_or(f64::NAN);
        info!(status = %status, steps = losses.len(), final_loss, "image optimization finished");

        Ok(OptimizationOutcome {
            image,
            status,
            steps: losses.len(),
            final_loss,
            losses,
        })
    }
}

fn diverged<R: Runtime<DType = DType>>(step: usize, loss: f64, last_good: &Tensor<R>) -> Error {
    warn!(step, loss, "optimization diverged");
    Error::Diverged {
        step,
        last_good_step: step - 1,
        loss,
        image: Box::new(ImageSnapshot::capture(last_good)),
    }
}
