//! Coarse-to-fine optimization across an image pyramid

use super::config::{ImageOptimConfig, RunState, StepControl, StepReport};
use super::image::ImageOptimizer;
use crate::context::{ExecutionContext, StyleClient};
use crate::error::{Error, Result};
use crate::image::{ImageSnapshot, resize_bilinear, spatial_size};
use crate::loss::LossAggregator;
use crate::operation::check_weight;
use crate::optimizer::Optimizer;
use crate::pyramid::{ImagePyramid, PyramidLevel};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::collections::BTreeMap;
use tracing::info;

/// Called with the level index, the level and its starting image.
pub type LevelHook<'a, R> = Box<dyn FnMut(usize, &PyramidLevel, &Tensor<R>) + 'a>;

/// Step callback that also receives the level index.
pub type LevelStepCallback<'a, R> = Box<dyn FnMut(usize, &StepReport<'_, R>) -> StepControl + 'a>;

/// How one level ended.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelOutcome {
    pub level: usize,
    pub height: usize,
    pub width: usize,
    pub status: RunState,
    pub steps: usize,
    pub final_loss: f64,
}

pub struct PyramidOutcome<R: Runtime> {
    /// Result of the last level that ran
    pub image: Tensor<R>,
    /// Status of the last level that ran
    pub status: RunState,
    pub levels: Vec<LevelOutcome>,
}

/// Weights captured before the first level and put back after the last.
///
/// Targets need no copy: the objective records the reference image of every
/// target and re-encodes from it on restore.
struct SavedObjective {
    weights: BTreeMap<String, f64>,
}

/// Runs an [`ImageOptimizer`] per pyramid level, coarsest first.
///
/// The result of each level is resized bilinearly to the next level's
/// resolution and used as its starting image. With `resize_targets` (the
/// default) every target on the objective is re-encoded per level from its
/// own reference image resized to that level; once the run ends,
/// successfully or not, the original targets and weights are registered
/// again.
pub struct PyramidImageOptimizer<'a, R: Runtime> {
    ctx: ExecutionContext<R>,
    image: Tensor<R>,
    objective: &'a mut LossAggregator<R>,
    pyramid: ImagePyramid,
    config: ImageOptimConfig,
    resize_targets: bool,
    level_hooks: Vec<LevelHook<'a, R>>,
    step_callbacks: Vec<LevelStepCallback<'a, R>>,
    started: bool,
}

impl<'a, R> PyramidImageOptimizer<'a, R>
where
    R: Runtime<DType = DType>,
    R::Client: StyleClient<R>,
    R::Device: Clone,
{
    /// `config` is the template for every level; each level replaces its
    /// step budget and, if set, its tolerance.
    pub fn new(
        ctx: ExecutionContext<R>,
        image: Tensor<R>,
        objective: &'a mut LossAggregator<R>,
        pyramid: ImagePyramid,
        config: ImageOptimConfig,
    ) -> Result<Self> {
        spatial_size(image.shape())?;
        ctx.check(&image)?;
        Ok(Self {
            ctx,
            image,
            objective,
            pyramid,
            config,
            resize_targets: true,
            level_hooks: Vec::new(),
            step_callbacks: Vec::new(),
            started: false,
        })
    }

    pub fn with_resize_targets(mut self, resize_targets: bool) -> Self {
        self.resize_targets = resize_targets;
        self
    }

    pub fn pyramid(&self) -> &ImagePyramid {
        &self.pyramid
    }

    pub fn on_level_start<F>(&mut self, hook: F)
    where
        F: FnMut(usize, &PyramidLevel, &Tensor<R>) + 'a,
    {
        self.level_hooks.push(Box::new(hook));
    }

    pub fn on_step<F>(&mut self, callback: F)
    where
        F: FnMut(usize, &StepReport<'_, R>) -> StepControl + 'a,
    {
        self.step_callbacks.push(Box::new(callback));
    }

    /// Run every level. `make_optimizer` builds a fresh update rule per level,
    /// so no moment state leaks between resolutions.
    ///
    /// A failing level aborts the run with [`Error::PyramidLevel`]. A
    /// cancelled level ends the run early with that level's image.
    pub fn run<O, F>(&mut self, mut make_optimizer: F) -> Result<PyramidOutcome<R>>
    where
        O: Optimizer<R>,
        F: FnMut(&PyramidLevel) -> O,
    {
        if self.started {
            return Err(Error::state("pyramid optimizer has already run"));
        }
        self.started = true;

        let saved = self.save_objective()?;
        let client = self.ctx.client();
        let result = self.run_levels(&client, &saved, &mut make_optimizer);
        let restored = self.restore_objective(&client, &saved);
        let outcome = result?;
        restored?;
        Ok(outcome)
    }

    fn save_objective(&self) -> Result<SavedObjective> {
        let mut weights = BTreeMap::new();
        for (index, level) in self.pyramid.iter().enumerate() {
            for (name, &weight) in &level.weight_overrides {
                check_weight("weight override", weight)?;
                let current = self.objective.weight(name).ok_or_else(|| {
                    Error::config(format!(
                        "pyramid level {index} overrides unknown operation '{name}'"
                    ))
                })?;
                weights.insert(name.clone(), current);
            }
        }
        Ok(SavedObjective { weights })
    }

    fn restore_objective(&mut self, client: &R::Client, saved: &SavedObjective) -> Result<()> {
        for (name, &weight) in &saved.weights {
            self.objective.set_weight(name, weight)?;
        }
        if self.resize_targets {
            self.objective.restore_targets(client)?;
        }
        Ok(())
    }

    fn run_levels<O, F>(
        &mut self,
        client: &R::Client,
        saved: &SavedObjective,
        make_optimizer: &mut F,
    ) -> Result<PyramidOutcome<R>>
    where
        O: Optimizer<R>,
        F: FnMut(&PyramidLevel) -> O,
    {
        let Self {
            ctx,
            image: input,
            objective,
            pyramid,
            config,
            resize_targets,
            level_hooks,
            step_callbacks,
            ..
        } = self;

        let (height, width) = spatial_size(input.shape())?;
        let mut image = input.clone();
        let mut status = RunState::Initialized;
        let mut outcomes = Vec::with_capacity(pyramid.len());

        info!(levels = pyramid.len(), "pyramid optimization started");
        for (index, level) in pyramid.iter().enumerate() {
            let (level_h, level_w) = level.image_size(height, width);
            let mut run = |objective: &mut LossAggregator<R>| -> Result<_> {
                let start = resize_bilinear(&image, level_h, level_w)?;
                if *resize_targets {
                    objective
                        .resize_targets(client, |reference| resize_to_level(reference, level))?;
                }
                for (name, &weight) in &saved.weights {
                    let weight = level.weight_overrides.get(name).copied().unwrap_or(weight);
                    objective.set_weight(name, weight)?;
                }
                for hook in level_hooks.iter_mut() {
                    hook(index, level, &start);
                }

                info!(
                    level = index,
                    height = level_h,
                    width = level_w,
                    steps = level.num_steps,
                    "pyramid level started"
                );
                let mut level_config = config.clone().with_max_steps(level.num_steps);
                if let Some(tolerance) = level.tolerance {
                    level_config.tolerance = Some(tolerance);
                }

                let mut optimizer = ImageOptimizer::new(
                    ctx.clone(),
                    start,
                    objective,
                    make_optimizer(level),
                    level_config,
                )?;
                let callbacks = &mut *step_callbacks;
                if !callbacks.is_empty() {
                    optimizer.on_step(move |report| {
                        let mut stop = false;
                        for callback in callbacks.iter_mut() {
                            stop |= callback(index, report) == StepControl::Stop;
                        }
                        if stop {
                            StepControl::Stop
                        } else {
                            StepControl::Continue
                        }
                    });
                }
                optimizer.run()
            };

            let outcome = run(&mut **objective).map_err(|source| Error::PyramidLevel {
                level: index,
                source: Box::new(source),
            })?;

            outcomes.push(LevelOutcome {
                level: index,
                height: level_h,
                width: level_w,
                status: outcome.status,
                steps: outcome.steps,
                final_loss: outcome.final_loss,
            });
            image = outcome.image;
            status = outcome.status;
            if status == RunState::Cancelled {
                info!(level = index, "pyramid optimization cancelled");
                break;
            }
        }
        info!(status = %status, "pyramid optimization finished");

        Ok(PyramidOutcome {
            image,
            status,
            levels: outcomes,
        })
    }
}

fn resize_to_level<R: Runtime<DType = DType>>(
    image: &Tensor<R>,
    level: &PyramidLevel,
) -> Result<Tensor<R>> {
    let (height, width) = spatial_size(image.shape())?;
    let (level_h, level_w) = level.image_size(height, width);
    resize_bilinear(image, level_h, level_w)
}

impl<R: Runtime<DType = DType>> PyramidOutcome<R> {
    /// Host copy of the final image.
    pub fn snapshot(&self) -> ImageSnapshot {
        ImageSnapshot::capture(&self.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, SequentialExtractor};
    use crate::image::Edge;
    use crate::nn::{Activation, AvgPool2d};
    use crate::operation::{ContentOperation, GramOperation};
    use crate::optimizer::{Sgd, SgdConfig};
    use crate::test_utils::cpu_setup;
    use numr::autograd::Var;
    use numr::runtime::cpu::CpuRuntime;

    fn objective() -> LossAggregator<CpuRuntime> {
        let (client, device) = cpu_setup();
        let mut ex = SequentialExtractor::<CpuRuntime>::new();
        ex.push("relu", Activation::Relu.into()).unwrap();
        ex.push("pool", AvgPool2d::new(2).unwrap().into()).unwrap();
        let mut agg =
            LossAggregator::new(Encoder::new(ExecutionContext::f32(device.clone()), Box::new(ex)));
        agg.add("content", Box::new(ContentOperation::new("relu")), 1.0).unwrap();
        agg.add("style", Box::new(GramOperation::new("pool")), 0.5).unwrap();
        let content =
            Tensor::<CpuRuntime>::from_slice(&[0.4f32; 32 * 32], &[1, 1, 32, 32], &device);
        let style = Tensor::<CpuRuntime>::from_slice(&[0.8f32; 24 * 24], &[1, 1, 24, 24], &device);
        agg.set_content_image(&client, &content).unwrap();
        agg.set_style_image(&client, &style).unwrap();
        agg
    }

    fn start() -> Tensor<CpuRuntime> {
        let (_client, device) = cpu_setup();
        Tensor::<CpuRuntime>::from_slice(&[0.1f32; 32 * 32], &[1, 1, 32, 32], &device)
    }

    fn sgd(_: &PyramidLevel) -> Sgd<CpuRuntime> {
        Sgd::new(SgdConfig::default().with_lr(0.1))
    }

    #[test]
    fn test_levels_run_coarse_to_fine() {
        let (_client, device) = cpu_setup();
        let mut agg = objective();
        let pyramid = ImagePyramid::new(&[8, 16], 2usize, Edge::Short).unwrap();
        let mut opt = PyramidImageOptimizer::new(
            ExecutionContext::f32(device),
            start(),
            &mut agg,
            pyramid,
            ImageOptimConfig::default(),
        )
        .unwrap();
        let outcome = opt.run(sgd).unwrap();
        assert_eq!(outcome.image.shape(), &[1, 1, 16, 16]);
        assert_eq!(outcome.status, RunState::MaxStepsReached);
        let sizes: Vec<_> = outcome.levels.iter().map(|l| (l.height, l.width, l.steps)).collect();
        assert_eq!(sizes, vec![(8, 8, 2), (16, 16, 2)]);
        assert!(matches!(opt.run(sgd), Err(Error::State { .. })));
    }

    #[test]
    fn test_targets_and_weights_restored() {
        let (_client, device) = cpu_setup();
        let mut agg = objective();
        let levels = vec![
            PyramidLevel::exact(8, 8, 1).with_weight("style", 0.0),
            PyramidLevel::exact(16, 16, 1),
        ];
        let pyramid = ImagePyramid::from_levels(levels).unwrap();
        {
            let mut opt = PyramidImageOptimizer::new(
                ExecutionContext::f32(device),
                start(),
                &mut agg,
                pyramid,
                ImageOptimConfig::default(),
            )
            .unwrap();
            opt.run(sgd).unwrap();
        }
        assert_eq!(agg.content_image().unwrap().shape(), &[1, 1, 32, 32]);
        assert_eq!(agg.style_image().unwrap().shape(), &[1, 1, 24, 24]);
        assert_eq!(agg.weight("style"), Some(0.5));
    }

    #[test]
    fn test_single_operation_target_survives_run() {
        let (client, device) = cpu_setup();
        let mut agg = objective();
        agg.add("detail", Box::new(ContentOperation::new("relu")), 1.0).unwrap();
        let detail = Tensor::<CpuRuntime>::from_slice(&[0.9f32; 32 * 32], &[1, 1, 32, 32], &device);
        agg.set_target(&client, "detail", &detail).unwrap();

        let pyramid = ImagePyramid::new(&[8, 16], 1usize, Edge::Short).unwrap();
        {
            let mut opt = PyramidImageOptimizer::new(
                ExecutionContext::f32(device.clone()),
                start(),
                &mut agg,
                pyramid,
                ImageOptimConfig::default(),
            )
            .unwrap();
            opt.run(sgd).unwrap();
        }

        let kept = agg.target_image("detail").unwrap();
        assert_eq!(kept.shape(), &[1, 1, 32, 32]);
        assert_eq!(kept.to_vec::<f32>(), detail.to_vec::<f32>());
        assert_eq!(agg.target_image("content").unwrap().to_vec::<f32>(), vec![0.4; 32 * 32]);

        // the detail target is the full-size encoding of its own image again
        let x = Var::new(detail.clone(), false);
        let (_, breakdown) = agg.evaluate_with_breakdown(&client, &x).unwrap();
        assert_eq!(breakdown.get("detail"), Some(0.0));
        assert!(breakdown.get("content").unwrap() > 0.0);
    }

    #[test]
    fn test_unknown_override_rejected_before_running() {
        let (_client, device) = cpu_setup();
        let mut agg = objective();
        let pyramid =
            ImagePyramid::from_levels(vec![PyramidLevel::exact(8, 8, 1).with_weight("nope", 1.0)])
                .unwrap();
        let mut opt = PyramidImageOptimizer::new(
            ExecutionContext::f32(device),
            start(),
            &mut agg,
            pyramid,
            ImageOptimConfig::default(),
        )
        .unwrap();
        assert!(matches!(opt.run(sgd), Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_level_failure_is_wrapped_and_objective_restored() {
        let (_client, device) = cpu_setup();
        let mut agg = objective();
        // content targets keep the content aspect (32x32) while the image is
        // 32x16, so the second level's content loss sees mismatched shapes
        let start = Tensor::<CpuRuntime>::from_slice(&[0.1f32; 32 * 16], &[1, 1, 32, 16], &device);
        let levels = vec![
            PyramidLevel::exact(8, 8, 1),
            PyramidLevel::edge(8, 1, Edge::Short),
        ];
        let pyramid = ImagePyramid::from_levels(levels).unwrap();
        let err = {
            let mut opt = PyramidImageOptimizer::new(
                ExecutionContext::f32(device),
                start,
                &mut agg,
                pyramid,
                ImageOptimConfig::default(),
            )
            .unwrap();
            opt.run(sgd).err().unwrap()
        };
        match err {
            Error::PyramidLevel { level, source } => {
                assert_eq!(level, 1);
                assert!(matches!(*source, Error::InvalidArgument { .. }));
            }
            other => panic!("expected PyramidLevel, got {other:?}"),
        }
        assert_eq!(agg.content_image().unwrap().shape(), &[1, 1, 32, 32]);
    }
}
