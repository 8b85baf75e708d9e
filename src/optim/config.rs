//! Run configuration and per-step reporting types

use crate::error::{Error, Result};
use crate::loss::LossDict;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// ImageOptimizer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ImageOptimConfig {
    /// Step budget; reaching it ends the run with [`RunState::MaxStepsReached`].
    pub max_steps: usize,
    /// Stop with [`RunState::Converged`] once the loss improves by less than
    /// this over the last `window` steps. `None` disables the check.
    pub tolerance: Option<f64>,
    pub window: usize,
    /// Every update is clamped into `[low, high]`.
    pub value_range: (f64, f64),
    /// Emit an `info` event every this many steps (0 = never).
    pub log_every: usize,
}

impl Default for ImageOptimConfig {
    fn default() -> Self {
        Self {
            max_steps: 500,
            tolerance: None,
            window: 10,
            value_range: (0.0, 1.0),
            log_every: 50,
        }
    }
}

impl ImageOptimConfig {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64, window: usize) -> Self {
        self.tolerance = Some(tolerance);
        self.window = window;
        self
    }

    pub fn without_tolerance(mut self) -> Self {
        self.tolerance = None;
        self
    }

    pub fn with_value_range(mut self, low: f64, high: f64) -> Self {
        self.value_range = (low, high);
        self
    }

    pub fn with_log_every(mut self, log_every: usize) -> Self {
        self.log_every = log_every;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(Error::config("max_steps must be > 0"));
        }
        if let Some(tolerance) = self.tolerance {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(Error::config(format!(
                    "tolerance must be finite and non-negative, got {tolerance}"
                )));
            }
            if self.window == 0 {
                return Err(Error::config("convergence window must be > 0"));
            }
        }
        let (low, high) = self.value_range;
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(Error::config(format!(
                "value_range must be finite with low < high, got ({low}, {high})"
            )));
        }
        Ok(())
    }
}

/// Lifecycle of a single optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initialized,
    Running,
    /// Loss stopped improving by more than the tolerance.
    Converged,
    MaxStepsReached,
    /// A step callback asked to stop.
    Cancelled,
    /// The run ended with an error.
    Failed,
}

impl RunState {
    /// Whether the run ended without error.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RunState::Converged | RunState::MaxStepsReached | RunState::Cancelled
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Initialized => "initialized",
            RunState::Running => "running",
            RunState::Converged => "converged",
            RunState::MaxStepsReached => "max_steps_reached",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Returned by step callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    Stop,
}

/// What a step callback sees after each update.
pub struct StepReport<'a, R: Runtime> {
    /// 1-based step index
    pub step: usize,
    /// Loss of the image before this step's update
    pub loss: f64,
    pub breakdown: &'a LossDict,
    /// Image after this step's update and clamp
    pub image: &'a Tensor<R>,
}

/// Final image and how the run ended.
pub struct OptimizationOutcome<R: Runtime> {
    pub image: Tensor<R>,
    pub status: RunState,
    /// Completed steps
    pub steps: usize,
    /// Loss evaluated in the last completed step
    pub final_loss: f64,
    /// Loss of every completed step
    pub losses: Vec<f64>,
}

/// True once the loss improved by less than `tolerance` over the last `window` steps.
pub(crate) fn has_converged(losses: &[f64], window: usize, tolerance: f64) -> bool {
    if window == 0 || losses.len() <= window {
        return false;
    }
    let newest = losses[losses.len() - 1];
    let oldest = losses[losses.len() - 1 - window];
    oldest - newest < tolerance
}
