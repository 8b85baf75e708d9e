//! stylr error types

use crate::image::ImageSnapshot;
use numr::dtype::DType;

/// stylr result type
pub type Result<T> = std::result::Result<T, Error>;

/// stylr errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from numr operations
    #[error("numr error: {0}")]
    Numr(#[from] numr::error::Error),

    /// Invalid setup: duplicate or missing registration, unknown layer name,
    /// malformed config. Raised at setup time and never retried.
    #[error("configuration error: {reason}")]
    Configuration {
        /// Description of what went wrong
        reason: String,
    },

    /// An operation was used before its required state (e.g. a target) was set.
    #[error("state error: {reason}")]
    State {
        /// Description of what went wrong
        reason: String,
    },

    /// The objective (or its gradient) became non-finite during a run.
    ///
    /// `image` is the image as it was after step `last_good_step`, the input
    /// of the failing step.
    #[error("optimization diverged at step {step} (loss={loss}); last good step was {last_good_step}")]
    Diverged {
        /// Step at which the non-finite value appeared (1-based)
        step: usize,
        /// Last step that completed with a finite loss and gradient
        last_good_step: usize,
        /// The offending loss value
        loss: f64,
        /// Host copy of the image after `last_good_step`
        image: Box<ImageSnapshot>,
    },

    /// A pyramid level failed; `source` is the error raised inside that level.
    #[error("pyramid level {level} failed: {source}")]
    PyramidLevel {
        /// Zero-based index of the failing level
        level: usize,
        /// The error raised while running the level
        #[source]
        source: Box<Error>,
    },

    /// DType mismatch between an image and the execution context
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        /// Expected dtype
        expected: DType,
        /// Actual dtype
        got: DType,
    },

    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Error::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn state(reason: impl Into<String>) -> Self {
        Error::State {
            reason: reason.into(),
        }
    }

    /// Step at which a run diverged, looking through pyramid level wrappers.
    pub fn diverged_step(&self) -> Option<usize> {
        match self {
            Error::Diverged { step, .. } => Some(*step),
            Error::PyramidLevel { source, .. } => source.diverged_step(),
            _ => None,
        }
    }

    /// Last good image of a diverged run, looking through pyramid level wrappers.
    pub fn last_good_image(&self) -> Option<&ImageSnapshot> {
        match self {
            Error::Diverged { image, .. } => Some(image),
            Error::PyramidLevel { source, .. } => source.last_good_image(),
            _ => None,
        }
    }
}
