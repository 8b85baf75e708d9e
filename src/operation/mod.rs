//! Differentiable cost terms.
//!
//! Every operation reads either the raw image ([`Source::Pixel`]) or the
//! encoder activation of one layer ([`Source::Encoding`]) and turns it into
//! a scalar loss. Which reference image a target comes from is decided by
//! the operation's [`Role`].

pub mod content;
pub mod gram;
pub mod total_variation;

pub use content::ContentOperation;
pub use gram::GramOperation;
pub use total_variation::TotalVariationOperation;

use crate::context::StyleClient;
use crate::error::{Error, Result};
use numr::autograd::{Var, var_mul_scalar};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Which reference image an operation compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Target comes from the content image.
    Content,
    /// Target comes from the style image.
    Style,
    /// No target; a penalty on the current image alone.
    Regularization,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Content => write!(f, "content"),
            Role::Style => write!(f, "style"),
            Role::Regularization => write!(f, "regularization"),
        }
    }
}

/// What an operation reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    Pixel,
    Encoding(String),
}

impl Source {
    /// Encoder layer, if this is an encoding source.
    pub fn layer(&self) -> Option<&str> {
        match self {
            Source::Pixel => None,
            Source::Encoding(layer) => Some(layer),
        }
    }
}

/// A single cost term.
///
/// `set_target` receives the representation the operation reads (pixels or
/// one layer's activation) of the reference image, already detached from
/// any graph. `score` receives the same representation of the current image
/// and must stay differentiable with respect to it.
pub trait Operation<R: Runtime<DType = DType>> {
    /// Short type name used in logs and reports.
    fn kind(&self) -> &'static str;

    fn role(&self) -> Role;

    fn source(&self) -> &Source;

    /// Factor applied to the score inside [`evaluate`](Self::evaluate).
    fn score_weight(&self) -> f64;

    /// Whether `score` needs a target before it can run.
    fn requires_target(&self) -> bool {
        self.role() != Role::Regularization
    }

    fn has_target(&self) -> bool;

    /// Capture and freeze the reference representation. Replaces any
    /// previous target.
    fn set_target(&mut self, client: &R::Client, target: &Tensor<R>) -> Result<()>
    where
        R::Client: StyleClient<R>;

    /// Unweighted loss of `input` against the frozen target.
    fn score(&self, client: &R::Client, input: &Var<R>) -> Result<Var<R>>
    where
        R::Client: StyleClient<R>;

    /// `score_weight * score(input)`.
    fn evaluate(&self, client: &R::Client, input: &Var<R>) -> Result<Var<R>>
    where
        R::Client: StyleClient<R>,
    {
        let score = self.score(client, input)?;
        let weight = self.score_weight();
        if weight == 1.0 {
            Ok(score)
        } else {
            var_mul_scalar(&score, weight, client).map_err(Error::Numr)
        }
    }
}

/// Weights must be finite and non-negative.
pub(crate) fn check_weight(arg: &'static str, weight: f64) -> Result<f64> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(Error::config(format!(
            "{arg} must be finite and non-negative, got {weight}"
        )));
    }
    Ok(weight)
}

pub(crate) fn missing_target(kind: &str, source: &Source) -> Error {
    let at = match source {
        Source::Pixel => "pixels".to_string(),
        Source::Encoding(layer) => format!("layer '{layer}'"),
    };
    Error::state(format!(
        "{kind} operation on {at} has no target; set a target before evaluating"
    ))
}
