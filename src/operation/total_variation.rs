//! Total variation regularization

use super::{Operation, Role, Source, check_weight};
use crate::context::StyleClient;
use crate::error::{Error, Result};
use crate::nn::total_variation_loss;
use numr::autograd::Var;
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Smoothness penalty computed from pixel differences of the current image.
#[derive(Debug, Clone)]
pub struct TotalVariationOperation {
    source: Source,
    exponent: f64,
    score_weight: f64,
}

impl TotalVariationOperation {
    pub fn new() -> Self {
        Self {
            source: Source::Pixel,
            exponent: 2.0,
            score_weight: 1.0,
        }
    }

    pub fn with_exponent(mut self, exponent: f64) -> Result<Self> {
        if !exponent.is_finite() || exponent <= 0.0 {
            return Err(Error::config(format!(
                "total variation exponent must be finite and > 0, got {exponent}"
            )));
        }
        self.exponent = exponent;
        Ok(self)
    }

    pub fn with_score_weight(mut self, score_weight: f64) -> Result<Self> {
        self.score_weight = check_weight("score_weight", score_weight)?;
        Ok(self)
    }

    pub fn exponent(&self) -> f64 {
        self.exponent
    }
}

impl Default for TotalVariationOperation {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runtime<DType = DType>> Operation<R> for TotalVariationOperation {
    fn kind(&self) -> &'static str {
        "total_variation"
    }

    fn role(&self) -> Role {
        Role::Regularization
    }

    fn source(&self) -> &Source {
        &self.source
    }

    fn score_weight(&self) -> f64 {
        self.score_weight
    }

    fn has_target(&self) -> bool {
        false
    }

    fn set_target(&mut self, _client: &R::Client, _target: &Tensor<R>) -> Result<()>
    where
        R::Client: StyleClient<R>,
    {
        Err(Error::config("total variation does not take a target"))
    }

    fn score(&self, client: &R::Client, input: &Var<R>) -> Result<Var<R>>
    where
        R::Client: StyleClient<R>,
    {
        total_variation_loss(client, input, self.exponent)
    }
}
