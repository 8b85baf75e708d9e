//! Gram-matrix style loss

use super::{Operation, Role, Source, check_weight, missing_target};
use crate::context::StyleClient;
use crate::error::Result;
use crate::nn::{gram_matrix, mse_loss};
use numr::autograd::Var;
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Mean squared error between the Gram matrices of the current and the
/// target activation at one layer.
///
/// Only the `[B, C, C]` statistic is compared, so the style image may have
/// a different spatial size than the image being optimized. Keep
/// `normalize` on when it does.
pub struct GramOperation<R: Runtime> {
    source: Source,
    normalize: bool,
    score_weight: f64,
    target_gram: Option<Tensor<R>>,
}

impl<R: Runtime<DType = DType>> GramOperation<R> {
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            source: Source::Encoding(layer.into()),
            normalize: true,
            score_weight: 1.0,
            target_gram: None,
        }
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_score_weight(mut self, score_weight: f64) -> Result<Self> {
        self.score_weight = check_weight("score_weight", score_weight)?;
        Ok(self)
    }

    pub fn normalize(&self) -> bool {
        self.normalize
    }

    /// Frozen Gram matrix of the style target.
    pub fn target_gram(&self) -> Option<&Tensor<R>> {
        self.target_gram.as_ref()
    }
}

impl<R: Runtime<DType = DType>> Operation<R> for GramOperation<R> {
    fn kind(&self) -> &'static str {
        "gram"
    }

    fn role(&self) -> Role {
        Role::Style
    }

    fn source(&self) -> &Source {
        &self.source
    }

    fn score_weight(&self) -> f64 {
        self.score_weight
    }

    fn has_target(&self) -> bool {
        self.target_gram.is_some()
    }

    fn set_target(&mut self, client: &R::Client, target: &Tensor<R>) -> Result<()>
    where
        R::Client: StyleClient<R>,
    {
        let gram = gram_matrix(client, &Var::new(target.clone(), false), self.normalize)?;
        self.target_gram = Some(gram.tensor().clone());
        Ok(())
    }

    fn score(&self, client: &R::Client, input: &Var<R>) -> Result<Var<R>>
    where
        R::Client: StyleClient<R>,
    {
        let target = self
            .target_gram
            .as_ref()
            .ok_or_else(|| missing_target(self.kind(), &self.source))?;
        let gram = gram_matrix(client, input, self.normalize)?;
        mse_loss(client, &gram, &Var::new(target.clone(), false))
    }
}
