//! Content loss

use super::{Operation, Role, Source, check_weight, missing_target};
use crate::context::StyleClient;
use crate::error::Result;
use crate::nn::mse_loss;
use numr::autograd::Var;
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Mean squared error between the current and the target representation.
pub struct ContentOperation<R: Runtime> {
    source: Source,
    score_weight: f64,
    target: Option<Tensor<R>>,
}

impl<R: Runtime<DType = DType>> ContentOperation<R> {
    /// Content loss on the activation of `layer`.
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            source: Source::Encoding(layer.into()),
            score_weight: 1.0,
            target: None,
        }
    }

    /// Content loss directly on pixels.
    pub fn pixel() -> Self {
        Self {
            source: Source::Pixel,
            score_weight: 1.0,
            target: None,
        }
    }

    pub fn with_score_weight(mut self, score_weight: f64) -> Result<Self> {
        self.score_weight = check_weight("score_weight", score_weight)?;
        Ok(self)
    }

    pub fn target(&self) -> Option<&Tensor<R>> {
        self.target.as_ref()
    }
}

impl<R: Runtime<DType = DType>> Operation<R> for ContentOperation<R> {
    fn kind(&self) -> &'static str {
        "content"
    }

    fn role(&self) -> Role {
        Role::Content
    }

    fn source(&self) -> &Source {
        &self.source
    }

    fn score_weight(&self) -> f64 {
        self.score_weight
    }

    fn has_target(&self) -> bool {
        self.target.is_some()
    }

    fn set_target(&mut self, _client: &R::Client, target: &Tensor<R>) -> Result<()>
    where
        R::Client: StyleClient<R>,
    {
        self.target = Some(target.clone());
        Ok(())
    }

    fn score(&self, client: &R::Client, input: &Var<R>) -> Result<Var<R>>
    where
        R::Client: StyleClient<R>,
    {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| missing_target(self.kind(), &self.source))?;
        mse_loss(client, input, &Var::new(target.clone(), false))
    }
}
