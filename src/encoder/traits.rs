//! Feature extractor abstraction

use crate::context::StyleClient;
use crate::error::Result;
use numr::autograd::Var;
use numr::dtype::DType;
use numr::runtime::Runtime;
use std::collections::HashMap;

/// A network that exposes activations at named layers.
///
/// Implementations are expected to be frozen: their own parameters never
/// require gradients, so the only leaf a loss can reach is the input image.
pub trait FeatureExtractor<R: Runtime<DType = DType>> {
    /// Every layer name this extractor can produce, in forward order.
    fn layer_names(&self) -> &[String];

    /// Run the forward pass and return the activations for `layers`.
    ///
    /// Every requested name must be present in the returned map. Layer names
    /// have already been validated against [`layer_names`](Self::layer_names).
    fn forward(
        &self,
        client: &R::Client,
        input: &Var<R>,
        layers: &[String],
    ) -> Result<HashMap<String, Var<R>>>
    where
        R::Client: StyleClient<R>;

    fn has_layer(&self, name: &str) -> bool {
        self.layer_names().iter().any(|l| l == name)
    }
}
