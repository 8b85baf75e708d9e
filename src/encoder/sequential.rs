//! Sequential feature extractor built from named stages

use super::traits::FeatureExtractor;
use crate::context::StyleClient;
use crate::error::{Error, Result};
use crate::nn::{Activation, AvgPool2d, Conv2d, MaxPool2d, Normalize};
use numr::autograd::Var;
use numr::dtype::DType;
use numr::runtime::Runtime;
use std::collections::HashMap;

/// One stage of a [`SequentialExtractor`].
pub enum Layer<R: Runtime> {
    Normalize(Normalize),
    Conv2d(Conv2d<R>),
    Activation(Activation),
    MaxPool2d(MaxPool2d),
    AvgPool2d(AvgPool2d),
}

impl<R: Runtime<DType = DType>> Layer<R> {
    pub fn forward(&self, client: &R::Client, input: &Var<R>) -> Result<Var<R>>
    where
        R::Client: StyleClient<R>,
    {
        match self {
            Layer::Normalize(norm) => norm.forward(client, input),
            Layer::Conv2d(conv) => conv.forward(client, input),
            Layer::Activation(act) => act.forward(client, input),
            Layer::MaxPool2d(pool) => pool.forward(client, input),
            Layer::AvgPool2d(pool) => pool.forward(client, input),
        }
    }
}

impl<R: Runtime> From<Normalize> for Layer<R> {
    fn from(norm: Normalize) -> Self {
        Layer::Normalize(norm)
    }
}

impl<R: Runtime> From<Conv2d<R>> for Layer<R> {
    fn from(conv: Conv2d<R>) -> Self {
        Layer::Conv2d(conv)
    }
}

impl<R: Runtime> From<Activation> for Layer<R> {
    fn from(act: Activation) -> Self {
        Layer::Activation(act)
    }
}

impl<R: Runtime> From<MaxPool2d> for Layer<R> {
    fn from(pool: MaxPool2d) -> Self {
        Layer::MaxPool2d(pool)
    }
}

impl<R: Runtime> From<AvgPool2d> for Layer<R> {
    fn from(pool: AvgPool2d) -> Self {
        Layer::AvgPool2d(pool)
    }
}

/// Ordered list of named stages, each feeding the next.
///
/// A forward pass stops after the deepest requested stage, so the cost of
/// an encode is set by the deepest layer, not by how many layers are asked for.
pub struct SequentialExtractor<R: Runtime> {
    names: Vec<String>,
    layers: Vec<Layer<R>>,
}

impl<R: Runtime<DType = DType>> SequentialExtractor<R> {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            layers: Vec::new(),
        }
    }

    /// Append a stage. Stage names must be unique.
    pub fn push(&mut self, name: impl Into<String>, layer: Layer<R>) -> Result<()> {
        let name = name.into();
        if self.names.contains(&name) {
            return Err(Error::config(format!("duplicate layer name '{name}'")));
        }
        self.names.push(name);
        self.layers.push(layer);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::config(format!("unknown layer '{name}'")))
    }
}

impl<R: Runtime<DType = DType>> Default for SequentialExtractor<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runtime<DType = DType>> FeatureExtractor<R> for SequentialExtractor<R> {
    fn layer_names(&self) -> &[String] {
        &self.names
    }

    fn forward(
        &self,
        client: &R::Client,
        input: &Var<R>,
        layers: &[String],
    ) -> Result<HashMap<String, Var<R>>>
    where
        R::Client: StyleClient<R>,
    {
        let mut deepest = None;
        for layer in layers {
            let idx = self.index_of(layer)?;
            deepest = Some(deepest.map_or(idx, |d: usize| d.max(idx)));
        }
        let Some(deepest) = deepest else {
            return Ok(HashMap::new());
        };

        let mut out = HashMap::with_capacity(layers.len());
        let mut x = input.clone();
        for (name, layer) in self.names.iter().zip(&self.layers).take(deepest + 1) {
            x = layer.forward(client, &x)?;
            if layers.contains(name) {
                out.insert(name.clone(), x.clone());
            }
        }
        Ok(out)
    }
}
