//! Encoder with per-image activation cache

use super::traits::FeatureExtractor;
use crate::context::{ExecutionContext, StyleClient};
use crate::error::{Error, Result};
use numr::autograd::Var;
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::{Tensor, TensorId};
use std::collections::HashMap;
use tracing::debug;

/// Identity of the image an [`EncodingCache`] was filled from.
///
/// The var id routes gradients and the tensor id changes whenever the
/// optimizer writes a new image, so both take part in the key. Gradient
/// tracking is part of it too: the same pixels encoded without tracking
/// must never be served to a caller that needs a gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheKey {
    var: TensorId,
    tensor: TensorId,
    requires_grad: bool,
}

impl CacheKey {
    fn of<R: Runtime>(image: &Var<R>) -> Self {
        Self {
            var: image.id(),
            tensor: image.tensor().id(),
            requires_grad: image.requires_grad(),
        }
    }
}

struct EncodingCache<R: Runtime> {
    key: Option<CacheKey>,
    activations: HashMap<String, Var<R>>,
}

impl<R: Runtime> EncodingCache<R> {
    fn new() -> Self {
        Self {
            key: None,
            activations: HashMap::new(),
        }
    }

    fn clear(&mut self) {
        self.key = None;
        self.activations.clear();
    }
}

/// Wraps a [`FeatureExtractor`] and serves cached activations.
///
/// Activations are cached per layer for one image at a time. Encoding a
/// different image drops the whole cache; [`invalidate_cache`](Self::invalidate_cache)
/// drops it explicitly.
pub struct Encoder<R: Runtime> {
    ctx: ExecutionContext<R>,
    extractor: Box<dyn FeatureExtractor<R> + Send>,
    cache: EncodingCache<R>,
}

impl<R: Runtime<DType = DType>> Encoder<R> {
    pub fn new(ctx: ExecutionContext<R>, extractor: Box<dyn FeatureExtractor<R> + Send>) -> Self {
        Self {
            ctx,
            extractor,
            cache: EncodingCache::new(),
        }
    }

    pub fn context(&self) -> &ExecutionContext<R> {
        &self.ctx
    }

    pub fn layer_names(&self) -> &[String] {
        self.extractor.layer_names()
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.extractor.has_layer(name)
    }

    /// Fail with a configuration error if any of `layers` is unknown.
    pub fn check_layers(&self, layers: &[String]) -> Result<()> {
        match layers.iter().find(|l| !self.has_layer(l)) {
            Some(unknown) => Err(Error::config(format!(
                "unknown layer '{unknown}', available layers: {}",
                self.layer_names().join(", ")
            ))),
            None => Ok(()),
        }
    }

    /// Layers currently held in the cache.
    pub fn cached_layers(&self) -> Vec<&str> {
        self.cache.activations.keys().map(String::as_str).collect()
    }

    pub fn invalidate_cache(&mut self) {
        if self.cache.key.is_some() {
            debug!(
                cached = self.cache.activations.len(),
                "encoder cache invalidated"
            );
        }
        self.cache.clear();
    }

    /// Activations of `image` at `layers`.
    ///
    /// Layers already cached for this image are returned without running the
    /// extractor; the rest are computed in a single forward pass.
    pub fn encode(
        &mut self,
        client: &R::Client,
        image: &Var<R>,
        layers: &[String],
    ) -> Result<HashMap<String, Var<R>>>
    where
        R::Client: StyleClient<R>,
    {
        self.check_layers(layers)?;
        self.ctx.check(image.tensor())?;

        let key = CacheKey::of(image);
        if self.cache.key != Some(key) {
            self.invalidate_cache();
            self.cache.key = Some(key);
        }

        let mut missing: Vec<String> = Vec::new();
        for layer in layers {
            if !self.cache.activations.contains_key(layer) && !missing.contains(layer) {
                missing.push(layer.clone());
            }
        }

        if missing.is_empty() {
            debug!(layers = layers.len(), "encoder cache hit");
        } else {
            debug!(missing = ?missing, "encoder cache miss");
            let fresh = self.extractor.forward(client, image, &missing)?;
            for layer in &missing {
                let activation = fresh.get(layer).ok_or_else(|| {
                    Error::config(format!("feature extractor did not produce layer '{layer}'"))
                })?;
                self.cache
                    .activations
                    .insert(layer.clone(), activation.clone());
            }
        }

        layers
            .iter()
            .map(|layer| {
                self.cache
                    .activations
                    .get(layer)
                    .map(|a| (layer.clone(), a.clone()))
                    .ok_or_else(|| Error::config(format!("layer '{layer}' missing from cache")))
            })
            .collect()
    }

    /// Encode a reference image without gradient tracking.
    pub fn encode_reference(
        &mut self,
        client: &R::Client,
        image: &Tensor<R>,
        layers: &[String],
    ) -> Result<HashMap<String, Tensor<R>>>
    where
        R::Client: StyleClient<R>,
    {
        let image = Var::new(image.clone(), false);
        let encodings = self.encode(client, &image, layers)?;
        Ok(encodings
            .into_iter()
            .map(|(layer, var)| (layer, var.tensor().clone()))
            .collect())
    }
}
