//! Weighted composition of operations into one objective

use super::dict::LossDict;
use crate::context::{ExecutionContext, StyleClient, scalar_value};
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::operation::{Operation, Role, Source, check_weight};
use numr::autograd::{Var, var_add, var_mul_scalar, var_sum};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::collections::HashMap;
use tracing::debug;

/// How [`LossAggregator::add_layers`] splits a weight across layers.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerWeighting {
    /// Every layer gets `weight / n`.
    Mean,
    /// Every layer gets `weight`.
    Sum,
    /// Layer `i` gets `weight * factors[i]`.
    Custom(Vec<f64>),
}

impl LayerWeighting {
    fn layer_weights(&self, weight: f64, num_layers: usize) -> Result<Vec<f64>> {
        match self {
            LayerWeighting::Mean => Ok(vec![weight / num_layers as f64; num_layers]),
            LayerWeighting::Sum => Ok(vec![weight; num_layers]),
            LayerWeighting::Custom(factors) => {
                if factors.len() != num_layers {
                    return Err(Error::config(format!(
                        "expected {num_layers} layer weights, got {}",
                        factors.len()
                    )));
                }
                Ok(factors.iter().map(|f| weight * f).collect())
            }
        }
    }
}

struct Entry<R: Runtime> {
    name: String,
    op: Box<dyn Operation<R> + Send>,
    weight: f64,
    /// Reference image the current target was encoded from.
    target_image: Option<Tensor<R>>,
}

/// Ordered collection of named, weighted operations evaluated as one sum.
///
/// The aggregator owns the [`Encoder`]: targets are registered through it
/// and every evaluation encodes the current image once for the union of
/// layers its operations read.
pub struct LossAggregator<R: Runtime> {
    encoder: Encoder<R>,
    entries: Vec<Entry<R>>,
    content_image: Option<Tensor<R>>,
    style_image: Option<Tensor<R>>,
}

impl<R: Runtime<DType = DType>> LossAggregator<R> {
    pub fn new(encoder: Encoder<R>) -> Self {
        Self {
            encoder,
            entries: Vec::new(),
            content_image: None,
            style_image: None,
        }
    }

    pub fn context(&self) -> &ExecutionContext<R> {
        self.encoder.context()
    }

    pub fn encoder(&self) -> &Encoder<R> {
        &self.encoder
    }

    pub fn encoder_mut(&mut self) -> &mut Encoder<R> {
        &mut self.encoder
    }

    pub fn invalidate_cache(&mut self) {
        self.encoder.invalidate_cache();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn operation(&self, name: &str) -> Option<&dyn Operation<R>> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.op.as_ref() as &dyn Operation<R>)
    }

    pub fn weight(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.weight)
    }

    pub fn set_weight(&mut self, name: &str, weight: f64) -> Result<()> {
        let weight = check_weight("weight", weight)?;
        let entry = self.entry_mut(name)?;
        entry.weight = weight;
        Ok(())
    }

    /// Last image passed to [`set_content_image`](Self::set_content_image).
    pub fn content_image(&self) -> Option<&Tensor<R>> {
        self.content_image.as_ref()
    }

    /// Last image passed to [`set_style_image`](Self::set_style_image).
    pub fn style_image(&self) -> Option<&Tensor<R>> {
        self.style_image.as_ref()
    }

    /// Reference image the target of `name` was registered from, either by
    /// role broadcast or by [`set_target`](Self::set_target).
    pub fn target_image(&self, name: &str) -> Option<&Tensor<R>> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.target_image.as_ref())
    }

    /// Register a uniquely named operation.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        op: Box<dyn Operation<R> + Send>,
        weight: f64,
    ) -> Result<()> {
        let name = name.into();
        self.check_entry(&name, op.as_ref(), weight)?;
        debug!(
            name = %name,
            kind = op.kind(),
            role = %op.role(),
            weight,
            "operation registered"
        );
        self.entries.push(Entry {
            name,
            op,
            weight,
            target_image: None,
        });
        Ok(())
    }

    /// Register one operation per layer, named `prefix.layer`.
    ///
    /// Nothing is registered if any of the entries would be rejected.
    pub fn add_layers<F>(
        &mut self,
        prefix: &str,
        layers: &[String],
        weight: f64,
        weighting: &LayerWeighting,
        mut make: F,
    ) -> Result<()>
    where
        F: FnMut(&str) -> Box<dyn Operation<R> + Send>,
    {
        if layers.is_empty() {
            return Err(Error::config(format!("no layers given for '{prefix}'")));
        }
        check_weight("weight", weight)?;
        let weights = weighting.layer_weights(weight, layers.len())?;

        let mut staged = Vec::with_capacity(layers.len());
        let mut staged_names: Vec<String> = Vec::with_capacity(layers.len());
        for (layer, weight) in layers.iter().zip(weights) {
            let name = format!("{prefix}.{layer}");
            let op = make(layer);
            self.check_entry(&name, op.as_ref(), weight)?;
            if staged_names.contains(&name) {
                return Err(Error::config(format!("duplicate operation name '{name}'")));
            }
            staged_names.push(name.clone());
            staged.push((name, op, weight));
        }
        for (name, op, weight) in staged {
            self.add(name, op, weight)?;
        }
        Ok(())
    }

    /// Encode `image` once and hand the result to every content operation.
    pub fn set_content_image(&mut self, client: &R::Client, image: &Tensor<R>) -> Result<()>
    where
        R::Client: StyleClient<R>,
    {
        self.set_role_targets(client, Role::Content, image)?;
        self.content_image = Some(image.clone());
        Ok(())
    }

    /// Encode `image` once and hand the result to every style operation.
    pub fn set_style_image(&mut self, client: &R::Client, image: &Tensor<R>) -> Result<()>
    where
        R::Client: StyleClient<R>,
    {
        self.set_role_targets(client, Role::Style, image)?;
        self.style_image = Some(image.clone());
        Ok(())
    }

    /// Set the target of a single operation from `image`, regardless of role.
    pub fn set_target(&mut self, client: &R::Client, name: &str, image: &Tensor<R>) -> Result<()>
    where
        R::Client: StyleClient<R>,
    {
        let idx = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| Error::config(format!("unknown operation '{name}'")))?;
        self.set_targets(client, &[idx], image)
    }

    fn set_role_targets(&mut self, client: &R::Client, role: Role, image: &Tensor<R>) -> Result<()>
    where
        R::Client: StyleClient<R>,
    {
        let indices: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.op.role() == role)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            debug!(role = %role, "no operations with this role, image kept for later");
        }
        self.set_targets(client, &indices, image)?;
        debug!(role = %role, operations = indices.len(), "targets registered");
        Ok(())
    }

    /// Re-register every target from `resize` applied to its own reference
    /// image. The recorded reference images are left untouched, so
    /// [`restore_targets`](Self::restore_targets) undoes this.
    ///
    /// Operations sharing a reference image share one resize and one encode.
    pub fn resize_targets<F>(&mut self, client: &R::Client, mut resize: F) -> Result<()>
    where
        R::Client: StyleClient<R>,
        F: FnMut(&Tensor<R>) -> Result<Tensor<R>>,
    {
        let mut groups: Vec<(Tensor<R>, Vec<usize>)> = Vec::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            let Some(source) = &entry.target_image else {
                continue;
            };
            match groups.iter_mut().find(|(image, _)| image.id() == source.id()) {
                Some((_, indices)) => indices.push(idx),
                None => groups.push((source.clone(), vec![idx])),
            }
        }
        for (source, indices) in &groups {
            let image = resize(source)?;
            self.encode_targets(client, indices, &image)?;
        }
        debug!(images = groups.len(), "targets re-registered");
        Ok(())
    }

    /// Re-register every target from its recorded reference image.
    pub fn restore_targets(&mut self, client: &R::Client) -> Result<()>
    where
        R::Client: StyleClient<R>,
    {
        self.resize_targets(client, |image| Ok(image.clone()))
    }

    fn set_targets(
        &mut self,
        client: &R::Client,
        indices: &[usize],
        image: &Tensor<R>,
    ) -> Result<()>
    where
        R::Client: StyleClient<R>,
    {
        self.encode_targets(client, indices, image)?;
        for &idx in indices {
            self.entries[idx].target_image = Some(image.clone());
        }
        Ok(())
    }

    fn encode_targets(
        &mut self,
        client: &R::Client,
        indices: &[usize],
        image: &Tensor<R>,
    ) -> Result<()>
    where
        R::Client: StyleClient<R>,
    {
        self.encoder.context().check(image)?;
        let layers = unique_layers(indices.iter().map(|&i| &self.entries[i]));
        let encodings = if layers.is_empty() {
            HashMap::new()
        } else {
            self.encoder.encode_reference(client, image, &layers)?
        };

        for &idx in indices {
            let entry = &mut self.entries[idx];
            let target = match entry.op.source() {
                Source::Pixel => image,
                Source::Encoding(layer) => encodings.get(layer).ok_or_else(|| {
                    Error::config(format!("layer '{layer}' was not encoded"))
                })?,
            };
            entry.op.set_target(client, target)?;
        }
        Ok(())
    }

    /// Total weighted loss of `image`.
    pub fn evaluate(&mut self, client: &R::Client, image: &Var<R>) -> Result<Var<R>>
    where
        R::Client: StyleClient<R>,
    {
        self.evaluate_inner(client, image, false).map(|(total, _)| total)
    }

    /// Total weighted loss of `image` plus the weighted value of every child.
    ///
    /// Reading the breakdown synchronizes with the device once per child.
    pub fn evaluate_with_breakdown(
        &mut self,
        client: &R::Client,
        image: &Var<R>,
    ) -> Result<(Var<R>, LossDict)>
    where
        R::Client: StyleClient<R>,
    {
        self.evaluate_inner(client, image, true)
    }

    fn evaluate_inner(
        &mut self,
        client: &R::Client,
        image: &Var<R>,
        breakdown: bool,
    ) -> Result<(Var<R>, LossDict)>
    where
        R::Client: StyleClient<R>,
    {
        if self.entries.is_empty() {
            return Err(Error::config("objective has no operations"));
        }

        let layers = unique_layers(self.entries.iter().filter(|e| e.weight > 0.0));
        let encodings = if layers.is_empty() {
            HashMap::new()
        } else {
            self.encoder.encode(client, image, &layers)?
        };

        let mut dict = LossDict::new();
        let mut total: Option<Var<R>> = None;
        for entry in &self.entries {
            if entry.weight == 0.0 {
                if breakdown {
                    dict.push(entry.name.as_str(), 0.0);
                }
                continue;
            }

            let input = match entry.op.source() {
                Source::Pixel => image,
                Source::Encoding(layer) => encodings.get(layer).ok_or_else(|| {
                    Error::config(format!("layer '{layer}' was not encoded"))
                })?,
            };
            let value = entry.op.evaluate(client, input)?;
            let weighted = if entry.weight == 1.0 {
                value
            } else {
                var_mul_scalar(&value, entry.weight, client).map_err(Error::Numr)?
            };
            if breakdown {
                dict.push(entry.name.as_str(), scalar_value(client, weighted.tensor())?);
            }
            total = Some(match total {
                None => weighted,
                Some(acc) => var_add(&acc, &weighted, client).map_err(Error::Numr)?,
            });
        }

        let total = match total {
            Some(total) => total,
            // every weight is zero: keep the image in the graph so backward yields a zero gradient
            None => {
                let dims: Vec<usize> = (0..image.shape().len()).collect();
                let sum = var_sum(image, &dims, false, client).map_err(Error::Numr)?;
                var_mul_scalar(&sum, 0.0, client).map_err(Error::Numr)?
            }
        };
        Ok((total, dict))
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut Entry<R>> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::config(format!("unknown operation '{name}'")))
    }

    fn check_entry(&self, name: &str, op: &dyn Operation<R>, weight: f64) -> Result<()> {
        if name.is_empty() {
            return Err(Error::config("operation name must not be empty"));
        }
        if self.contains(name) {
            return Err(Error::config(format!("duplicate operation name '{name}'")));
        }
        check_weight("weight", weight)?;
        if let Source::Encoding(layer) = op.source() {
            self.encoder.check_layers(std::slice::from_ref(layer))?;
        }
        Ok(())
    }
}

/// Distinct encoder layers read by `entries`, in first-use order.
fn unique_layers<'a, R, I>(entries: I) -> Vec<String>
where
    R: Runtime<DType = DType> + 'a,
    I: Iterator<Item = &'a Entry<R>>,
{
    let mut layers: Vec<String> = Vec::new();
    for entry in entries {
        if let Some(layer) = entry.op.source().layer() {
            if !layers.iter().any(|l| l == layer) {
                layers.push(layer.to_string());
            }
        }
    }
    layers
}
