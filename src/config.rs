//! Serializable description of a complete style transfer run.

use crate::encoder::{Encoder, normalize_layer_name};
use crate::error::{Error, Result};
use crate::image::Edge;
use crate::loss::{LayerWeighting, LossAggregator};
use crate::operation::{
    ContentOperation, GramOperation, Operation, TotalVariationOperation, check_weight,
};
use crate::optim::ImageOptimConfig;
use crate::optimizer::{Adam, AdamConfig, AnyOptimizer, Sgd, SgdConfig};
use crate::pyramid::{ImagePyramid, StepSchedule};
use numr::dtype::DType;
use numr::runtime::Runtime;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Update rule selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub lr: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            lr: 1e-2,
        }
    }
}

impl OptimizerConfig {
    pub fn build<R: Runtime<DType = DType>>(&self) -> AnyOptimizer<R> {
        match self.kind {
            OptimizerKind::Adam => Adam::new(AdamConfig::default().with_lr(self.lr)).into(),
            OptimizerKind::Sgd => Sgd::new(SgdConfig::default().with_lr(self.lr)).into(),
        }
    }
}

/// Pyramid section: one level per edge size, coarsest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidConfig {
    pub edge_sizes: Vec<usize>,
    /// A single count for every level or one count per level
    pub num_steps: StepSchedule,
    #[serde(default)]
    pub edge: Edge,
}

impl PyramidConfig {
    pub fn build(&self) -> Result<ImagePyramid> {
        ImagePyramid::new(&self.edge_sizes, self.num_steps.clone(), self.edge)
    }
}

/// Full run description, loadable from YAML or JSON.
///
/// ```yaml
/// content_layer: relu4_2
/// style_layers: [relu1_1, relu2_1, relu3_1, relu4_1, relu5_1]
/// style_weight: 1000.0
/// tv_weight: 0.1
/// optimizer:
///   kind: adam
///   lr: 0.02
/// pyramid:
///   edge_sizes: [256, 512]
///   num_steps: [400, 200]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleTransferConfig {
    pub content_layer: String,
    pub content_weight: f64,
    pub style_layers: Vec<String>,
    pub style_weight: f64,
    pub style_weighting: LayerWeighting,
    /// Divide Gram matrices by the number of spatial positions
    pub gram_normalize: bool,
    /// Total variation is only registered when this is > 0
    pub tv_weight: f64,
    pub tv_exponent: f64,
    pub optimizer: OptimizerConfig,
    pub max_steps: usize,
    pub tolerance: Option<f64>,
    pub window: usize,
    pub value_range: (f64, f64),
    pub pyramid: Option<PyramidConfig>,
}

impl Default for StyleTransferConfig {
    fn default() -> Self {
        Self {
            content_layer: "relu4_2".into(),
            content_weight: 1.0,
            style_layers: ["relu1_1", "relu2_1", "relu3_1", "relu4_1", "relu5_1"]
                .into_iter()
                .map(String::from)
                .collect(),
            style_weight: 1e3,
            style_weighting: LayerWeighting::Mean,
            gram_normalize: true,
            tv_weight: 0.0,
            tv_exponent: 2.0,
            optimizer: OptimizerConfig::default(),
            max_steps: 500,
            tolerance: None,
            window: 10,
            value_range: (0.0, 1.0),
            pyramid: None,
        }
    }
}

impl StyleTransferConfig {
    /// Validate configuration constraints
    pub fn validate(&self) -> Result<()> {
        if self.content_layer.is_empty() {
            return Err(Error::config("content_layer must not be empty"));
        }
        if self.style_layers.is_empty() {
            return Err(Error::config("style_layers must not be empty"));
        }
        check_weight("content_weight", self.content_weight)?;
        check_weight("style_weight", self.style_weight)?;
        check_weight("tv_weight", self.tv_weight)?;
        if let LayerWeighting::Custom(factors) = &self.style_weighting {
            if factors.len() != self.style_layers.len() {
                return Err(Error::config(format!(
                    "style_weighting has {} factors for {} style layers",
                    factors.len(),
                    self.style_layers.len()
                )));
            }
            for &factor in factors {
                check_weight("style_weighting factor", factor)?;
            }
        }
        if !self.tv_exponent.is_finite() || self.tv_exponent <= 0.0 {
            return Err(Error::config(format!(
                "tv_exponent must be finite and > 0, got {}",
                self.tv_exponent
            )));
        }
        if !self.optimizer.lr.is_finite() || self.optimizer.lr <= 0.0 {
            return Err(Error::config(format!(
                "optimizer.lr must be finite and > 0, got {}",
                self.optimizer.lr
            )));
        }
        self.image_optim_config().validate()?;
        if let Some(pyramid) = &self.pyramid {
            pyramid.build()?;
        }
        Ok(())
    }

    pub fn load_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = read(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| Error::config(format!("YAML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = read(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("JSON parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::config(format!("YAML encode error: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::config(format!("JSON encode error: {e}")))
    }

    /// Layer names with deprecated spellings rewritten.
    pub fn content_layer_name(&self) -> String {
        normalize_layer_name(&self.content_layer)
    }

    pub fn style_layer_names(&self) -> Vec<String> {
        self.style_layers
            .iter()
            .map(|layer| normalize_layer_name(layer))
            .collect()
    }

    pub fn image_optim_config(&self) -> ImageOptimConfig {
        let (low, high) = self.value_range;
        let config = ImageOptimConfig {
            max_steps: self.max_steps,
            window: self.window,
            ..ImageOptimConfig::default()
        }
        .with_value_range(low, high);
        match self.tolerance {
            Some(tolerance) => config.with_tolerance(tolerance, self.window),
            None => config.without_tolerance(),
        }
    }

    pub fn build_optimizer<R: Runtime<DType = DType>>(&self) -> AnyOptimizer<R> {
        self.optimizer.build()
    }

    pub fn build_pyramid(&self) -> Result<Option<ImagePyramid>> {
        self.pyramid.as_ref().map(PyramidConfig::build).transpose()
    }

    /// Objective with entries `content`, `style.<layer>` and, when
    /// `tv_weight > 0`, `tv`. Targets still have to be registered.
    pub fn build_loss<R: Runtime<DType = DType>>(
        &self,
        encoder: Encoder<R>,
    ) -> Result<LossAggregator<R>> {
        self.validate()?;
        let content_layer = self.content_layer_name();
        let style_layers = self.style_layer_names();

        let mut objective = LossAggregator::new(encoder);
        objective.add(
            "content",
            Box::new(ContentOperation::new(content_layer)),
            self.content_weight,
        )?;
        let normalize = self.gram_normalize;
        objective.add_layers(
            "style",
            &style_layers,
            self.style_weight,
            &self.style_weighting,
            |layer| -> Box<dyn Operation<R> + Send> {
                Box::new(GramOperation::new(layer).with_normalize(normalize))
            },
        )?;
        if self.tv_weight > 0.0 {
            let tv = TotalVariationOperation::new().with_exponent(self.tv_exponent)?;
            objective.add("tv", Box::new(tv), self.tv_weight)?;
        }
        Ok(objective)
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("IO error reading {}: {e}", path.display())))
}
