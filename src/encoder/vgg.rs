//! VGG feature stack and its layer naming scheme

use super::sequential::{Layer, SequentialExtractor};
use crate::error::{Error, Result};
use crate::nn::{Activation, AvgPool2d, Conv2d, MaxPool2d, Normalize, Pooling};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Name of the optional first stage that normalizes the input image.
pub const PREPROCESSING_LAYER: &str = "preprocessing";

/// One entry of a VGG feature configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Conv(usize),
    Pool,
}

use Stage::{Conv as C, Pool as M};

const VGG11: &[Stage] = &[
    C(64), M, C(128), M, C(256), C(256), M, C(512), C(512), M, C(512), C(512), M,
];
const VGG13: &[Stage] = &[
    C(64), C(64), M, C(128), C(128), M, C(256), C(256), M, C(512), C(512), M, C(512), C(512), M,
];
const VGG16: &[Stage] = &[
    C(64), C(64), M, C(128), C(128), M, C(256), C(256), C(256), M, C(512), C(512), C(512), M,
    C(512), C(512), C(512), M,
];
const VGG19: &[Stage] = &[
    C(64), C(64), M, C(128), C(128), M, C(256), C(256), C(256), C(256), M, C(512), C(512),
    C(512), C(512), M, C(512), C(512), C(512), C(512), M,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VggArch {
    Vgg11,
    Vgg11Bn,
    Vgg13,
    Vgg13Bn,
    Vgg16,
    Vgg16Bn,
    Vgg19,
    Vgg19Bn,
}

impl VggArch {
    pub fn batch_norm(&self) -> bool {
        matches!(
            self,
            VggArch::Vgg11Bn | VggArch::Vgg13Bn | VggArch::Vgg16Bn | VggArch::Vgg19Bn
        )
    }

    fn stages(&self) -> &'static [Stage] {
        match self {
            VggArch::Vgg11 | VggArch::Vgg11Bn => VGG11,
            VggArch::Vgg13 | VggArch::Vgg13Bn => VGG13,
            VggArch::Vgg16 | VggArch::Vgg16Bn => VGG16,
            VggArch::Vgg19 | VggArch::Vgg19Bn => VGG19,
        }
    }

    /// Number of convolutions, i.e. how many weight tensors
    /// [`vgg`](SequentialExtractor::vgg) expects.
    pub fn num_convs(&self) -> usize {
        self.stages()
            .iter()
            .filter(|s| matches!(s, Stage::Conv(_)))
            .count()
    }

    /// Output channels of every convolution, in order.
    pub fn conv_channels(&self) -> Vec<usize> {
        self.stages()
            .iter()
            .filter_map(|s| match s {
                Stage::Conv(c) => Some(*c),
                Stage::Pool => None,
            })
            .collect()
    }

    /// Canonical layer names in forward order.
    ///
    /// `conv{block}_{depth}`, `bn{block}_{depth}` and `relu{block}_{depth}`
    /// share a depth that advances after every relu; `pool{block}` closes a
    /// block and resets the depth.
    pub fn layer_names(&self, preprocessing: bool) -> Vec<String> {
        let mut names = Vec::new();
        if preprocessing {
            names.push(PREPROCESSING_LAYER.to_string());
        }
        let (mut block, mut depth) = (1, 1);
        for stage in self.stages() {
            match stage {
                Stage::Conv(_) => {
                    names.push(format!("conv{block}_{depth}"));
                    if self.batch_norm() {
                        names.push(format!("bn{block}_{depth}"));
                    }
                    names.push(format!("relu{block}_{depth}"));
                    depth += 1;
                }
                Stage::Pool => {
                    names.push(format!("pool{block}"));
                    block += 1;
                    depth = 1;
                }
            }
        }
        names
    }
}

impl std::fmt::Display for VggArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VggArch::Vgg11 => "vgg11",
            VggArch::Vgg11Bn => "vgg11_bn",
            VggArch::Vgg13 => "vgg13",
            VggArch::Vgg13Bn => "vgg13_bn",
            VggArch::Vgg16 => "vgg16",
            VggArch::Vgg16Bn => "vgg16_bn",
            VggArch::Vgg19 => "vgg19",
            VggArch::Vgg19Bn => "vgg19_bn",
        };
        write!(f, "{name}")
    }
}

/// Rewrite the deprecated `conv_1_1` / `pool_2` spelling to `conv1_1` / `pool2`.
///
/// Any other name is returned unchanged.
pub fn normalize_layer_name(layer: &str) -> String {
    match parse_deprecated(layer) {
        Some(rewritten) => {
            warn!(
                old = layer,
                new = %rewritten,
                "deprecated layer name pattern; drop the underscore between type and block"
            );
            rewritten
        }
        None => layer.to_string(),
    }
}

/// `(conv|bn|relu|pool)_<digit>(_<digit>)?`
fn parse_deprecated(layer: &str) -> Option<String> {
    let (kind, rest) = layer.split_once('_')?;
    if !matches!(kind, "conv" | "bn" | "relu" | "pool") {
        return None;
    }
    let single_digit = |s: &str| s.len() == 1 && s.chars().all(|c| c.is_ascii_digit());
    match rest.split_once('_') {
        Some((block, depth)) if single_digit(block) && single_digit(depth) => {
            Some(format!("{kind}{block}_{depth}"))
        }
        None if single_digit(rest) => Some(format!("{kind}{rest}")),
        _ => None,
    }
}

impl<R: Runtime<DType = DType>> SequentialExtractor<R> {
    /// Assemble the VGG feature stack of `arch`.
    ///
    /// `weights` holds one `(weight, bias)` pair per convolution in forward
    /// order. Pools are 2x2 max pools, as in the pretrained networks. With
    /// `preprocessing`, the stack starts with a [`Normalize`] stage named
    /// `preprocessing`.
    pub fn vgg(
        arch: VggArch,
        weights: Vec<(Tensor<R>, Option<Tensor<R>>)>,
        preprocessing: Option<Normalize>,
    ) -> Result<Self> {
        Self::vgg_with_pooling(arch, weights, preprocessing, Pooling::Max)
    }

    /// [`vgg`](Self::vgg) with a choice of pooling stage.
    pub fn vgg_with_pooling(
        arch: VggArch,
        weights: Vec<(Tensor<R>, Option<Tensor<R>>)>,
        preprocessing: Option<Normalize>,
        pooling: Pooling,
    ) -> Result<Self> {
        if arch.batch_norm() {
            return Err(Error::config(format!(
                "{arch} is not supported, batch-norm layers must be folded into the convolutions"
            )));
        }
        if weights.len() != arch.num_convs() {
            return Err(Error::config(format!(
                "{arch} has {} convolutions, got {} weight tensors",
                arch.num_convs(),
                weights.len()
            )));
        }

        let names = arch.layer_names(preprocessing.is_some());
        let mut names = names.into_iter();
        let mut next_name = || {
            names
                .next()
                .ok_or_else(|| Error::config(format!("{arch} layer names exhausted")))
        };

        let mut extractor = SequentialExtractor::new();
        if let Some(norm) = preprocessing {
            extractor.push(next_name()?, norm.into())?;
        }

        let mut weights = weights.into_iter();
        for stage in arch.stages() {
            match stage {
                Stage::Conv(channels) => {
                    let (weight, bias) = weights
                        .next()
                        .ok_or_else(|| Error::config(format!("{arch}: missing conv weight")))?;
                    let conv = Conv2d::new(weight, bias, false)?;
                    if conv.out_channels() != *channels {
                        return Err(Error::config(format!(
                            "{arch}: expected {channels} output channels, got {}",
                            conv.out_channels()
                        )));
                    }
                    extractor.push(next_name()?, conv.into())?;
                    extractor.push(next_name()?, Activation::Relu.into())?;
                }
                Stage::Pool => {
                    let pool: Layer<R> = match pooling {
                        Pooling::Max => MaxPool2d::new(2)?.into(),
                        Pooling::Avg => AvgPool2d::new(2)?.into(),
                    };
                    extractor.push(next_name()?, pool)?;
                }
            }
        }
        Ok(extractor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::FeatureExtractor;
    use crate::test_utils::cpu_setup;
    use numr::autograd::Var;
    use numr::runtime::cpu::{CpuDevice, CpuRuntime};

    #[test]
    fn test_vgg19_layer_names() {
        let names = VggArch::Vgg19.layer_names(false);
        assert_eq!(
            &names[..5],
            &["conv1_1", "relu1_1", "conv1_2", "relu1_2", "pool1"]
        );
        assert!(names.contains(&"relu4_4".to_string()));
        assert_eq!(names.last().map(String::as_str), Some("pool5"));
        // 16 convs, 16 relus, 5 pools
        assert_eq!(names.len(), 37);
    }

    #[test]
    fn test_batch_norm_names_and_preprocessing() {
        let names = VggArch::Vgg11Bn.layer_names(true);
        assert_eq!(
            &names[..5],
            &["preprocessing", "conv1_1", "bn1_1", "relu1_1", "pool1"]
        );
    }

    #[test]
    fn test_normalize_layer_name() {
        assert_eq!(normalize_layer_name("conv_1_1"), "conv1_1");
        assert_eq!(normalize_layer_name("pool_3"), "pool3");
        assert_eq!(normalize_layer_name("relu4_2"), "relu4_2");
        assert_eq!(normalize_layer_name("conv_12_1"), "conv_12_1");
        assert_eq!(normalize_layer_name("gram_1_1"), "gram_1_1");
    }

    #[test]
    fn test_num_convs() {
        assert_eq!(VggArch::Vgg11.num_convs(), 8);
        assert_eq!(VggArch::Vgg16.num_convs(), 13);
        assert_eq!(VggArch::Vgg19.num_convs(), 16);
    }

    #[test]
    fn test_vgg_rejects_bn_and_wrong_weight_count() {
        let err = SequentialExtractor::<CpuRuntime>::vgg(VggArch::Vgg19Bn, Vec::new(), None)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration { .. }));

        let err = SequentialExtractor::<CpuRuntime>::vgg(VggArch::Vgg11, Vec::new(), None)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_vgg11_assembles_named_stack() {
        let (_client, device) = cpu_setup();
        let mut in_channels = 3;
        let weights: Vec<_> = VggArch::Vgg11
            .conv_channels()
            .into_iter()
            .map(|out| {
                // 1x1 kernels keep the test cheap; shape rules are the same
                let w = Tensor::<CpuRuntime>::zeros(&[out, in_channels, 1, 1], DType::F32, &device);
                let b = Tensor::<CpuRuntime>::zeros(&[out], DType::F32, &device);
                in_channels = out;
                (w, Some(b))
            })
            .collect();
        let ex = SequentialExtractor::vgg(VggArch::Vgg11, weights, Some(Normalize::imagenet()))
            .unwrap();
        assert_eq!(ex.layer_names(), VggArch::Vgg11.layer_names(true).as_slice());
    }

    fn first_block_weights(
        device: &CpuDevice,
    ) -> Vec<(Tensor<CpuRuntime>, Option<Tensor<CpuRuntime>>)> {
        let mut in_channels = 3;
        VggArch::Vgg11
            .conv_channels()
            .into_iter()
            .map(|out| {
                let w = Tensor::<CpuRuntime>::ones(&[out, in_channels, 1, 1], DType::F32, device);
                in_channels = out;
                (w, None)
            })
            .collect()
    }

    #[test]
    fn test_vgg_pools_take_window_maximum() {
        let (client, device) = cpu_setup();
        let data: Vec<f32> = (0..3 * 4 * 4).map(|i| (i % 7) as f32 * 0.1).collect();
        let input = Var::new(
            Tensor::<CpuRuntime>::from_slice(&data, &[1, 3, 4, 4], &device),
            false,
        );
        let layers = vec!["relu1_1".to_string(), "pool1".to_string()];

        let max = SequentialExtractor::vgg(VggArch::Vgg11, first_block_weights(&device), None)
            .unwrap();
        let out = max.forward(&client, &input, &layers).unwrap();
        let relu: Vec<f32> = out["relu1_1"].tensor().to_vec();
        let pooled: Vec<f32> = out["pool1"].tensor().to_vec();
        // channel 0, top-left window of the 4x4 map
        let window = [relu[0], relu[1], relu[4], relu[5]];
        assert_eq!(pooled[0], window.iter().copied().fold(f32::MIN, f32::max));

        let avg = SequentialExtractor::vgg_with_pooling(
            VggArch::Vgg11,
            first_block_weights(&device),
            None,
            Pooling::Avg,
        )
        .unwrap();
        let pooled: Vec<f32> = avg.forward(&client, &input, &layers).unwrap()["pool1"]
            .tensor()
            .to_vec();
        assert!((pooled[0] - window.iter().sum::<f32>() / 4.0).abs() < 1e-5);
    }
}
