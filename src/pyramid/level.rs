//! A single pyramid level

use crate::image::{Edge, edge_to_image_size};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target resolution of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelSize {
    /// Scale so that `edge` has length `size`, keeping the aspect ratio.
    Edge { size: usize, edge: Edge },
    /// Fixed `height x width`.
    Exact { height: usize, width: usize },
}

impl LevelSize {
    /// Resolution this level gives an image of size `height x width`.
    pub fn image_size(&self, height: usize, width: usize) -> (usize, usize) {
        match *self {
            LevelSize::Edge { size, edge } => edge_to_image_size(size, height, width, edge),
            LevelSize::Exact { height, width } => (height, width),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match *self {
            LevelSize::Edge { size, .. } => size == 0,
            LevelSize::Exact { height, width } => height == 0 || width == 0,
        }
    }
}

/// Resolution, step budget and weight overrides of one level.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidLevel {
    pub size: LevelSize,
    pub num_steps: usize,
    /// Convergence tolerance for this level; falls back to the run config.
    pub tolerance: Option<f64>,
    /// Operation weights that apply only while this level runs.
    pub weight_overrides: BTreeMap<String, f64>,
}

impl PyramidLevel {
    pub fn new(size: LevelSize, num_steps: usize) -> Self {
        Self {
            size,
            num_steps,
            tolerance: None,
            weight_overrides: BTreeMap::new(),
        }
    }

    pub fn edge(size: usize, num_steps: usize, edge: Edge) -> Self {
        Self::new(LevelSize::Edge { size, edge }, num_steps)
    }

    pub fn exact(height: usize, width: usize, num_steps: usize) -> Self {
        Self::new(LevelSize::Exact { height, width }, num_steps)
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn with_weight(mut self, name: impl Into<String>, weight: f64) -> Self {
        self.weight_overrides.insert(name.into(), weight);
        self
    }

    /// Step indices of this level, `1..=num_steps`.
    pub fn steps(&self) -> std::ops::RangeInclusive<usize> {
        1..=self.num_steps
    }

    pub fn image_size(&self, height: usize, width: usize) -> (usize, usize) {
        self.size.image_size(height, width)
    }
}
