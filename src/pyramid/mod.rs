//! Coarse-to-fine level schedules.

pub mod level;

pub use level::{LevelSize, PyramidLevel};

use crate::error::{Error, Result};
use crate::image::Edge;

/// Step budget per level.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum StepSchedule {
    /// Same number of steps on every level.
    Uniform(usize),
    /// One entry per level.
    PerLevel(Vec<usize>),
}

impl From<usize> for StepSchedule {
    fn from(steps: usize) -> Self {
        StepSchedule::Uniform(steps)
    }
}

impl From<Vec<usize>> for StepSchedule {
    fn from(steps: Vec<usize>) -> Self {
        StepSchedule::PerLevel(steps)
    }
}

impl StepSchedule {
    fn expand(&self, num_levels: usize) -> Result<Vec<usize>> {
        match self {
            StepSchedule::Uniform(steps) => Ok(vec![*steps; num_levels]),
            StepSchedule::PerLevel(steps) if steps.len() == num_levels => Ok(steps.clone()),
            StepSchedule::PerLevel(steps) => Err(Error::config(format!(
                "got {} step counts for {num_levels} pyramid levels",
                steps.len()
            ))),
        }
    }
}

/// Ordered levels, coarsest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePyramid {
    levels: Vec<PyramidLevel>,
}

impl ImagePyramid {
    /// One level per edge size.
    pub fn new(
        edge_sizes: &[usize],
        num_steps: impl Into<StepSchedule>,
        edge: Edge,
    ) -> Result<Self> {
        let steps = num_steps.into().expand(edge_sizes.len())?;
        let levels = edge_sizes
            .iter()
            .zip(steps)
            .map(|(&size, steps)| PyramidLevel::edge(size, steps, edge))
            .collect();
        Self::from_levels(levels)
    }

    pub fn from_levels(levels: Vec<PyramidLevel>) -> Result<Self> {
        if levels.is_empty() {
            return Err(Error::config("an image pyramid needs at least one level"));
        }
        for (i, level) in levels.iter().enumerate() {
            if level.size.is_empty() {
                return Err(Error::config(format!("pyramid level {i} has an empty size")));
            }
            if level.num_steps == 0 {
                return Err(Error::config(format!("pyramid level {i} has no steps")));
            }
        }
        Ok(Self { levels })
    }

    /// Levels whose edge sizes double from `min_edge_size` up to `max_edge_size`.
    ///
    /// Without `num_levels`, as many levels as fit, i.e.
    /// `floor(log2(max / min)) + 1`. Level `i` has edge size
    /// `round(max / 2^(num_levels - 1 - i))`.
    pub fn octave(
        max_edge_size: usize,
        num_steps: impl Into<StepSchedule>,
        num_levels: Option<usize>,
        min_edge_size: usize,
        edge: Edge,
    ) -> Result<Self> {
        if min_edge_size == 0 || min_edge_size > max_edge_size {
            return Err(Error::config(format!(
                "octave pyramid needs 0 < min_edge_size <= max_edge_size, got {min_edge_size} and {max_edge_size}"
            )));
        }
        let num_levels = num_levels.unwrap_or_else(|| {
            (max_edge_size as f64 / min_edge_size as f64).log2().floor() as usize + 1
        });
        let edge_sizes: Vec<usize> = (0..num_levels)
            .map(|level| {
                let octaves = (num_levels - 1 - level) as i32;
                (max_edge_size as f64 / 2f64.powi(octaves)).round() as usize
            })
            .collect();
        Self::new(&edge_sizes, num_steps, edge)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PyramidLevel> {
        self.levels.get(index)
    }

    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PyramidLevel> {
        self.levels.iter()
    }
}

impl<'a> IntoIterator for &'a ImagePyramid {
    type Item = &'a PyramidLevel;
    type IntoIter = std::slice::Iter<'a, PyramidLevel>;

    fn into_iter(self) -> Self::IntoIter {
        self.levels.iter()
    }
}
