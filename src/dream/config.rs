use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{DreamError, Result},
    model::registry::PREDICTIONS_LAYER,
};

pub const STEPS_MIN: usize = 10;
pub const STEPS_MAX: usize = 20;
pub const STEPS_DEF: usize = 40;
pub const STEP_SIZE_DEF: f64 = 0.025;
pub const SMOOTHING_DEF: f64 = 100.0;
pub const JITTER_DEF: usize = 4;
// Log2 of the scale factor between consecutive octaves
pub const OCTAVE_SCALING_DEF: f64 = 1.0 / 3.0;
pub const OCTAVES_BLENDING_DEF: f64 = 0.2;
pub const TILE_SIZE_DEF: usize = 512;
pub const IMAGENET_CLASSES: usize = 1000;

/// Parameters of one render, fixed for its whole duration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Octave indices in processing order, the image is scaled by `octave_scale^index`
    pub octaves: Vec<i32>,
    pub octave_scale: f64,
    pub octave_blending: f64,
    pub steps_per_octave: usize,
    pub step_size: f64,
    /// Weight of the total variation penalty subtracted from the activation objective
    pub smoothing_factor: f64,
    pub jitter_pixels: usize,
}

impl RenderConfig {
    pub fn validate(self) -> Result<Self> {
        if self.octaves.is_empty() {
            return Err(DreamError::InvalidConfig("at least one octave is required".to_string()));
        }
        if !(self.octave_scale.is_finite() && self.octave_scale > 0.0) {
            return Err(DreamError::InvalidConfig(format!(
                "octave scale must be positive, got {}",
                self.octave_scale
            )));
        }
        if !(0.0..=1.0).contains(&self.octave_blending) {
            return Err(DreamError::InvalidConfig(format!(
                "octave blending must be within [0, 1], got {}",
                self.octave_blending
            )));
        }
        if !(self.step_size.is_finite() && self.step_size >= 0.0) {
            return Err(DreamError::InvalidConfig(format!(
                "step size must be non-negative, got {}",
                self.step_size
            )));
        }
        if !self.smoothing_factor.is_finite() {
            return Err(DreamError::InvalidConfig("smoothing factor must be finite".to_string()));
        }
        Ok(self)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str::<Self>(json)?.validate()
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            octaves: (-2..=2).collect(),
            octave_scale: 2f64.powf(OCTAVE_SCALING_DEF),
            octave_blending: OCTAVES_BLENDING_DEF,
            steps_per_octave: STEPS_DEF,
            step_size: STEP_SIZE_DEF,
            smoothing_factor: SMOOTHING_DEF,
            jitter_pixels: JITTER_DEF,
        }
    }
}

/// Render parameters as presented to a user.
///
/// Octaves are zoom levels, so `from` / `to` are the negated engine indices, scaling is
/// on a log2 scale and blending is a percentage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserRenderSettings {
    pub octaves_from: i32,
    pub octaves_to: i32,
    pub octaves_scaling: f64,
    pub octaves_blending_percent: f64,
    pub steps_per_octave: usize,
    pub step_size: f64,
    pub smoothing: f64,
    pub jitter_pixels: usize,
}

impl Default for UserRenderSettings {
    fn default() -> Self {
        Self {
            octaves_from: -2,
            octaves_to: 2,
            octaves_scaling: OCTAVE_SCALING_DEF,
            octaves_blending_percent: OCTAVES_BLENDING_DEF * 100.0,
            steps_per_octave: STEPS_DEF,
            step_size: STEP_SIZE_DEF,
            smoothing: SMOOTHING_DEF,
            jitter_pixels: JITTER_DEF,
        }
    }
}

impl UserRenderSettings {
    pub fn to_render_config(&self) -> Result<RenderConfig> {
        RenderConfig {
            octaves: (-self.octaves_to..=-self.octaves_from).collect(),
            octave_scale: 2f64.powf(self.octaves_scaling),
            octave_blending: self.octaves_blending_percent / 100.0,
            steps_per_octave: self.steps_per_octave,
            step_size: self.step_size,
            smoothing_factor: self.smoothing,
            jitter_pixels: self.jitter_pixels,
        }
        .validate()
    }
}

/// Model selection for `DreamEngine::setup`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    pub device: String,
    pub model: String,
    pub layer: String,
    #[serde(default)]
    pub neuron_first: usize,
    #[serde(default)]
    pub neuron_last: usize,
    /// On the predictions layer: a single class, or every class when unset
    #[serde(default)]
    pub imagenet_label: Option<usize>,
    #[serde(default)]
    pub tiled: bool,
    /// Safetensors file overriding the resources directory lookup
    #[serde(default)]
    pub weights: Option<PathBuf>,
}

impl EngineSettings {
    /// Inclusive neuron range, honouring the label selection on the predictions layer.
    pub fn neuron_range(&self) -> (usize, usize) {
        if self.layer == PREDICTIONS_LAYER {
            match self.imagenet_label {
                Some(label) => (label, label),
                None => (0, IMAGENET_CLASSES - 1),
            }
        } else {
            (self.neuron_first, self.neuron_last)
        }
    }
}
