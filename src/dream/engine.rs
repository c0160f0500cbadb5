use std::time::Duration;

use candle_core::Device;
use image::RgbImage;
use tracing::{debug, info};

use crate::{
    compute::device::device_from_name,
    error::{DreamError, Result},
    image_ops::{
        fit::MIN_DIM,
        image_tensor::{array_to_rgb, array_to_tensor, resize_bilinear, rgb_to_array, tensor_to_array, ImageTensor},
        padding::{pad_image, unpad_image, PaddedImage},
    },
    model::{
        input_type::InputType,
        registry::{ModelRegistry, PREDICTIONS_LAYER},
        weights::WeightsSource,
    },
};

use super::{
    config::{EngineSettings, RenderConfig, STEPS_MAX, STEPS_MIN, TILE_SIZE_DEF},
    deep_dream::{DeepDream, DreamGradient, OptimizerSettings},
    loss::{DreamObjective, Reduction},
    progress::{DreamOutcome, ProgressReporter, ProgressSnapshot, StopFlag, PROGRESS_INTERVAL},
    tiled::TiledDeepDream,
};

/// Next multiple of `STEPS_MIN` not below `steps`.
pub fn round_steps(steps: usize) -> usize {
    steps.div_ceil(STEPS_MIN) * STEPS_MIN
}

/// The model, layer and optimizer installed by a successful `setup`.
pub struct ModelBinding {
    pub model: String,
    pub layer: String,
    pub neuron_range: (usize, usize),
    pub device: Device,
    input_type: InputType,
    dreamer: Box<dyn DreamGradient>,
}

impl ModelBinding {
    pub fn input_type(&self) -> InputType {
        self.input_type
    }

    pub fn tile_size(&self) -> Option<usize> {
        self.dreamer.tile_size()
    }

    fn to_rgb(&self, image: &ImageTensor) -> Result<RgbImage> {
        array_to_rgb(&self.input_type.postprocess(image))
    }
}

pub struct DreamEngine {
    registry: ModelRegistry,
    binding: Option<ModelBinding>,
    progress_interval: Duration,
}

impl DreamEngine {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            binding: None,
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    /// Minimum time between intermediate snapshots passed to the progress callback.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn binding(&self) -> Option<&ModelBinding> {
        self.binding.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.binding.is_some()
    }

    /// Builds the network truncated at the requested layer and installs it.
    ///
    /// Names and the neuron range are checked before any weights are touched. On error the
    /// previously installed binding is left in place.
    pub fn setup(&mut self, settings: &EngineSettings) -> Result<()> {
        let entry = self.registry.get(&settings.model)?;
        let layer = entry.layer(&settings.layer).ok_or_else(|| DreamError::UnknownLayer {
            model: entry.name.clone(),
            layer: settings.layer.clone(),
        })?;

        let (first, last) = settings.neuron_range();
        if first > last || last >= layer.width {
            return Err(DreamError::InvalidNeuronRange {
                layer: layer.name,
                first,
                last,
                width: layer.width,
            });
        }

        let device = device_from_name(&settings.device)?;
        info!(
            "setting up {} on {} at {} neurons {}..={}",
            entry.name, settings.device, layer.name, first, last
        );

        let vb = WeightsSource::resolve(&entry.name, settings.weights.as_deref()).var_builder(&device)?;
        let network = entry.build_network(vb, &device, &layer.name)?;
        let predictions = layer.name == PREDICTIONS_LAYER;
        let reduction = if predictions && first == last {
            Reduction::Sum
        } else {
            Reduction::L2
        };
        let objective = DreamObjective::new(network.output_width(), first, last, reduction, &device)?;
        let deep_dream = DeepDream::new(network, objective, entry.input_range, entry.lr_multiplier);

        let dreamer: Box<dyn DreamGradient> = if settings.tiled || predictions {
            let tile_size = if predictions { entry.input_size } else { TILE_SIZE_DEF };
            debug!("tiled rendering with {} pixel tiles", tile_size);
            Box::new(TiledDeepDream::new(deep_dream, tile_size))
        } else {
            Box::new(deep_dream)
        };

        self.binding = Some(ModelBinding {
            model: entry.name.clone(),
            layer: layer.name,
            neuron_range: (first, last),
            device,
            input_type: entry.input_type,
            dreamer,
        });
        Ok(())
    }

    /// Renders `image` with the installed model.
    ///
    /// The callback receives the input at 0.0, rate-limited snapshots while rendering and
    /// the result at 1.0. The stop flag is polled after every step batch.
    pub fn dream(
        &mut self,
        image: &RgbImage,
        progress: Option<&mut dyn FnMut(&ProgressSnapshot)>,
        stop: Option<&StopFlag>,
        config: &RenderConfig,
    ) -> Result<DreamOutcome> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DreamError::EmptyImage { width, height });
        }
        let config = config.clone().validate()?;
        let input_type = self.binding.as_ref().ok_or(DreamError::NotInitialized)?.input_type;

        let total_steps = round_steps(config.steps_per_octave) * config.octaves.len();
        let mut reporter = ProgressReporter::new(progress, total_steps).with_interval(self.progress_interval);
        reporter.report(0.0, image.clone(), None);

        if total_steps == 0 {
            reporter.report(1.0, image.clone(), None);
            return Ok(DreamOutcome::Completed(image.clone()));
        }

        info!("dreaming on {}x{} image, {} steps", width, height, total_steps);
        let original = input_type.preprocess(&rgb_to_array(image));
        match self.main_loop(&original, &config, &mut reporter, stop)? {
            Some(result) => {
                let result = self.image_tf_to_image_array(&result)?;
                if !reporter.has_reported(total_steps) {
                    reporter.report(1.0, result.clone(), Some(total_steps));
                }
                info!("dream complete");
                Ok(DreamOutcome::Completed(result))
            }
            None => {
                info!("dream halted");
                Ok(DreamOutcome::Halted)
            }
        }
    }

    /// Runs every octave over a preprocessed image; `None` when stopped.
    ///
    /// The result is resized back to the input shape.
    pub fn main_loop(
        &mut self,
        original: &ImageTensor,
        config: &RenderConfig,
        reporter: &mut ProgressReporter,
        stop: Option<&StopFlag>,
    ) -> Result<Option<ImageTensor>> {
        let tile_size = self.binding.as_ref().ok_or(DreamError::NotInitialized)?.tile_size();
        let (base_h, base_w, _) = original.dim();
        let steps = round_steps(config.steps_per_octave);
        let blend = config.octave_blending as f32;

        let mut octave_image = original.to_owned();
        for (octave_index, &octave) in config.octaves.iter().enumerate() {
            let factor = config.octave_scale.powi(octave);
            let new_h = ((base_h as f64 * factor) as usize).max(1);
            let new_w = ((base_w as f64 * factor) as usize).max(1);

            octave_image = resize_bilinear(&octave_image, new_h, new_w);
            if octave_index > 0 && blend > 0.0 {
                octave_image = octave_image * (1.0 - blend) + resize_bilinear(original, new_h, new_w) * blend;
            }

            let (padded, jitter_pixels) = match tile_size {
                Some(tile) => (pad_image(&octave_image, tile, 0), 0),
                None => (
                    pad_image(&octave_image, MIN_DIM as usize, config.jitter_pixels),
                    config.jitter_pixels,
                ),
            };
            debug!(
                "octave {} ({}) at {}x{}, padding {:?}, crop {:?}",
                octave_index, octave, new_h, new_w, padded.padding, padded.crop_size
            );

            let settings = OptimizerSettings {
                crop_size: (padded.crop_size.0, padded.crop_size.1),
                step_size: config.step_size,
                smoothing_factor: config.smoothing_factor,
                jitter_pixels,
            };
            match self.octave_loop(&padded, octave_index * steps, steps, &settings, (base_h, base_w), reporter, stop)? {
                Some(result) => octave_image = unpad_image(&result, &padded.padding),
                None => return Ok(None),
            }
        }

        Ok(Some(resize_bilinear(&octave_image, base_h, base_w)))
    }

    /// Optimizes one padded octave in batches of at most `STEPS_MAX` steps.
    ///
    /// `step_offset` is the number of steps run by earlier octaves; snapshots are unpadded
    /// and resized to `base_shape`.
    #[allow(clippy::too_many_arguments)]
    pub fn octave_loop(
        &mut self,
        padded: &PaddedImage,
        step_offset: usize,
        steps: usize,
        settings: &OptimizerSettings,
        base_shape: (usize, usize),
        reporter: &mut ProgressReporter,
        stop: Option<&StopFlag>,
    ) -> Result<Option<ImageTensor>> {
        let binding = self.binding.as_mut().ok_or(DreamError::NotInitialized)?;
        let image = array_to_tensor(&padded.image, &binding.device)?;
        binding.dreamer.start_optimizer(&image, settings)?;

        let mut step = 0;
        while step < steps {
            let batch = STEPS_MAX.min(steps - step);
            binding.dreamer.run_steps(batch)?;
            step += batch;
            debug!("step {} of {}", step_offset + step, reporter.total_steps());

            if reporter.is_due() {
                let binding = &*binding;
                reporter.report_step(step_offset + step, || {
                    let current = tensor_to_array(&binding.dreamer.current_result()?)?;
                    let current = unpad_image(&current, &padded.padding);
                    binding.to_rgb(&resize_bilinear(&current, base_shape.0, base_shape.1))
                })?;
            }

            if stop.is_some_and(StopFlag::is_stopped) {
                return Ok(None);
            }
        }

        Ok(Some(tensor_to_array(&binding.dreamer.current_result()?)?))
    }

    /// Network-space image back to RGB pixels, clipped to [0, 255].
    pub fn image_tf_to_image_array(&self, image: &ImageTensor) -> Result<RgbImage> {
        self.binding.as_ref().ok_or(DreamError::NotInitialized)?.to_rgb(image)
    }
}

impl Default for DreamEngine {
    fn default() -> Self {
        Self::new(ModelRegistry::with_defaults())
    }
}
