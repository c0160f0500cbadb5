use candle_core::{backprop::GradStore, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use crate::{
    error::{DreamError, Result},
    model::network::SequentialNet,
};

use super::loss::{normalize_gradient, DreamObjective};

const ADAM_BETA1: f64 = 0.99;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 0.1;

/// Per-octave optimizer parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OptimizerSettings {
    /// (height, width) of the region the network sees each step
    pub crop_size: (usize, usize),
    pub step_size: f64,
    pub smoothing_factor: f64,
    pub jitter_pixels: usize,
}

/// Gradient ascent on an (h, w, 3) network-space image.
pub trait DreamGradient: Send {
    fn start_optimizer(&mut self, image: &Tensor, settings: &OptimizerSettings) -> Result<()>;
    fn run_steps(&mut self, steps: usize) -> Result<()>;
    fn current_result(&self) -> Result<Tensor>;

    /// Tile edge when the image is processed in tiles.
    fn tile_size(&self) -> Option<usize> {
        None
    }
}

pub(crate) struct OptimizerState {
    pub image: Var,
    optimizer: AdamW,
    pub crop_size: (usize, usize),
    pub smoothing: f64,
    jitter_pixels: usize,
    pub relu_step: usize,
}

pub struct DeepDream {
    pub(crate) network: SequentialNet,
    pub(crate) objective: DreamObjective,
    input_range: (f32, f32),
    lr_multiplier: f64,
    pub(crate) state: Option<OptimizerState>,
    pub(crate) rng: StdRng,
}

impl DeepDream {
    pub fn new(network: SequentialNet, objective: DreamObjective, input_range: (f32, f32), lr_multiplier: f64) -> Self {
        Self {
            network,
            objective,
            input_range,
            lr_multiplier,
            state: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn input_range(&self) -> (f32, f32) {
        self.input_range
    }

    /// Resets Adam and the rectifier step; `smoothing_area` normalizes the smoothing weight.
    pub(crate) fn start_with_area(
        &mut self,
        image: &Tensor,
        settings: &OptimizerSettings,
        smoothing_area: usize,
    ) -> Result<()> {
        let (h, w, c) = image.dims3()?;
        let (crop_h, crop_w) = settings.crop_size;
        if c != 3 || crop_h == 0 || crop_w == 0 || crop_h > h || crop_w > w {
            return Err(DreamError::InvalidArgument(format!(
                "crop {}x{} does not fit a {}x{}x{} image",
                crop_h, crop_w, h, w, c
            )));
        }

        let image = Var::from_tensor(&image.detach())?;
        let lr = settings.step_size * self.lr_multiplier;
        let params = ParamsAdamW {
            lr,
            beta1: ADAM_BETA1,
            beta2: ADAM_BETA2,
            eps: ADAM_EPS,
            weight_decay: 0.0,
        };
        let optimizer = AdamW::new(vec![image.clone()], params)?;
        debug!(
            "optimizer started on {}x{} image, crop {}x{}, lr {}",
            h,
            w,
            crop_h,
            crop_w,
            lr
        );

        self.state = Some(OptimizerState {
            image,
            optimizer,
            crop_size: settings.crop_size,
            smoothing: settings.smoothing_factor / smoothing_area.max(1) as f64,
            jitter_pixels: settings.jitter_pixels,
            relu_step: 0,
        });
        Ok(())
    }

    /// Feeds an already normalized gradient of the whole image to Adam and clamps the result.
    pub(crate) fn apply_gradient(&mut self, mut grads: GradStore, gradient: Tensor) -> Result<()> {
        let (lo, hi) = self.input_range;
        let state = self.state.as_mut().ok_or(DreamError::NotInitialized)?;
        let image = state.image.as_tensor();
        grads.insert(image, gradient);
        state.optimizer.step(&grads)?;
        let clamped = image.clamp(lo, hi)?;
        state.image.set(&clamped)?;
        state.relu_step += 1;
        Ok(())
    }

    fn gradient_step(&mut self) -> Result<()> {
        let Self {
            network,
            objective,
            state,
            rng,
            ..
        } = self;
        let state = state.as_ref().ok_or(DreamError::NotInitialized)?;
        let image = state.image.as_tensor();

        let input = if state.jitter_pixels > 0 {
            random_crop(image, state.crop_size, rng)?
        } else {
            image.clone()
        };
        let loss = objective.loss(network, &input, state.smoothing, state.relu_step)?;
        let mut grads = loss.backward()?;
        let gradient = grads
            .remove(image)
            .ok_or_else(|| DreamError::InvalidArgument("loss does not depend on the image".to_string()))?;
        let gradient = normalize_gradient(&gradient)?;

        self.apply_gradient(grads, gradient)
    }
}

impl DreamGradient for DeepDream {
    fn start_optimizer(&mut self, image: &Tensor, settings: &OptimizerSettings) -> Result<()> {
        let (crop_h, crop_w) = settings.crop_size;
        self.start_with_area(image, settings, crop_h * crop_w)
    }

    fn run_steps(&mut self, steps: usize) -> Result<()> {
        for _ in 0..steps {
            self.gradient_step()?;
        }
        Ok(())
    }

    fn current_result(&self) -> Result<Tensor> {
        let state = self.state.as_ref().ok_or(DreamError::NotInitialized)?;
        Ok(state.image.as_tensor().copy()?)
    }
}

/// Random `crop_size` window of an (h, w, c) tensor.
pub(crate) fn random_crop<R: Rng + ?Sized>(image: &Tensor, crop_size: (usize, usize), rng: &mut R) -> Result<Tensor> {
    let (h, w, _) = image.dims3()?;
    let (crop_h, crop_w) = crop_size;
    let y = rng.gen_range(0..=h - crop_h);
    let x = rng.gen_range(0..=w - crop_w);
    Ok(image.narrow(0, y, crop_h)?.narrow(1, x, crop_w)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use candle_core::Device;
    use crate::{
        dream::loss::Reduction,
        layer::{
            activations::{ActivationLayer, ActivationType},
            layer::Layer,
        },
        model::network::NetworkBuilder,
    };

    pub(crate) fn relu_net() -> SequentialNet {
        let mut builder = NetworkBuilder::new("relu");
        builder
            .stage("relu", 3, || {
                Ok(Box::new(ActivationLayer::new(ActivationType::ReLU)) as Box<dyn Layer>)
            })
            .unwrap();
        builder.finish().unwrap()
    }

    fn dreamer() -> DeepDream {
        let objective = DreamObjective::new(3, 0, 2, Reduction::L2, &Device::Cpu).unwrap();
        DeepDream::new(relu_net(), objective, (-1.0, 1.0), 1.0).with_seed(7)
    }

    fn image(h: usize, w: usize) -> Tensor {
        Tensor::rand(-0.5f32, 0.5, (h, w, 3), &Device::Cpu).unwrap()
    }

    fn settings(crop_size: (usize, usize), jitter_pixels: usize) -> OptimizerSettings {
        OptimizerSettings {
            crop_size,
            step_size: 0.05,
            smoothing_factor: 0.0,
            jitter_pixels,
        }
    }

    #[test]
    fn zero_steps_leave_image_unchanged() {
        let mut dream = dreamer();
        let input = image(8, 8);
        dream.start_optimizer(&input, &settings((8, 8), 0)).unwrap();
        dream.run_steps(0).unwrap();
        let output = dream.current_result().unwrap();
        let diff = (output - &input).unwrap().abs().unwrap().max_all().unwrap();
        assert_eq!(diff.to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn steps_increase_activation_and_respect_range() {
        let mut dream = dreamer();
        let input = image(12, 12);
        dream.start_optimizer(&input, &settings((8, 8), 4)).unwrap();
        dream.run_steps(10).unwrap();
        let output = dream.current_result().unwrap();
        assert_eq!(output.dims(), &[12, 12, 3]);

        let before = input.relu().unwrap().sqr().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        let after = output.relu().unwrap().sqr().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(after > before);

        let values = output.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn running_without_start_is_an_error() {
        let mut dream = dreamer();
        assert!(matches!(dream.run_steps(1), Err(DreamError::NotInitialized)));
    }

    #[test]
    fn crop_larger_than_image_is_rejected() {
        let mut dream = dreamer();
        let result = dream.start_optimizer(&image(4, 4), &settings((8, 8), 0));
        assert!(matches!(result, Err(DreamError::InvalidArgument(_))));
    }

    #[test]
    fn random_crop_stays_inside() {
        let mut rng = StdRng::seed_from_u64(1);
        let input = image(10, 6);
        for _ in 0..20 {
            let crop = random_crop(&input, (7, 6), &mut rng).unwrap();
            assert_eq!(crop.dims(), &[7, 6, 3]);
        }
    }
}
