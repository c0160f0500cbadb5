use candle_core::{Device, Result, Tensor};

use crate::{layer::activations::ActivationContext, model::network::SequentialNet};

const GRADIENT_EPS: f64 = 1e-8;
const GRADIENT_CLIP: f32 = 3.0;
// Keeps the norm differentiable when every selected activation is zero
const NORM_EPS: f64 = 1e-12;

/// 1.0 on `first..=last`, 0.0 elsewhere.
pub fn range_hot(size: usize, first: usize, last: usize) -> Vec<f32> {
    (0..size)
        .map(|i| if (first..=last).contains(&i) { 1.0 } else { 0.0 })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    L2,
}

/// Activation objective over a masked neuron range, minus a smoothness penalty.
pub struct DreamObjective {
    mask: Tensor,
    mask_size: usize,
    reduction: Reduction,
}

impl DreamObjective {
    pub fn new(width: usize, first: usize, last: usize, reduction: Reduction, device: &Device) -> Result<Self> {
        let mask = range_hot(width, first, last);
        let mask_size = mask.iter().filter(|&&m| m > 0.0).count();
        Ok(Self {
            mask: Tensor::from_vec(mask, width, device)?,
            mask_size,
            reduction,
        })
    }

    pub fn mask_size(&self) -> usize {
        self.mask_size
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    fn mask_for(&self, rank: usize) -> Result<Tensor> {
        let width = self.mask.dim(0)?;
        match rank {
            4 => self.mask.reshape((1, width, 1, 1)),
            _ => self.mask.reshape((1, width)),
        }
    }

    /// Value to minimize for an (h, w, 3) image.
    pub fn loss(&self, network: &SequentialNet, image: &Tensor, smoothing: f64, step: usize) -> Result<Tensor> {
        let batch = image.permute((2, 0, 1))?.unsqueeze(0)?.contiguous()?;
        let activations = network.forward(&batch, &ActivationContext::new(step))?;
        let masked = activations.broadcast_mul(&self.mask_for(activations.rank())?)?;

        let objective = match self.reduction {
            Reduction::Sum => masked.sum_all()?,
            Reduction::L2 => (masked.sqr()?.sum_all()? + NORM_EPS)?.sqrt()?,
        };
        let objective = objective.affine(1.0 / self.mask_size.max(1) as f64, 0.0)?;
        let penalty = total_variation(image)?.affine(smoothing, 0.0)?;

        objective.sub(&penalty)?.neg()
    }
}

/// Sum of absolute differences between neighbouring pixels of an (h, w, c) image.
pub fn total_variation(image: &Tensor) -> Result<Tensor> {
    let (h, w, _) = image.dims3()?;
    let dy = image.narrow(0, 1, h - 1)?.sub(&image.narrow(0, 0, h - 1)?)?;
    let dx = image.narrow(1, 1, w - 1)?.sub(&image.narrow(1, 0, w - 1)?)?;
    dy.abs()?.sum_all()?.add(&dx.abs()?.sum_all()?)
}

/// Divides by the population standard deviation and clips to [-3, 3].
pub fn normalize_gradient(gradient: &Tensor) -> Result<Tensor> {
    let mean = gradient.mean_all()?;
    let variance = gradient.broadcast_sub(&mean)?.sqr()?.mean_all()?;
    let std = variance.sqrt()?.to_scalar::<f32>()? as f64;
    gradient
        .affine(1.0 / (std + GRADIENT_EPS), 0.0)?
        .clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}
