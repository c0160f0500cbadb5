use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::model::weights::{frozen, CONV_INIT};

use super::{activations::ActivationContext, layer::{take_strided, Layer}};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvPadding {
    Valid,
    // Zero padding as computed by "same" convolutions, extra pixel goes after
    Same,
    // Zero padding applied before strided EfficientNet convolutions, extra pixel goes before
    Correct,
    Explicit(usize),
}

impl ConvPadding {
    /// (before, after) padding of an axis of length `len`.
    pub fn amounts(&self, len: usize, kernel: usize, stride: usize) -> (usize, usize) {
        match *self {
            ConvPadding::Valid => (0, 0),
            ConvPadding::Same => {
                let out = (len + stride - 1) / stride;
                let total = ((out.max(1) - 1) * stride + kernel).saturating_sub(len);
                (total / 2, total - total / 2)
            }
            ConvPadding::Correct => {
                let adjust = 1 - len % 2;
                ((kernel / 2).saturating_sub(adjust), kernel / 2)
            }
            ConvPadding::Explicit(p) => (p, p),
        }
    }
}

pub fn pad2d(xs: &Tensor, (top, bottom): (usize, usize), (left, right): (usize, usize)) -> Result<Tensor> {
    let mut xs = xs.clone();
    if top + bottom > 0 {
        xs = xs.pad_with_zeros(2, top, bottom)?;
    }
    if left + right > 0 {
        xs = xs.pad_with_zeros(3, left, right)?;
    }
    Ok(xs)
}

// Strided spatial subsampling of an NCHW batch
pub fn subsample(xs: &Tensor, stride: usize) -> Result<Tensor> {
    if stride == 1 {
        return Ok(xs.clone());
    }
    let (_, _, h, w) = xs.dims4()?;
    let xs = take_strided(xs, 2, 0, (h - 1) / stride + 1, stride)?;
    take_strided(&xs, 3, 0, (w - 1) / stride + 1, stride)
}

/// 2-D convolution with frozen weights.
///
/// Strides are applied by subsampling a stride-1 result, the conv backward pass in
/// candle assumes the same output padding on both spatial axes.
pub struct Conv2DLayer {
    pub in_features: usize,
    pub out_features: usize,
    pub kernel: (usize, usize),
    pub stride: usize,
    pub padding: ConvPadding,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Conv2DLayer {
    pub fn new(vb: VarBuilder, in_features: usize, out_features: usize, kernel: usize) -> Result<Self> {
        Self::new_with(vb, in_features, out_features, (kernel, kernel), 1, ConvPadding::Same, false)
    }

    pub fn new_with(
        vb: VarBuilder,
        in_features: usize,
        out_features: usize,
        kernel: (usize, usize),
        stride: usize,
        padding: ConvPadding,
        bias: bool,
    ) -> Result<Self> {
        let weight = frozen(&vb, (out_features, in_features, kernel.0, kernel.1), "weight", CONV_INIT)?;
        let bias = if bias {
            Some(frozen(&vb, out_features, "bias", Init::Const(0.))?.reshape((1, out_features, 1, 1))?)
        } else {
            None
        };

        Ok(Self {
            in_features,
            out_features,
            kernel,
            stride,
            padding,
            weight,
            bias,
        })
    }
}

impl Layer for Conv2DLayer {
    fn forward(&self, xs: &Tensor, _ctx: &ActivationContext) -> Result<Tensor> {
        let (_, _, h, w) = xs.dims4()?;
        let xs = pad2d(
            xs,
            self.padding.amounts(h, self.kernel.0, self.stride),
            self.padding.amounts(w, self.kernel.1, self.stride),
        )?;

        let ys = if self.kernel == (1, 1) {
            subsample(&xs, self.stride)?.conv2d(&self.weight, 0, 1, 1, 1)?
        } else {
            subsample(&xs.conv2d(&self.weight, 0, 1, 1, 1)?, self.stride)?
        };

        match &self.bias {
            Some(bias) => ys.broadcast_add(bias),
            None => Ok(ys),
        }
    }

    fn name(&self) -> String {
        "Conv2D".to_string()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!(
            "{}->{} kernel={}x{} stride={} padding={:?}",
            self.in_features, self.out_features, self.kernel.0, self.kernel.1, self.stride, self.padding
        ))
    }

    fn out_features(&self) -> usize {
        self.out_features
    }
}

/// Per-channel convolution, evaluated as a weighted sum of shifted views.
pub struct DepthwiseConv2DLayer {
    pub features: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: ConvPadding,
    taps: Vec<Tensor>,
}

impl DepthwiseConv2DLayer {
    pub fn new(vb: VarBuilder, features: usize, kernel: usize, stride: usize, padding: ConvPadding) -> Result<Self> {
        let weight = frozen(&vb, (features, 1, kernel, kernel), "weight", CONV_INIT)?;

        let mut taps = Vec::with_capacity(kernel * kernel);
        for dy in 0..kernel {
            for dx in 0..kernel {
                taps.push(
                    weight
                        .narrow(2, dy, 1)?
                        .narrow(3, dx, 1)?
                        .reshape((1, features, 1, 1))?,
                );
            }
        }

        Ok(Self {
            features,
            kernel,
            stride,
            padding,
            taps,
        })
    }
}

impl Layer for DepthwiseConv2DLayer {
    fn forward(&self, xs: &Tensor, _ctx: &ActivationContext) -> Result<Tensor> {
        let (_, _, h, w) = xs.dims4()?;
        let xs = pad2d(
            xs,
            self.padding.amounts(h, self.kernel, self.stride),
            self.padding.amounts(w, self.kernel, self.stride),
        )?;
        let (_, _, hp, wp) = xs.dims4()?;
        let (out_h, out_w) = (hp + 1 - self.kernel, wp + 1 - self.kernel);

        let mut acc: Option<Tensor> = None;
        for dy in 0..self.kernel {
            for dx in 0..self.kernel {
                let view = xs.narrow(2, dy, out_h)?.narrow(3, dx, out_w)?;
                let term = view.broadcast_mul(&self.taps[dy * self.kernel + dx])?;
                acc = Some(match acc {
                    Some(sum) => sum.add(&term)?,
                    None => term,
                });
            }
        }

        match acc {
            Some(ys) => subsample(&ys, self.stride),
            None => Ok(xs),
        }
    }

    fn name(&self) -> String {
        "DepthwiseConv2D".to_string()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!(
            "{} kernel={} stride={} padding={:?}",
            self.features, self.kernel, self.stride, self.padding
        ))
    }
}

/// Inference-mode batch norm folded into a per-channel scale and shift.
pub struct BatchNormLayer {
    pub features: usize,
    scale: Tensor,
    shift: Tensor,
}

impl BatchNormLayer {
    pub fn new(vb: VarBuilder, features: usize, eps: f64) -> Result<Self> {
        let weight = frozen(&vb, features, "weight", Init::Const(1.))?;
        let bias = frozen(&vb, features, "bias", Init::Const(0.))?;
        let mean = frozen(&vb, features, "running_mean", Init::Const(0.))?;
        let var = frozen(&vb, features, "running_var", Init::Const(1.))?;

        let scale = weight.div(&(var + eps)?.sqrt()?)?;
        let shift = bias.sub(&mean.mul(&scale)?)?;

        Ok(Self {
            features,
            scale: scale.reshape((1, features, 1, 1))?,
            shift: shift.reshape((1, features, 1, 1))?,
        })
    }
}

impl Layer for BatchNormLayer {
    fn forward(&self, xs: &Tensor, _ctx: &ActivationContext) -> Result<Tensor> {
        xs.broadcast_mul(&self.scale)?.broadcast_add(&self.shift)
    }

    fn name(&self) -> String {
        "BatchNorm".to_string()
    }

    fn out_features(&self) -> usize {
        self.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Var};
    use candle_nn::VarMap;

    #[test]
    fn same_padding_matches_keras() {
        assert_eq!(ConvPadding::Same.amounts(10, 3, 1), (1, 1));
        assert_eq!(ConvPadding::Same.amounts(10, 3, 2), (0, 1));
        assert_eq!(ConvPadding::Same.amounts(11, 3, 2), (1, 1));
        assert_eq!(ConvPadding::Same.amounts(10, 7, 1), (3, 3));
        assert_eq!(ConvPadding::Correct.amounts(10, 3, 2), (0, 1));
        assert_eq!(ConvPadding::Correct.amounts(11, 5, 2), (2, 2));
    }

    #[test]
    fn strided_conv_output_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let conv = Conv2DLayer::new_with(vb, 3, 8, (3, 3), 2, ConvPadding::Valid, true).unwrap();
        let xs = Tensor::zeros((1, 3, 17, 20), DType::F32, &Device::Cpu).unwrap();
        let ys = conv.forward(&xs, &ActivationContext::default()).unwrap();
        assert_eq!(ys.dims(), &[1, 8, 8, 9]);
    }

    #[test]
    fn strided_conv_backward_on_mixed_parity_input() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let conv = Conv2DLayer::new_with(vb, 3, 4, (3, 3), 2, ConvPadding::Same, false).unwrap();
        let xs = Var::rand(0f32, 1., (1, 3, 12, 13), &Device::Cpu).unwrap();
        let ys = conv.forward(xs.as_tensor(), &ActivationContext::default()).unwrap();
        assert_eq!(ys.dims(), &[1, 4, 6, 7]);
        let grads = ys.sum_all().unwrap().backward().unwrap();
        assert_eq!(grads.get(xs.as_tensor()).unwrap().dims(), &[1, 3, 12, 13]);
    }

    #[test]
    fn depthwise_identity_kernel() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let conv = DepthwiseConv2DLayer::new(vb, 2, 3, 1, ConvPadding::Same).unwrap();
        // Replace the random kernel with a centre tap
        let mut taps = vec![Tensor::zeros((1, 2, 1, 1), DType::F32, &Device::Cpu).unwrap(); 9];
        taps[4] = Tensor::ones((1, 2, 1, 1), DType::F32, &Device::Cpu).unwrap();
        let conv = DepthwiseConv2DLayer { taps, ..conv };

        let xs = Tensor::rand(0f32, 1., (1, 2, 5, 6), &Device::Cpu).unwrap();
        let ys = conv.forward(&xs, &ActivationContext::default()).unwrap();
        let diff = ys.sub(&xs).unwrap().abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(diff < 1e-6);
    }

    #[test]
    fn fresh_batch_norm_is_near_identity() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let bn = BatchNormLayer::new(vb, 3, 1e-3).unwrap();
        let xs = Tensor::ones((1, 3, 2, 2), DType::F32, &Device::Cpu).unwrap();
        let ys = bn.forward(&xs, &ActivationContext::default()).unwrap();
        let v = ys.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(v.iter().all(|x| (x - 1.0 / 1.001f32.sqrt()).abs() < 1e-5));
    }
}
