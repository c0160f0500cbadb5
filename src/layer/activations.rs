use candle_core::{CpuStorage, CustomOp1, DType, Device, Layout, Result, Shape, Tensor};
use tracing::warn;

use super::layer::Layer;

/// Steps during which the redirected ReLU rule lets gradients through inactive units.
pub const RELU_WARMUP_STEPS: usize = 8;

/// Per forward-pass state the activations need, owned by whoever drives the optimizer.
#[derive(Clone, Copy, Debug, Default)]
pub struct ActivationContext {
    pub step: usize,
}

impl ActivationContext {
    pub fn new(step: usize) -> Self {
        Self { step }
    }
}

/// How rectifiers get built when a network graph is constructed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationPatch {
    None,
    FactoryOverride,
}

impl ActivationPatch {
    /// The rectifier every ReLU site of the graph should use on `device`.
    pub fn relu(&self, device: &Device) -> ActivationType {
        match self {
            ActivationPatch::None => ActivationType::ReLU,
            ActivationPatch::FactoryOverride if device.is_cpu() => ActivationType::RedirectedReLU {
                warmup_steps: RELU_WARMUP_STEPS,
            },
            ActivationPatch::FactoryOverride => {
                warn!("redirected ReLU runs on the CPU device only, using the native rule on {:?}", device);
                ActivationType::ReLU
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActivationType {
    ReLU,
    RedirectedReLU { warmup_steps: usize },
    Sigmoid,
    SiLU,
}

impl ActivationType {
    pub fn apply(&self, xs: &Tensor, ctx: &ActivationContext) -> Result<Tensor> {
        match self {
            ActivationType::ReLU => xs.relu(),
            ActivationType::RedirectedReLU { warmup_steps } => xs.contiguous()?.apply_op1(RedirectedReLU {
                step: ctx.step,
                warmup_steps: *warmup_steps,
            }),
            ActivationType::Sigmoid => candle_nn::ops::sigmoid(xs),
            ActivationType::SiLU => candle_nn::ops::silu(xs),
        }
    }

    pub fn name(&self) -> String {
        match self {
            ActivationType::ReLU => "ReLU".to_string(),
            ActivationType::RedirectedReLU { .. } => "RedirectedReLU".to_string(),
            ActivationType::Sigmoid => "Sigmoid".to_string(),
            ActivationType::SiLU => "SiLU".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ActivationLayer {
    pub activation_type: ActivationType,
}

impl ActivationLayer {
    pub fn new(activation_type: ActivationType) -> Self {
        Self { activation_type }
    }
}

impl Layer for ActivationLayer {
    fn forward(&self, xs: &Tensor, ctx: &ActivationContext) -> Result<Tensor> {
        self.activation_type.apply(xs, ctx)
    }

    fn name(&self) -> String {
        self.activation_type.name()
    }

    fn config_string(&self) -> Option<String> {
        match self.activation_type {
            ActivationType::RedirectedReLU { warmup_steps } => Some(format!("warmup_steps={}", warmup_steps)),
            _ => None,
        }
    }
}

/// ReLU whose gradient, during warmup, only blocks updates that would push an inactive
/// unit further below zero. After warmup it is the plain ReLU gradient.
#[derive(Clone, Copy, Debug)]
pub struct RedirectedReLU {
    pub step: usize,
    pub warmup_steps: usize,
}

impl CustomOp1 for RedirectedReLU {
    fn name(&self) -> &'static str {
        "redirected-relu"
    }

    fn cpu_fwd(&self, storage: &CpuStorage, layout: &Layout) -> Result<(CpuStorage, Shape)> {
        let (start, end) = layout
            .contiguous_offsets()
            .ok_or_else(|| candle_core::Error::Msg("redirected-relu expects a contiguous input".to_string()))?;
        let src = &storage.as_slice::<f32>()?[start..end];
        let dst: Vec<f32> = src.iter().map(|v| v.max(0.0)).collect();
        Ok((CpuStorage::F32(dst), layout.shape().clone()))
    }

    fn bwd(&self, arg: &Tensor, _res: &Tensor, grad_res: &Tensor) -> Result<Option<Tensor>> {
        let inactive = arg.lt(0f32)?;
        let blocked = if self.step < self.warmup_steps {
            // Gradient descent steps against the upstream gradient, so a positive
            // gradient on an inactive unit would drive it further negative
            let pushes_down = grad_res.gt(0f32)?;
            inactive.to_dtype(DType::F32)?.mul(&pushes_down.to_dtype(DType::F32)?)?
        } else {
            inactive.to_dtype(DType::F32)?
        };
        let keep = blocked.affine(-1.0, 1.0)?;
        Ok(Some(grad_res.mul(&keep)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Var;

    fn relu_grad(step: usize, input: &[f32], upstream: &[f32]) -> Vec<f32> {
        let xs = Var::new(input, &Device::Cpu).unwrap();
        let ys = ActivationType::RedirectedReLU { warmup_steps: RELU_WARMUP_STEPS }
            .apply(xs.as_tensor(), &ActivationContext::new(step))
            .unwrap();
        let weights = Tensor::new(upstream, &Device::Cpu).unwrap();
        let loss = ys.mul(&weights).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        grads.get(xs.as_tensor()).unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn forward_matches_relu() {
        let xs = Tensor::new(&[-2f32, -0.5, 0.0, 1.5], &Device::Cpu).unwrap();
        let ys = xs.apply_op1(RedirectedReLU { step: 0, warmup_steps: 8 }).unwrap();
        assert_eq!(ys.to_vec1::<f32>().unwrap(), vec![0.0, 0.0, 0.0, 1.5]);
    }

    #[test]
    fn warmup_lets_raising_gradients_through_inactive_units() {
        let grad = relu_grad(0, &[-1.0, -1.0, 2.0, 2.0], &[1.0, -1.0, 1.0, -1.0]);
        assert_eq!(grad, vec![0.0, -1.0, 1.0, -1.0]);
    }

    #[test]
    fn after_warmup_gradient_is_vanilla() {
        let grad = relu_grad(RELU_WARMUP_STEPS, &[-1.0, -1.0, 2.0, 2.0], &[1.0, -1.0, 1.0, -1.0]);
        assert_eq!(grad, vec![0.0, 0.0, 1.0, -1.0]);
    }

    #[test]
    fn factory_override_picks_redirected_rule_on_cpu() {
        assert_eq!(
            ActivationPatch::FactoryOverride.relu(&Device::Cpu),
            ActivationType::RedirectedReLU { warmup_steps: RELU_WARMUP_STEPS }
        );
        assert_eq!(ActivationPatch::None.relu(&Device::Cpu), ActivationType::ReLU);
    }
}
