use candle_core::{Result, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

use crate::model::weights::frozen;

use super::{activations::ActivationContext, layer::Layer};

pub struct LinearLayer {
    pub in_features: usize,
    pub out_features: usize,
    pub bias: bool,
    linear: Linear,
}

impl LinearLayer {
    pub fn new(vb: VarBuilder, in_features: usize, out_features: usize) -> Result<Self> {
        Self::new_with(vb, in_features, out_features, true)
    }

    pub fn new_with(vb: VarBuilder, in_features: usize, out_features: usize, bias: bool) -> Result<Self> {
        let bound = 1. / (in_features as f64).sqrt();
        let weight = frozen(
            &vb,
            (out_features, in_features),
            "weight",
            Init::Uniform { lo: -bound, up: bound },
        )?;
        let bias_tensor = if bias {
            Some(frozen(&vb, out_features, "bias", Init::Const(0.))?)
        } else {
            None
        };

        Ok(Self {
            in_features,
            out_features,
            bias,
            linear: Linear::new(weight, bias_tensor),
        })
    }
}

impl Layer for LinearLayer {
    fn forward(&self, xs: &Tensor, _ctx: &ActivationContext) -> Result<Tensor> {
        self.linear.forward(xs)
    }

    fn name(&self) -> String {
        "Linear".to_string()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("{}->{} bias={}", self.in_features, self.out_features, self.bias))
    }

    fn out_features(&self) -> usize {
        self.out_features
    }
}
