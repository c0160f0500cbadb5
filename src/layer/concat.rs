use candle_core::{Result, Tensor};

use super::{activations::ActivationContext, layer::Layer};

/// Runs every branch on the same input and concatenates the results along `dim`.
pub struct ConcatLayer {
    pub dim: usize,
    pub branches: Vec<Box<dyn Layer>>,
}

impl ConcatLayer {
    pub fn new(branches: Vec<Box<dyn Layer>>) -> Self {
        Self { dim: 1, branches }
    }

    pub fn new_with(dim: usize, branches: Vec<Box<dyn Layer>>) -> Self {
        Self { dim, branches }
    }
}

impl Layer for ConcatLayer {
    fn forward(&self, xs: &Tensor, ctx: &ActivationContext) -> Result<Tensor> {
        let outputs = self
            .branches
            .iter()
            .map(|branch| branch.forward(xs, ctx))
            .collect::<Result<Vec<_>>>()?;
        Tensor::cat(&outputs, self.dim)
    }

    fn name(&self) -> String {
        "Concat".to_string()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("dim={} branches={}", self.dim, self.branches.len()))
    }

    fn out_features(&self) -> usize {
        self.branches.iter().map(|b| b.out_features()).sum()
    }
}
