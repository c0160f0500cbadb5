use candle_core::{Result, Tensor};

use super::activations::ActivationContext;

pub trait Layer: Send + Sync {
    // Run the layer on an NCHW (or NC for dense heads) batch
    fn forward(&self, xs: &Tensor, ctx: &ActivationContext) -> Result<Tensor>;

    // Return a string representation of the layers name
    fn name(&self) -> String;

    // Return optional configuration details for the layer
    fn config_string(&self) -> Option<String> {
        None
    }

    // Get output features, 0 when the layer keeps its input width
    fn out_features(&self) -> usize {
        0
    }
}

/// Layers applied one after the other.
pub struct SequentialLayer {
    pub layers: Vec<Box<dyn Layer>>,
}

impl SequentialLayer {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        Self { layers }
    }
}

impl Layer for SequentialLayer {
    fn forward(&self, xs: &Tensor, ctx: &ActivationContext) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in &self.layers {
            xs = layer.forward(&xs, ctx)?;
        }
        Ok(xs)
    }

    fn name(&self) -> String {
        "Sequential".to_string()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("layers={}", self.layers.len()))
    }

    fn out_features(&self) -> usize {
        self.layers
            .iter()
            .rev()
            .map(|l| l.out_features())
            .find(|&f| f > 0)
            .unwrap_or(0)
    }
}

/// Every `stride`-th element of `dim`, starting at `start`, `count` elements long.
///
/// Built from narrow/reshape so it stays differentiable for any stride.
pub fn take_strided(xs: &Tensor, dim: usize, start: usize, count: usize, stride: usize) -> Result<Tensor> {
    if stride == 1 {
        return xs.narrow(dim, start, count);
    }

    let available = xs.dim(dim)? - start;
    let span = (count * stride).min(available);
    let mut xs = xs.narrow(dim, start, span)?;
    if span < count * stride {
        xs = xs.pad_with_zeros(dim, 0, count * stride - span)?;
    }

    let mut shape = xs.dims().to_vec();
    shape[dim] = count;
    shape.insert(dim + 1, stride);

    xs.reshape(shape)?.narrow(dim + 1, 0, 1)?.squeeze(dim + 1)
}
