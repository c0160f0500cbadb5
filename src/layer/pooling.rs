use candle_core::{DType, Result, Tensor};

use super::{activations::ActivationContext, conv2d::pad2d, layer::{take_strided, Layer}};

// Candle only differentiates pooling when kernel == stride, so pooling windows are
// reduced over shifted strided views instead.

/// Max pooling without padding (after an optional zero border).
pub struct MaxPool2DLayer {
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
}

impl MaxPool2DLayer {
    pub fn new(kernel: usize, stride: usize) -> Self {
        Self { kernel, stride, padding: 0 }
    }

    pub fn new_with(kernel: usize, stride: usize, padding: usize) -> Self {
        Self { kernel, stride, padding }
    }
}

impl Layer for MaxPool2DLayer {
    fn forward(&self, xs: &Tensor, _ctx: &ActivationContext) -> Result<Tensor> {
        let xs = pad2d(xs, (self.padding, self.padding), (self.padding, self.padding))?;
        let (_, _, h, w) = xs.dims4()?;
        let out_h = (h - self.kernel) / self.stride + 1;
        let out_w = (w - self.kernel) / self.stride + 1;

        let mut acc: Option<Tensor> = None;
        for dy in 0..self.kernel {
            let rows = take_strided(&xs, 2, dy, out_h, self.stride)?;
            for dx in 0..self.kernel {
                let view = take_strided(&rows, 3, dx, out_w, self.stride)?;
                acc = Some(match acc {
                    Some(m) => m.maximum(&view)?,
                    None => view,
                });
            }
        }

        match acc {
            Some(ys) => Ok(ys),
            None => Ok(xs),
        }
    }

    fn name(&self) -> String {
        "MaxPool2D".to_string()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("kernel={} stride={} padding={}", self.kernel, self.stride, self.padding))
    }
}

/// Stride 1 average pooling with "same" padding, borders averaged over valid pixels only.
pub struct AvgPool2DLayer {
    pub kernel: usize,
}

impl AvgPool2DLayer {
    pub fn new(kernel: usize) -> Self {
        Self { kernel }
    }

    fn window_sum(&self, xs: &Tensor) -> Result<Tensor> {
        let before = (self.kernel - 1) / 2;
        let after = self.kernel - 1 - before;
        let (_, _, h, w) = xs.dims4()?;
        let padded = pad2d(xs, (before, after), (before, after))?;

        let mut acc: Option<Tensor> = None;
        for dy in 0..self.kernel {
            for dx in 0..self.kernel {
                let view = padded.narrow(2, dy, h)?.narrow(3, dx, w)?;
                acc = Some(match acc {
                    Some(sum) => sum.add(&view)?,
                    None => view,
                });
            }
        }

        match acc {
            Some(sum) => Ok(sum),
            None => Ok(xs.clone()),
        }
    }
}

impl Layer for AvgPool2DLayer {
    fn forward(&self, xs: &Tensor, _ctx: &ActivationContext) -> Result<Tensor> {
        let (_, _, h, w) = xs.dims4()?;
        let ones = Tensor::ones((1, 1, h, w), DType::F32, xs.device())?;
        let counts = self.window_sum(&ones)?;
        self.window_sum(xs)?.broadcast_div(&counts)
    }

    fn name(&self) -> String {
        "AvgPool2D".to_string()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("kernel={} stride=1 padding=same", self.kernel))
    }
}

/// Spatial mean, NCHW to NC (or NC11 with `keep_dims`).
pub struct GlobalAvgPoolLayer {
    pub keep_dims: bool,
}

impl GlobalAvgPoolLayer {
    pub fn new() -> Self {
        Self { keep_dims: false }
    }

    pub fn new_with(keep_dims: bool) -> Self {
        Self { keep_dims }
    }
}

impl Default for GlobalAvgPoolLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for GlobalAvgPoolLayer {
    fn forward(&self, xs: &Tensor, _ctx: &ActivationContext) -> Result<Tensor> {
        let pooled = xs.mean_keepdim(3)?.mean_keepdim(2)?;
        if self.keep_dims {
            Ok(pooled)
        } else {
            pooled.flatten_from(1)
        }
    }

    fn name(&self) -> String {
        "GlobalAvgPool".to_string()
    }
}
