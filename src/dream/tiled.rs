use candle_core::{Tensor, Var};
use rand::Rng;
use tracing::warn;

use crate::error::{DreamError, Result};

use super::{
    deep_dream::{DeepDream, DreamGradient, OptimizerSettings},
    loss::normalize_gradient,
};

/// Runs the network on fixed-size tiles of a randomly rolled image, so memory use does
/// not grow with the image.
pub struct TiledDeepDream {
    inner: DeepDream,
    tile_size: usize,
    /// Drops the partial last tile along (height, width)
    remove_last_tile: (bool, bool),
}

impl TiledDeepDream {
    pub fn new(inner: DeepDream, tile_size: usize) -> Self {
        Self {
            inner,
            tile_size: tile_size.max(1),
            remove_last_tile: (false, false),
        }
    }

    fn tile_count(&self, len: usize, remove_last: bool) -> usize {
        len.div_ceil(self.tile_size) - usize::from(remove_last)
    }

    fn gradient_step(&mut self) -> Result<()> {
        let t = self.tile_size;
        let (remove_last_h, remove_last_w) = self.remove_last_tile;
        let (image, crop_size, smoothing, step) = {
            let state = self.inner.state.as_ref().ok_or(DreamError::NotInitialized)?;
            (
                state.image.as_tensor().detach(),
                state.crop_size,
                state.smoothing,
                state.relu_step,
            )
        };
        let (h, w, _) = image.dims3()?;
        let rows = self.tile_count(crop_size.0, remove_last_h);
        let cols = self.tile_count(crop_size.1, remove_last_w);

        let span = t as i32;
        let shift_y = self.inner.rng.gen_range(-span..span);
        let shift_x = self.inner.rng.gen_range(-span..span);
        let rolled = image.roll(shift_y, 0)?.roll(shift_x, 1)?;

        let mut store = None;
        let mut grad_rows = Vec::with_capacity(rows);
        for ty in 0..rows {
            let mut row = Vec::with_capacity(cols);
            for tx in 0..cols {
                let tile = Var::from_tensor(&rolled.narrow(0, ty * t, t)?.narrow(1, tx * t, t)?)?;
                let loss = self
                    .inner
                    .objective
                    .loss(&self.inner.network, tile.as_tensor(), smoothing, step)?;
                let mut grads = loss.backward()?;
                let gradient = grads
                    .remove(tile.as_tensor())
                    .ok_or_else(|| DreamError::InvalidArgument("loss does not depend on the tile".to_string()))?;
                row.push(gradient);
                store = Some(grads);
            }
            grad_rows.push(Tensor::cat(&row, 1)?.pad_with_zeros(1, 0, w - cols * t)?);
        }

        let grads = store.ok_or_else(|| DreamError::InvalidArgument("image is smaller than one tile".to_string()))?;
        let gradient = Tensor::cat(&grad_rows, 0)?.pad_with_zeros(0, 0, h - rows * t)?;
        let gradient = normalize_gradient(&gradient)?.roll(-shift_y, 0)?.roll(-shift_x, 1)?;

        self.inner.apply_gradient(grads, gradient)
    }
}

impl DreamGradient for TiledDeepDream {
    fn start_optimizer(&mut self, image: &Tensor, settings: &OptimizerSettings) -> Result<()> {
        let t = self.tile_size;
        let (crop_h, crop_w) = settings.crop_size;
        if crop_h < t || crop_w < t {
            return Err(DreamError::InvalidArgument(format!(
                "crop {}x{} is smaller than the {} pixel tile",
                crop_h, crop_w, t
            )));
        }
        if settings.jitter_pixels > 0 {
            warn!("jitter is ignored when tiling");
        }

        self.remove_last_tile = (crop_h % t != 0, crop_w % t != 0);
        let settings = OptimizerSettings {
            jitter_pixels: 0,
            ..*settings
        };
        self.inner.start_with_area(image, &settings, t * t)
    }

    fn run_steps(&mut self, steps: usize) -> Result<()> {
        for _ in 0..steps {
            self.gradient_step()?;
        }
        Ok(())
    }

    fn current_result(&self) -> Result<Tensor> {
        self.inner.current_result()
    }

    fn tile_size(&self) -> Option<usize> {
        Some(self.tile_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dream::{deep_dream::tests::relu_net, loss::{DreamObjective, Reduction}};
    use candle_core::Device;

    fn tiled(tile_size: usize) -> TiledDeepDream {
        let objective = DreamObjective::new(3, 0, 2, Reduction::L2, &Device::Cpu).unwrap();
        let inner = DeepDream::new(relu_net(), objective, (-1.0, 1.0), 1.0).with_seed(3);
        TiledDeepDream::new(inner, tile_size)
    }

    fn settings(crop_size: (usize, usize)) -> OptimizerSettings {
        OptimizerSettings {
            crop_size,
            step_size: 0.05,
            smoothing_factor: 1.0,
            jitter_pixels: 4,
        }
    }

    #[test]
    fn partial_tiles_are_dropped() {
        let mut dream = tiled(4);
        let image = Tensor::rand(-0.5f32, 0.5, (10, 8, 3), &Device::Cpu).unwrap();
        dream.start_optimizer(&image, &settings((10, 8))).unwrap();
        assert_eq!(dream.remove_last_tile, (true, false));
        assert_eq!(dream.tile_count(10, true), 2);
        assert_eq!(dream.tile_count(8, false), 2);
    }

    #[test]
    fn steps_keep_shape() {
        let mut dream = tiled(4);
        let image = Tensor::rand(-0.5f32, 0.5, (10, 8, 3), &Device::Cpu).unwrap();
        dream.start_optimizer(&image, &settings((10, 8))).unwrap();
        dream.run_steps(3).unwrap();
        let output = dream.current_result().unwrap();
        assert_eq!(output.dims(), &[10, 8, 3]);
        assert_eq!(dream.tile_size(), Some(4));
    }

    #[test]
    fn gradient_lands_on_the_unrolled_pixel() {
        let (h, w, hot) = (8, 8, (5, 2));
        let mut pixels = vec![0f32; h * w * 3];
        let offset = (hot.0 * w + hot.1) * 3;
        pixels[offset..offset + 3].copy_from_slice(&[0.5, 0.5, 0.5]);
        let image = Tensor::from_vec(pixels.clone(), (h, w, 3), &Device::Cpu).unwrap();

        // Only the hot pixel passes the ReLU, so only it may move
        let mut dream = tiled(4);
        let settings = OptimizerSettings {
            smoothing_factor: 0.0,
            jitter_pixels: 0,
            ..settings((h, w))
        };
        dream.start_optimizer(&image, &settings).unwrap();
        dream.run_steps(5).unwrap();

        let output = dream.current_result().unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for (i, (before, after)) in pixels.iter().zip(&output).enumerate() {
            if (offset..offset + 3).contains(&i) {
                assert!(after > before, "hot pixel did not grow: {} -> {}", before, after);
            } else {
                assert_eq!(after, before, "pixel {} moved", i / 3);
            }
        }
    }

    #[test]
    fn image_smaller_than_tile_is_rejected() {
        let mut dream = tiled(16);
        let image = Tensor::zeros((8, 8, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert!(dream.start_optimizer(&image, &settings((8, 8))).is_err());
    }
}
