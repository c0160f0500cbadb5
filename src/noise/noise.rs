use image::RgbImage;
use ndarray::{Array2, Array3, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rustfft::num_complex::Complex;

use crate::{
    error::{DreamError, Result},
    image_ops::fit::MIN_DIM,
};

use super::spectrum::{compute_fft_frequencies_2d, irfft2_ortho};

pub const NOISE_SCALE_DEF: f32 = 0.01;
pub const NOISE_DECAY_DEF: f32 = 1.0;

/// Pink-ish noise image built from a Gaussian spectrum scaled by `1 / f^decay`.
///
/// Output layout is (height, width, channels).
pub fn get_noise_array<R: Rng + ?Sized>(
    width: usize,
    height: usize,
    channels: usize,
    scale: f32,
    decay: f32,
    rng: &mut R,
) -> Result<Array3<f32>> {
    if width == 0 || height == 0 || channels == 0 {
        return Err(DreamError::InvalidArgument(format!(
            "noise dimensions must be positive, got {}x{}x{}",
            width, height, channels
        )));
    }

    let normal = Normal::new(0.0f32, scale)
        .map_err(|e| DreamError::InvalidArgument(format!("noise scale {}: {}", scale, e)))?;

    let frequencies = compute_fft_frequencies_2d(width, height);
    let padded_width = width + width % 2;
    let min_frequency = 1.0 / width.max(height) as f32;

    let mut pixels = Array3::<f32>::zeros((height, width, channels));

    for channel in 0..channels {
        let spectrum: Array2<Complex<f32>> = frequencies.map(|&f| {
            let weight = 1.0 / f.max(min_frequency).powf(decay);
            let re = normal.sample(rng);
            let im = normal.sample(rng);
            Complex::new(re * weight, im * weight)
        });

        let plane = irfft2_ortho(&spectrum, padded_width)?;
        pixels
            .index_axis_mut(Axis(2), channel)
            .assign(&plane.slice(ndarray::s![..height, ..width]));
    }

    Ok(pixels)
}

/// Maps noise in roughly [-1, 1] to 8-bit pixel values.
pub fn noise_to_image_array(noise: &Array3<f32>) -> Array3<u8> {
    noise.mapv(|x| (255.0 * (x + 1.0) / 2.0).round().clamp(0.0, 255.0) as u8)
}

/// Side lengths for a new image: at least `MIN_DIM`, then capped by `max_size` when given.
pub fn noise_image_size(width: u32, height: u32, max_size: Option<u32>) -> (u32, u32) {
    let (width, height) = (width.max(MIN_DIM), height.max(MIN_DIM));
    match max_size.filter(|m| *m > 0) {
        Some(max) => (width.min(max), height.min(max)),
        None => (width, height),
    }
}

/// A fresh RGB noise image with the default spectrum parameters.
pub fn noise_image<R: Rng + ?Sized>(width: u32, height: u32, max_size: Option<u32>, rng: &mut R) -> Result<RgbImage> {
    noise_image_with(width, height, max_size, NOISE_SCALE_DEF, NOISE_DECAY_DEF, rng)
}

pub fn noise_image_with<R: Rng + ?Sized>(
    width: u32,
    height: u32,
    max_size: Option<u32>,
    scale: f32,
    decay: f32,
    rng: &mut R,
) -> Result<RgbImage> {
    let (width, height) = noise_image_size(width, height, max_size);
    let noise = get_noise_array(width as usize, height as usize, 3, scale, decay, rng)?;
    let pixels = noise_to_image_array(&noise);

    RgbImage::from_raw(width, height, pixels.iter().copied().collect()).ok_or_else(|| {
        DreamError::InvalidArgument(format!("cannot build a {}x{} noise image", width, height))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn noise_has_requested_shape_and_is_finite() {
        let mut rng = StdRng::seed_from_u64(7);
        let noise = get_noise_array(128, 128, 3, 0.01, 1.0, &mut rng).unwrap();
        assert_eq!(noise.dim(), (128, 128, 3));
        assert!(noise.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn odd_sizes_are_cropped() {
        let mut rng = StdRng::seed_from_u64(1);
        let noise = get_noise_array(33, 17, 3, 0.01, 1.0, &mut rng).unwrap();
        assert_eq!(noise.dim(), (17, 33, 3));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(get_noise_array(0, 16, 3, 0.01, 1.0, &mut rng).is_err());
    }

    #[test]
    fn image_array_clamps_and_rounds() {
        let noise = Array3::from_shape_vec((1, 4, 1), vec![-2.0, -1.0, 0.0, 3.0]).unwrap();
        let pixels = noise_to_image_array(&noise);
        assert_eq!(pixels.iter().copied().collect::<Vec<_>>(), vec![0, 0, 128, 255]);
    }

    #[test]
    fn new_image_has_minimum_size() {
        let mut rng = StdRng::seed_from_u64(3);
        let image = noise_image(16, 200, None, &mut rng).unwrap();
        assert_eq!(image.dimensions(), (MIN_DIM, 200));
    }

    #[test]
    fn new_image_size_is_capped() {
        assert_eq!(noise_image_size(300, 140, Some(256)), (256, 140));
        assert_eq!(noise_image_size(300, 140, Some(0)), (300, 140));
        assert_eq!(noise_image_size(8, 8, None), (MIN_DIM, MIN_DIM));
        // The cap applies after the minimum
        assert_eq!(noise_image_size(8, 8, Some(64)), (64, 64));
    }
}
