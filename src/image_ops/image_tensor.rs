use candle_core::{Device, Tensor};
use image::RgbImage;
use ndarray::{Array3, Zip};

use crate::error::{DreamError, Result};

/// Host-side image in (height, width, channel) layout.
pub type ImageTensor = Array3<f32>;

pub fn rgb_to_array(image: &RgbImage) -> ImageTensor {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32)[c] as f32
    })
}

/// Clips to [0, 255] and truncates to 8 bits.
pub fn array_to_rgb(array: &ImageTensor) -> Result<RgbImage> {
    let (height, width, channels) = array.dim();
    if channels != 3 {
        return Err(DreamError::InvalidArgument(format!(
            "expected 3 channels, got {}",
            channels
        )));
    }

    let raw = array.iter().map(|v| v.clamp(0.0, 255.0) as u8).collect();
    RgbImage::from_raw(width as u32, height as u32, raw).ok_or_else(|| {
        DreamError::InvalidArgument(format!("cannot build a {}x{} image", width, height))
    })
}

pub fn array_to_tensor(array: &ImageTensor, device: &Device) -> Result<Tensor> {
    let dims = array.dim();
    let data: Vec<f32> = array.iter().copied().collect();
    Ok(Tensor::from_vec(data, dims, device)?)
}

pub fn tensor_to_array(tensor: &Tensor) -> Result<ImageTensor> {
    let dims = tensor.dims3()?;
    let data = tensor.flatten_all()?.to_vec1::<f32>()?;
    Ok(Array3::from_shape_vec(dims, data)?)
}

/// Bilinear resize with half-pixel centres, no antialiasing.
pub fn resize_bilinear(image: &ImageTensor, height: usize, width: usize) -> ImageTensor {
    let (in_height, in_width, channels) = image.dim();
    if (in_height, in_width) == (height, width) {
        return image.to_owned();
    }

    let mut output = Array3::<f32>::zeros((height, width, channels));
    if in_height == 0 || in_width == 0 {
        return output;
    }

    let rows = sample_positions(in_height, height);
    let cols = sample_positions(in_width, width);

    Zip::indexed(&mut output).par_for_each(|(y, x, c), value| {
        let (y0, y1, fy) = rows[y];
        let (x0, x1, fx) = cols[x];
        let top = image[[y0, x0, c]] * (1.0 - fx) + image[[y0, x1, c]] * fx;
        let bottom = image[[y1, x0, c]] * (1.0 - fx) + image[[y1, x1, c]] * fx;
        *value = top * (1.0 - fy) + bottom * fy;
    });

    output
}

fn sample_positions(input: usize, output: usize) -> Vec<(usize, usize, f32)> {
    let ratio = input as f32 / output as f32;
    (0..output)
        .map(|o| {
            let source = ((o as f32 + 0.5) * ratio - 0.5).max(0.0);
            let lower = (source.floor() as usize).min(input - 1);
            let upper = (lower + 1).min(input - 1);
            (lower, upper, source - lower as f32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rgb_round_trip() {
        let image = RgbImage::from_fn(5, 3, |x, y| image::Rgb([x as u8 * 10, y as u8 * 20, 7]));
        let array = rgb_to_array(&image);
        assert_eq!(array.dim(), (3, 5, 3));
        assert_eq!(array[[2, 4, 0]], 40.0);
        assert_eq!(array[[2, 4, 1]], 40.0);
        assert_eq!(array_to_rgb(&array).unwrap(), image);
    }

    #[test]
    fn array_to_rgb_clips() {
        let array = Array3::from_shape_vec((1, 1, 3), vec![-5.0, 300.0, 12.7]).unwrap();
        let image = array_to_rgb(&array).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0, 255, 12]);
    }

    #[test]
    fn tensor_round_trip() {
        let array = Array3::from_shape_fn((4, 6, 3), |(y, x, c)| (y * 100 + x * 10 + c) as f32);
        let tensor = array_to_tensor(&array, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[4, 6, 3]);
        assert_eq!(tensor_to_array(&tensor).unwrap(), array);
    }

    #[test]
    fn resize_constant_stays_constant() {
        let array = Array3::from_elem((10, 7, 3), -0.25f32);
        let resized = resize_bilinear(&array, 23, 4);
        assert_eq!(resized.dim(), (23, 4, 3));
        for v in resized.iter() {
            assert_abs_diff_eq!(*v, -0.25, epsilon = 1e-6);
        }
    }

    #[test]
    fn resize_keeps_values_outside_unit_range() {
        let array = Array3::from_shape_fn((2, 2, 1), |(y, x, _)| if y == x { 150.0 } else { -120.0 });
        let resized = resize_bilinear(&array, 4, 4);
        assert_abs_diff_eq!(resized[[0, 0, 0]], 150.0, epsilon = 1e-4);
        assert_abs_diff_eq!(resized[[0, 3, 0]], -120.0, epsilon = 1e-4);
    }

    #[test]
    fn downscale_by_two_averages_pairs() {
        let array = Array3::from_shape_fn((1, 4, 1), |(_, x, _)| x as f32);
        let resized = resize_bilinear(&array, 1, 2);
        assert_abs_diff_eq!(resized[[0, 0, 0]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(resized[[0, 1, 0]], 2.5, epsilon = 1e-6);
    }
}
