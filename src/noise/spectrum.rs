use ndarray::{Array2, ShapeError};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

/// Radial frequency magnitudes of the half spectrum consumed by `irfft2_ortho`.
///
/// Rows follow the complex transform layout (`0, 1/h, ..., -1/h`), columns the real
/// transform layout (`0, 1/w, ..., 1/2`). Odd widths get one extra column that is
/// trimmed after the inverse transform.
pub fn compute_fft_frequencies_2d(width: usize, height: usize) -> Array2<f32> {
    let width = width + width % 2;
    let bins = width / 2 + 1;

    Array2::from_shape_fn((height, bins), |(row, col)| {
        let fx = col as f32 / width as f32;
        let fy = if row < (height + 1) / 2 {
            row as f32 / height as f32
        } else {
            (row as f32 - height as f32) / height as f32
        };
        (fx * fx + fy * fy).sqrt()
    })
}

/// Orthonormal inverse real 2-D transform of a (height, width/2 + 1) half spectrum.
/// `width` must be even.
pub fn irfft2_ortho(spectrum: &Array2<Complex<f32>>, width: usize) -> Result<Array2<f32>, ShapeError> {
    let (height, bins) = spectrum.dim();
    debug_assert_eq!(bins, width / 2 + 1);

    let mut planner = FftPlanner::<f32>::new();
    let column_fft = planner.plan_fft_inverse(height);
    let row_fft = planner.plan_fft_inverse(width);

    // Column-major copy so every frequency column is one contiguous chunk
    let mut columns: Vec<Complex<f32>> = spectrum.t().iter().copied().collect();
    columns
        .par_chunks_exact_mut(height)
        .for_each(|column| column_fft.process(column));

    let scale = 1.0 / ((height * width) as f32).sqrt();
    let mut output = vec![0.0f32; height * width];

    output
        .par_chunks_exact_mut(width)
        .enumerate()
        .for_each(|(row, out)| {
            // Hermitian completion of the half spectrum
            let mut buffer: Vec<Complex<f32>> = (0..width)
                .map(|k| {
                    if k < bins {
                        columns[k * height + row]
                    } else {
                        columns[(width - k) * height + row].conj()
                    }
                })
                .collect();

            row_fft.process(&mut buffer);

            for (value, sample) in out.iter_mut().zip(buffer) {
                *value = sample.re * scale;
            }
        });

    Array2::from_shape_vec((height, width), output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn frequency_grid_layout() {
        let freqs = compute_fft_frequencies_2d(4, 4);
        assert_eq!(freqs.dim(), (4, 3));
        assert_abs_diff_eq!(freqs[[0, 0]], 0.0);
        assert_abs_diff_eq!(freqs[[0, 2]], 0.5);
        // Negative row frequency has the same magnitude as its positive twin
        assert_abs_diff_eq!(freqs[[3, 0]], freqs[[1, 0]]);
    }

    #[test]
    fn odd_width_gets_an_extra_bin() {
        assert_eq!(compute_fft_frequencies_2d(5, 3).dim(), (3, 4));
    }

    #[test]
    fn dc_only_spectrum_is_constant() {
        let (height, width) = (4, 6);
        let mut spectrum = Array2::from_elem((height, width / 2 + 1), Complex::new(0.0f32, 0.0));
        spectrum[[0, 0]] = Complex::new(2.0, 0.0);

        let image = irfft2_ortho(&spectrum, width).unwrap();
        let expected = 2.0 / ((height * width) as f32).sqrt();
        for value in image.iter() {
            assert_abs_diff_eq!(*value, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn single_row_frequency_is_a_cosine() {
        let (height, width) = (1, 8);
        let mut spectrum = Array2::from_elem((height, width / 2 + 1), Complex::new(0.0f32, 0.0));
        spectrum[[0, 1]] = Complex::new(1.0, 0.0);

        let image = irfft2_ortho(&spectrum, width).unwrap();
        let norm = 1.0 / (width as f32).sqrt();
        for x in 0..width {
            let angle = 2.0 * std::f32::consts::PI * x as f32 / width as f32;
            assert_abs_diff_eq!(image[[0, x]], 2.0 * norm * angle.cos(), epsilon = 1e-5);
        }
    }
}
