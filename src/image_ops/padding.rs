use ndarray::{s, Array1, Array3, Axis};

use super::image_tensor::ImageTensor;

/// Per-axis (before, after) padding of an (h, w, c) image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Padding {
    pub height: (usize, usize),
    pub width: (usize, usize),
}

impl Padding {
    pub fn is_zero(&self) -> bool {
        *self == Padding::default()
    }

    pub fn total_height(&self) -> usize {
        self.height.0 + self.height.1
    }

    pub fn total_width(&self) -> usize {
        self.width.0 + self.width.1
    }
}

pub struct PaddedImage {
    pub image: ImageTensor,
    pub padding: Padding,
    /// Size the network looks at in one step, without the jitter margin.
    pub crop_size: (usize, usize, usize),
}

/// Pads every spatial axis to at least `min_dim` and adds `jitter_pixels` on every side.
///
/// Padding mirrors the image without repeating the edge pixel, up to half the axis
/// length on each side. Whatever is left is filled with the per-channel mean.
pub fn pad_image(image: &ImageTensor, min_dim: usize, jitter_pixels: usize) -> PaddedImage {
    let (height, width, channels) = image.dim();

    let h_pad = min_dim.saturating_sub(height);
    let w_pad = min_dim.saturating_sub(width);

    let padding = Padding {
        height: (h_pad / 2 + jitter_pixels, (h_pad + 1) / 2 + jitter_pixels),
        width: (w_pad / 2 + jitter_pixels, (w_pad + 1) / 2 + jitter_pixels),
    };
    let crop_size = (height + h_pad, width + w_pad, channels);

    if padding.is_zero() {
        return PaddedImage {
            image: image.to_owned(),
            padding,
            crop_size,
        };
    }

    let rows = AxisPadding::new(height, padding.height);
    let cols = AxisPadding::new(width, padding.width);

    let channel_means: Array1<f32> = image
        .mean_axis(Axis(0))
        .and_then(|m| m.mean_axis(Axis(0)))
        .unwrap_or_else(|| Array1::zeros(channels));

    let padded = Array3::from_shape_fn(
        (height + padding.total_height(), width + padding.total_width(), channels),
        |(y, x, c)| match (rows.source(y), cols.source(x)) {
            (Some(sy), Some(sx)) => image[[sy, sx, c]],
            _ => channel_means[c],
        },
    );

    PaddedImage {
        image: padded,
        padding,
        crop_size,
    }
}

/// Removes padding added by `pad_image`.
pub fn unpad_image(image: &ImageTensor, padding: &Padding) -> ImageTensor {
    if padding.is_zero() {
        return image.to_owned();
    }

    let (height, width, _) = image.dim();
    image
        .slice(s![
            padding.height.0..height - padding.height.1,
            padding.width.0..width - padding.width.1,
            ..
        ])
        .to_owned()
}

// Maps padded indices back to source indices along one axis
struct AxisPadding {
    len: usize,
    constant_before: usize,
    reflect_before: usize,
    reflect_after: usize,
}

impl AxisPadding {
    fn new(len: usize, (before, after): (usize, usize)) -> Self {
        let limit = len.saturating_sub(1);
        let reflect_before = before.min(len / 2).min(limit);
        let reflect_after = after.min((len + 1) / 2).min(limit);

        Self {
            len,
            constant_before: before - reflect_before,
            reflect_before,
            reflect_after,
        }
    }

    fn source(&self, index: usize) -> Option<usize> {
        let offset = index as isize - (self.constant_before + self.reflect_before) as isize;
        let len = self.len as isize;

        if offset < 0 {
            (-offset <= self.reflect_before as isize).then(|| (-offset) as usize)
        } else if offset >= len {
            let mirrored = 2 * (len - 1) - offset;
            (offset < len + self.reflect_after as isize).then(|| mirrored as usize)
        } else {
            Some(offset as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(height: usize, width: usize) -> ImageTensor {
        Array3::from_shape_fn((height, width, 3), |(y, x, c)| (y * 1000 + x * 10 + c) as f32)
    }

    #[test]
    fn small_image_padded_to_min_dim() {
        let padded = pad_image(&ramp(64, 64), 128, 0);
        assert_eq!(padded.image.dim(), (128, 128, 3));
        assert_eq!(padded.crop_size, (128, 128, 3));
        assert_eq!(padded.padding.height, (32, 32));
    }

    #[test]
    fn pad_unpad_round_trip() {
        let image = ramp(37, 90);
        for &(min_dim, jitter) in &[(128, 0), (128, 4), (16, 4), (200, 7)] {
            let padded = pad_image(&image, min_dim, jitter);
            assert_eq!(unpad_image(&padded.image, &padded.padding), image);
        }
    }

    #[test]
    fn large_image_only_gets_jitter() {
        let padded = pad_image(&ramp(200, 150), 128, 4);
        assert_eq!(padded.padding, Padding { height: (4, 4), width: (4, 4) });
        assert_eq!(padded.crop_size, (200, 150, 3));
        assert_eq!(padded.image.dim(), (208, 158, 3));
    }

    #[test]
    fn reflection_skips_the_edge_pixel() {
        let image = ramp(10, 10);
        let padded = pad_image(&image, 0, 2);
        // Row 0 of the padded image mirrors source row 2
        assert_eq!(padded.image[[0, 2, 0]], image[[2, 0, 0]]);
        assert_eq!(padded.image[[1, 2, 0]], image[[1, 0, 0]]);
        // Bottom side mirrors around the last row
        assert_eq!(padded.image[[13, 2, 0]], image[[7, 0, 0]]);
    }

    #[test]
    fn excess_padding_uses_channel_mean() {
        let image = Array3::from_shape_fn((2, 2, 3), |(y, _, c)| (y * 10 + c) as f32);
        let padded = pad_image(&image, 10, 0);
        assert_eq!(padded.image.dim(), (10, 10, 3));
        // Corner lies outside the reflected band
        assert_eq!(padded.image[[0, 0, 0]], 5.0);
        assert_eq!(padded.image[[0, 0, 2]], 7.0);
        assert_eq!(unpad_image(&padded.image, &padded.padding), image);
    }

    #[test]
    fn zero_padding_is_a_no_op() {
        let image = ramp(130, 140);
        let padded = pad_image(&image, 128, 0);
        assert!(padded.padding.is_zero());
        assert_eq!(unpad_image(&padded.image, &padded.padding), image);
    }
}
