use image::{imageops::{self, FilterType}, RgbImage};
use tracing::debug;

use crate::error::{DreamError, Result};

pub const MIN_DIM: u32 = 128;
pub const MAX_DIM: u32 = 1024;

/// Resizes keeping the aspect ratio so the smaller side is at least `min_dim` and the
/// larger side at most `max_dim`. The larger side is cropped symmetrically only when
/// one resize cannot satisfy both bounds.
pub fn fit_image(image: &RgbImage, min_dim: u32, max_dim: u32) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(DreamError::EmptyImage { width, height });
    }
    if min_dim == 0 || max_dim < min_dim {
        return Err(DreamError::InvalidArgument(format!(
            "fit bounds must satisfy 0 < min_dim <= max_dim, got {} and {}",
            min_dim, max_dim
        )));
    }

    let (d_min, d_max) = (width.min(height), width.max(height));
    if d_min >= min_dim && d_max <= max_dim {
        return Ok(image.clone());
    }

    let mut new_min = d_min;
    let mut new_max = d_max;

    if d_max > max_dim {
        let ratio = max_dim as f64 / d_max as f64;
        new_max = max_dim;
        new_min = (d_min as f64 * ratio).round() as u32;
    }
    if new_min < min_dim {
        let ratio = min_dim as f64 / d_min as f64;
        new_min = min_dim;
        new_max = (d_max as f64 * ratio).round() as u32;
    }

    let (new_width, new_height) = if width <= height {
        (new_min, new_max)
    } else {
        (new_max, new_min)
    };

    debug!("fitting {}x{} image into {}x{}", width, height, new_width, new_height);
    let resized = imageops::resize(image, new_width, new_height, FilterType::CatmullRom);

    if new_max <= max_dim {
        return Ok(resized);
    }

    // Centered crop of the larger side
    let excess = new_max - max_dim;
    let start = excess / 2;
    let cropped = if width <= height {
        imageops::crop_imm(&resized, 0, start, new_width, max_dim).to_image()
    } else {
        imageops::crop_imm(&resized, start, 0, max_dim, new_height).to_image()
    };

    Ok(cropped)
}
