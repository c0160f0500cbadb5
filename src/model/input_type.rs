use ndarray::{s, Axis};

use crate::image_ops::image_tensor::ImageTensor;

pub const PREPROCESS_CAFFE_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

/// Input normalization a network was trained with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputType {
    // Scaled to [-1, 1]
    Tf,
    // BGR with the ImageNet mean subtracted
    Caffe,
    // Untouched [0, 255]
    Raw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

impl InputType {
    pub fn channel_order(&self) -> ChannelOrder {
        match self {
            InputType::Caffe => ChannelOrder::Bgr,
            InputType::Tf | InputType::Raw => ChannelOrder::Rgb,
        }
    }

    /// RGB [0, 255] pixels to network input.
    pub fn preprocess(&self, image: &ImageTensor) -> ImageTensor {
        match self {
            InputType::Tf => image.mapv(|v| v / 127.5 - 1.0),
            InputType::Caffe => {
                let mut bgr = image.slice(s![.., .., ..;-1]).to_owned();
                for (c, mut channel) in bgr.axis_iter_mut(Axis(2)).enumerate() {
                    channel.mapv_inplace(|v| v - PREPROCESS_CAFFE_MEAN[c]);
                }
                bgr
            }
            InputType::Raw => image.to_owned(),
        }
    }

    /// Network input back to RGB [0, 255] pixels, not clipped.
    pub fn postprocess(&self, image: &ImageTensor) -> ImageTensor {
        match self {
            InputType::Tf => image.mapv(|v| 255.0 * (v + 1.0) / 2.0),
            InputType::Caffe => {
                let mut bgr = image.to_owned();
                for (c, mut channel) in bgr.axis_iter_mut(Axis(2)).enumerate() {
                    channel.mapv_inplace(|v| v + PREPROCESS_CAFFE_MEAN[c]);
                }
                bgr.slice(s![.., .., ..;-1]).to_owned()
            }
            InputType::Raw => image.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn sample() -> ImageTensor {
        Array3::from_shape_fn((2, 3, 3), |(y, x, c)| (y * 40 + x * 20 + c * 5) as f32)
    }

    #[test]
    fn caffe_swaps_channels_and_subtracts_mean() {
        let image = sample();
        let processed = InputType::Caffe.preprocess(&image);
        assert_abs_diff_eq!(processed[[1, 2, 0]], image[[1, 2, 2]] - PREPROCESS_CAFFE_MEAN[0], epsilon = 1e-4);
        assert_abs_diff_eq!(processed[[1, 2, 2]], image[[1, 2, 0]] - PREPROCESS_CAFFE_MEAN[2], epsilon = 1e-4);
    }

    #[test]
    fn postprocess_inverts_preprocess() {
        let image = sample();
        for input_type in [InputType::Tf, InputType::Caffe, InputType::Raw] {
            let restored = input_type.postprocess(&input_type.preprocess(&image));
            for (a, b) in restored.iter().zip(image.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn tf_range() {
        let image = Array3::from_shape_vec((1, 2, 1), vec![0.0, 255.0]).unwrap();
        let processed = InputType::Tf.preprocess(&image);
        assert_abs_diff_eq!(processed[[0, 0, 0]], -1.0);
        assert_abs_diff_eq!(processed[[0, 1, 0]], 1.0);
    }
}
