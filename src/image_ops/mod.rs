pub mod fit;
pub mod image_tensor;
pub mod padding;
