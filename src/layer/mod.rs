pub mod activations;
pub mod concat;
pub mod conv2d;
pub mod element_wise;
pub mod factory;
pub mod layer;
pub mod linear;
pub mod pooling;
