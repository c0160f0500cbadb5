pub mod input_type;
pub mod network;
pub mod registry;
pub mod weights;
