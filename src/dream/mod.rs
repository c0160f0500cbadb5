pub mod config;
pub mod deep_dream;
pub mod engine;
pub mod loss;
pub mod progress;
pub mod tiled;
