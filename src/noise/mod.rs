pub mod noise;
pub mod spectrum;
