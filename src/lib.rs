pub mod compute;
pub mod dream;
pub mod error;
pub mod image_ops;
pub mod layer;
pub mod logging;
pub mod model;
pub mod nets;
pub mod noise;
pub mod worker;

pub use dream::{
    config::{EngineSettings, RenderConfig, UserRenderSettings},
    engine::DreamEngine,
    progress::{DreamOutcome, ProgressSnapshot, StopFlag},
};
pub use error::{DreamError, Result};
pub use model::registry::{ModelEntry, ModelRegistry};
pub use worker::controller::DreamController;
