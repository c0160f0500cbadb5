use thiserror::Error;

#[derive(Error, Debug)]
pub enum DreamError {
    // Setup and selection errors
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unknown layer '{layer}' for model {model}")]
    UnknownLayer { model: String, layer: String },

    #[error("Invalid neuron range {first}..={last} for layer '{layer}' with {width} neurons")]
    InvalidNeuronRange {
        layer: String,
        first: usize,
        last: usize,
        width: usize,
    },

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Image has a zero dimension ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid render configuration: {0}")]
    InvalidConfig(String),

    // Engine state errors
    #[error("No model is loaded, call setup first")]
    NotInitialized,

    #[error("The engine is busy with another task")]
    Busy,

    #[error("The running task did not stop within {0} seconds")]
    StopTimeout(u64),

    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    // Wrapped library errors
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, DreamError>;

impl DreamError {
    /// One-line message for task outcomes, whitespace collapsed.
    pub fn short_message(&self) -> String {
        self.to_string().split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_single_line() {
        let err = DreamError::InvalidArgument("first line\n   second\tline".to_string());
        assert_eq!(err.short_message(), "Invalid argument: first line second line");
    }

    #[test]
    fn neuron_range_message_names_layer() {
        let err = DreamError::InvalidNeuronRange {
            layer: "mixed3".to_string(),
            first: 10,
            last: 2,
            width: 768,
        };
        assert!(err.to_string().contains("mixed3"));
        assert!(err.to_string().contains("10..=2"));
    }
}
