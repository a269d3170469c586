use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Invalid training configuration: {0}")]
    Configuration(String),

    #[error("Data source ran dry in pass {pass_index}: declared {declared} batches, produced {produced}")]
    DataExhausted {
        pass_index: usize,
        declared: usize,
        produced: usize,
    },

    #[error("Non-finite loss {loss} at pass {pass_index}, step {step_index}")]
    NumericInstability {
        pass_index: usize,
        step_index: usize,
        loss: f64,
    },

    #[error("Data source declared no batches for pass {pass_index}")]
    EmptyPass { pass_index: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("model error: {0}")]
    Model(#[from] rwkv_core::ModelError),

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] tokenizer::TokenizerError),
}

pub type Result<T> = std::result::Result<T, TrainError>;
