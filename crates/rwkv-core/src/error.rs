use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Shape mismatch for {name}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        found: Vec<i64>,
    },
}

pub type Result<T> = std::result::Result<T, ModelError>;
