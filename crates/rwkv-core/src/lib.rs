pub mod channel_mix;
pub mod config;
pub mod error;
pub mod model;
pub mod safetensors_util;
pub mod state;
pub mod time_mix;

pub use config::{ModelConfig, ModelType};
pub use error::ModelError;
pub use model::{RwkvLm, IGNORE_INDEX};
pub use state::{LayerState, RecurrentState};
