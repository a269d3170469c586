pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod loss;
pub mod model;
pub mod progress;
pub mod run_log;
pub mod runtime;
pub mod scheduler;
pub mod train;

pub use checkpoint::{CheckpointSink, TrainingProgress, VarStoreSink};
pub use config::TrainingConfig;
pub use dataset::LineDataset;
pub use error::{Result, TrainError};
pub use loss::LossEstimate;
pub use model::RwkvModel;
pub use progress::{PassSummary, StepReport, TrainingObserver};
pub use run_log::{PassRecord, RunLog};
pub use runtime::{Batch, BatchSource, Distributed, LanguageModel, OptimizerRuntime, SingleProcess};
pub use scheduler::{compute_rate, LrSchedule, ScheduledRate};
pub use train::TrainingLoop;
