use anyhow::{Context, Result};
use chrono::Local;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tch::Device;

use rwkv_core::ModelConfig;
use tokenizer::{CharTokenizer, VocabBuilder};
use trainer::checkpoint::CheckpointSink;
use trainer::dataset::{read_lines, split_train_valid};
use trainer::runtime::{BatchSource, Distributed, LanguageModel};
use trainer::{
    LineDataset, RunLog, RwkvModel, SingleProcess, TrainingConfig, TrainingLoop, TrainingProgress,
    VarStoreSink,
};

const MODEL_CONFIG_PATH: &str = "configs/model_config.yaml";
const TRAINING_CONFIG_PATH: &str = "configs/training_config.yaml";
const DATA_CONFIG_PATH: &str = "configs/data_config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DataConfig {
    train_file: PathBuf,
    vocab_file: PathBuf,
    valid_fraction: f64,
    seed: u64,
    min_char_frequency: u32,
    /// Safetensors weights loaded into the fresh model before training.
    init_weights: Option<PathBuf>,
    /// Checkpoint to continue from; its `.progress.json` sidecar must exist.
    resume_from: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_file: PathBuf::from("data/train.txt"),
            vocab_file: PathBuf::from("data/vocab.json"),
            valid_fraction: 0.125,
            seed: 42,
            min_char_frequency: 1,
            init_weights: None,
            resume_from: None,
        }
    }
}

fn load_yaml_or_default<T>(path: &str) -> Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if !Path::new(path).exists() {
        info!("{} not found, using defaults", path);
        return Ok(T::default());
    }
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path))
}

fn load_or_build_tokenizer(data: &DataConfig) -> Result<CharTokenizer> {
    if data.vocab_file.exists() {
        info!("Loading vocabulary from {:?}", data.vocab_file);
        return Ok(CharTokenizer::load(&data.vocab_file)?);
    }

    info!("Building vocabulary from {:?}", data.train_file);
    let vocab = VocabBuilder::new(data.min_char_frequency).build_from_files(&[&data.train_file])?;
    let tokenizer = CharTokenizer::new(vocab)?;
    if let Some(parent) = data.vocab_file.parent() {
        fs::create_dir_all(parent)?;
    }
    tokenizer.save(&data.vocab_file)?;
    Ok(tokenizer)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let data_config: DataConfig = load_yaml_or_default(DATA_CONFIG_PATH)?;
    let mut model_config: ModelConfig = load_yaml_or_default(MODEL_CONFIG_PATH)?;
    let mut training_config = if Path::new(TRAINING_CONFIG_PATH).exists() {
        TrainingConfig::from_yaml_file(TRAINING_CONFIG_PATH)
            .with_context(|| format!("loading {}", TRAINING_CONFIG_PATH))?
    } else {
        TrainingConfig::default()
    };

    let tokenizer = load_or_build_tokenizer(&data_config)?;
    model_config.vocab_size = tokenizer.vocab_size() as i64;
    model_config
        .validate()
        .with_context(|| format!("checking {}", MODEL_CONFIG_PATH))?;

    let lines = read_lines(&data_config.train_file)
        .with_context(|| format!("reading {:?}", data_config.train_file))?;
    let (train_lines, valid_lines) =
        split_train_valid(lines, data_config.valid_fraction, data_config.seed);
    info!(
        "{} training lines, {} validation lines",
        train_lines.len(),
        valid_lines.len()
    );

    if training_config.final_token_threshold == 0 {
        let horizon = (training_config.max_passes * train_lines.len()) as u64
            * model_config.ctx_len as u64;
        training_config = training_config.with_token_horizon(horizon);
        info!("Decay horizon set to {} tokens", horizon);
    }

    let device = Device::cuda_if_available();
    info!("Using device: {:?}", device);

    let dist = SingleProcess;
    let ctx_len = model_config.ctx_len as usize;
    let mut train_data = LineDataset::new(
        &train_lines,
        &tokenizer,
        ctx_len,
        training_config.batch_size,
        device,
    )
    .shard(dist.rank(), dist.world_size());
    let mut valid_data = LineDataset::new(
        &valid_lines,
        &tokenizer,
        ctx_len,
        training_config.batch_size,
        device,
    );

    let mut model = RwkvModel::new(&model_config, device);
    let progress = match &data_config.resume_from {
        Some(checkpoint) => {
            model.load_weights(checkpoint)?;
            Some(TrainingProgress::load(TrainingProgress::sidecar_path(checkpoint))?)
        }
        None => {
            if let Some(weights) = &data_config.init_weights {
                let loaded = model.load_weights(weights)?;
                info!("Loaded {} tensors from {:?}", loaded, weights);
            }
            None
        }
    };

    let run_name = model_config.run_name();
    let run_log = RunLog::open(&training_config.run_log_path)?;
    let mut sink = VarStoreSink::new(model_config.clone());

    let mut training = TrainingLoop::new(
        training_config.clone(),
        model,
        Box::new(VarStoreSink::new(model_config)),
        run_log,
    )?
    .with_distributed(Box::new(dist));
    if let Some(progress) = progress {
        training.resume(progress);
    }

    let valid: Option<&mut dyn BatchSource> = if valid_data.is_empty() {
        None
    } else {
        Some(&mut valid_data)
    };
    let summaries = training.run(&mut train_data, valid)?;

    let snapshot = PathBuf::from(format!(
        "{}{}-{}-{}.safetensors",
        training_config.checkpoint_path_prefix,
        training_config.max_passes,
        run_name,
        Local::now().format("%Y-%m-%d-%H-%M-%S")
    ));
    sink.save(training.model().var_store(), &snapshot)?;

    if let Some(last) = summaries.last() {
        info!(
            "Training complete: loss {:.4}, {} tokens seen",
            last.running_loss, last.tokens_seen
        );
    }
    if let Some(best) = training.min_dev_loss() {
        info!("Best dev loss {:.4}", best);
    }

    Ok(())
}
