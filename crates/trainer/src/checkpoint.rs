use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tch::nn;

use rwkv_core::{safetensors_util, ModelConfig};

use crate::error::Result;

/// Whether the pass at `pass_index` (0-based) ends with a checkpoint.
///
/// Cadence hits count from pass 0; the last pass always saves.
pub fn should_checkpoint(cadence: usize, pass_index: usize, max_passes: usize) -> bool {
    (cadence > 0 && pass_index % cadence == 0) || pass_index + 1 == max_passes
}

/// `{prefix}{pass_index + 1}.safetensors`
pub fn checkpoint_path(prefix: &str, pass_index: usize) -> PathBuf {
    PathBuf::from(format!("{}{}.safetensors", prefix, pass_index + 1))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Destination for model state.
pub trait CheckpointSink {
    fn save(&mut self, store: &nn::VarStore, path: &Path) -> Result<()>;
}

/// Writes the variable store as safetensors, with the model config as
/// `config.json` in the same directory.
pub struct VarStoreSink {
    model_config: ModelConfig,
}

impl VarStoreSink {
    pub fn new(model_config: ModelConfig) -> Self {
        Self { model_config }
    }
}

impl CheckpointSink for VarStoreSink {
    fn save(&mut self, store: &nn::VarStore, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        safetensors_util::save_safetensors(store, path)?;

        let config_path = path.with_file_name("config.json");
        self.model_config.save(&config_path)?;

        info!("Saved checkpoint to {:?}", path);
        Ok(())
    }
}

/// Counters written next to each checkpoint so an external caller can resume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    /// Last completed pass (0-based).
    pub pass_index: usize,
    pub tokens_seen: u64,
    pub last_rate: f64,
}

impl TrainingProgress {
    /// `trained-3.safetensors` -> `trained-3.progress.json`
    pub fn sidecar_path(checkpoint: &Path) -> PathBuf {
        checkpoint.with_extension("progress.json")
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        ensure_parent(path)?;
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn passes_saved(max_passes: usize, cadence: usize) -> Vec<usize> {
        (0..max_passes)
            .filter(|&p| should_checkpoint(cadence, p, max_passes))
            .collect()
    }

    #[test]
    fn cadence_two_over_five_passes() {
        assert_eq!(passes_saved(5, 2), vec![0, 2, 4]);
    }

    #[test]
    fn cadence_zero_saves_only_the_last_pass() {
        assert_eq!(passes_saved(5, 0), vec![4]);
    }

    #[test]
    fn cadence_one_saves_every_pass() {
        assert_eq!(passes_saved(3, 1), vec![0, 1, 2]);
    }

    #[test]
    fn last_pass_saves_off_cadence() {
        assert_eq!(passes_saved(4, 3), vec![0, 3]);
        assert_eq!(passes_saved(6, 4), vec![0, 4, 5]);
    }

    #[test]
    fn paths_use_one_based_pass_numbers() {
        assert_eq!(
            checkpoint_path("out/trained-", 0),
            PathBuf::from("out/trained-1.safetensors")
        );
        assert_eq!(
            TrainingProgress::sidecar_path(Path::new("out/trained-1.safetensors")),
            PathBuf::from("out/trained-1.progress.json")
        );
    }

    #[test]
    fn sink_writes_weights_and_config() {
        let dir = std::env::temp_dir().join(format!("trainer-sink-{}", std::process::id()));
        let vs = nn::VarStore::new(Device::Cpu);
        let _ = vs.root().var("w", &[3], nn::Init::Const(1.0));

        let path = dir.join("trained-1.safetensors");
        VarStoreSink::new(ModelConfig::default()).save(&vs, &path).unwrap();

        assert!(path.exists());
        assert!(dir.join("config.json").exists());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn progress_survives_a_save_and_load() {
        let path = std::env::temp_dir().join(format!("progress-{}.json", std::process::id()));
        let progress = TrainingProgress {
            pass_index: 2,
            tokens_seen: 12_345,
            last_rate: 3e-4,
        };
        progress.save(&path).unwrap();
        assert_eq!(TrainingProgress::load(&path).unwrap(), progress);
        fs::remove_file(path).ok();
    }
}
