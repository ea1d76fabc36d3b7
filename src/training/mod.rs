//! Training module for self-supervised representation learning
//!
//! This module provides:
//! - The algorithm strategies (SimCLR, BarlowTwins, MoCo) and their losses
//! - The fit loop with an online linear probe
//! - Per-epoch history and its pickle/JSON persistence
//!
//! ## Run Flow
//!
//! 1. Open the dataset triple and derive batch sizes from `steps_per_epoch`
//! 2. Build encoder, projection head and probe; build the algorithm
//! 3. Fit for `num_epochs` epochs, evaluating the probe after each
//! 4. Write `<AlgorithmName>.pkl` (and optionally JSON and model records)

pub mod algorithm;
pub mod history;
pub mod losses;
pub mod trainer;

use std::path::PathBuf;

use burn::tensor::backend::AutodiffBackend;
use tracing::info;

use crate::dataset::{prepare_dataset, DatasetStats};
use crate::model::config::ExperimentConfig;
use crate::model::networks::NetworkConfig;
use crate::utils::error::Result;

// Re-export main types for convenience
pub use algorithm::{Algorithm, BarlowTwins, ContrastiveAlgorithm, MoCo, SimClr};
pub use history::{EpochRecord, History, HistoryFormat, HISTORY_KEYS};
pub use trainer::{compile, Trainer};

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub history: History,
    pub stats: DatasetStats,
    pub history_path: PathBuf,
    pub json_path: Option<PathBuf>,
    pub model_paths: Vec<PathBuf>,
}

/// Prepare data, train the configured algorithm and write its outputs
///
/// Nothing is written unless training completes.
pub fn run_experiment<B: AutodiffBackend>(
    config: &ExperimentConfig,
    device: B::Device,
    show_progress: bool,
) -> Result<RunOutcome> {
    config.validate()?;

    let data = prepare_dataset(config.steps_per_epoch, &config.data)?;
    let stats = data.stats();
    info!("Dataset: {:?}", stats);

    let network_config = NetworkConfig::new().with_width(config.width);
    let networks = network_config.init_contrastive::<B>(&device);
    let probe = network_config.init_probe::<B>(&device);
    let algorithm =
        Algorithm::from_config(config.algorithm_config(), &networks, config.width, &device)?;
    let name = ContrastiveAlgorithm::<B>::name(&algorithm);

    let mut trainer = compile(
        networks,
        probe,
        algorithm,
        &config.optimizer,
        config.seed,
        device,
    )
    .with_progress(show_progress);

    let history = trainer.fit(&data, config.num_epochs)?;

    // models first so a failed save leaves no history behind
    let model_paths = if config.output.save_model {
        trainer.save_models(config.output.model_dir())?
    } else {
        Vec::new()
    };
    let json_path = if config.output.json {
        Some(history.save(&config.output.dir, name, HistoryFormat::Json)?)
    } else {
        None
    };
    let history_path = history.save(&config.output.dir, name, HistoryFormat::Pickle)?;

    Ok(RunOutcome {
        history,
        stats,
        history_path,
        json_path,
        model_paths,
    })
}
