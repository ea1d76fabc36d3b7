//! # Contrastive SSL
//!
//! Self-supervised visual representation learning on STL-10 with the Burn
//! framework. Three methods share one training driver:
//!
//! - **SimCLR**: NT-Xent between two augmented views of a batch
//! - **BarlowTwins**: cross-correlation of the two views pushed to identity
//! - **MoCo**: momentum target networks plus a queue of past targets
//!
//! The learned representation is scored by a linear probe trained on the
//! labeled split alongside pre-training; per-epoch metrics are saved as
//! `<AlgorithmName>.pkl`.
//!
//! ## Modules
//!
//! - `dataset`: STL-10 reader, synthetic corpus, batch geometry, augmentation
//! - `model`: encoder, projection head, linear probe, momentum copies, configuration
//! - `training`: algorithm strategies, losses, fit loop, history
//! - `utils`: logging, metrics, errors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use contrastive_ssl::backend::{init_device, TrainingBackend};
//! use contrastive_ssl::{run_experiment, ExperimentConfig};
//!
//! let config = ExperimentConfig::default();
//! let device = init_device(config.seed);
//! let outcome = run_experiment::<TrainingBackend>(&config, device, true)?;
//! println!("history written to {:?}", outcome.history_path);
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{
    prepare_dataset, Augmenter, DataSource, PreparedDatasets, SyntheticConfig, TrainBatch,
};
pub use model::config::{AlgorithmConfig, AlgorithmKind, ExperimentConfig, Hyperparameters};
pub use model::networks::{ContrastiveNetworks, Encoder, LinearProbe, NetworkConfig};
pub use training::{run_experiment, Algorithm, ContrastiveAlgorithm, History, RunOutcome, Trainer};
pub use utils::error::{Result, SslError};
