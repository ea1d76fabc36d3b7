//! Experiment Configuration Module
//!
//! Defines the run configuration (epochs, steps, width, optimizers, data,
//! outputs) and the algorithm hyperparameters. Every field has a default, so
//! a TOML file only needs to name what it changes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dataset::DataSource;
use crate::utils::error::{Result, SslError};

/// The self-supervised algorithms this crate trains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmKind {
    #[serde(rename = "simclr")]
    SimClr,
    BarlowTwins,
    #[serde(rename = "moco")]
    MoCo,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 3] = [
        AlgorithmKind::SimClr,
        AlgorithmKind::BarlowTwins,
        AlgorithmKind::MoCo,
    ];

    /// Display name, also the stem of the history file
    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmKind::SimClr => "SimCLR",
            AlgorithmKind::BarlowTwins => "BarlowTwins",
            AlgorithmKind::MoCo => "MoCo",
        }
    }

    /// Command-line / config spelling
    pub fn id(&self) -> &'static str {
        match self {
            AlgorithmKind::SimClr => "simclr",
            AlgorithmKind::BarlowTwins => "barlow-twins",
            AlgorithmKind::MoCo => "moco",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AlgorithmKind {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "simclr" => Ok(AlgorithmKind::SimClr),
            "barlow-twins" | "barlowtwins" => Ok(AlgorithmKind::BarlowTwins),
            "moco" => Ok(AlgorithmKind::MoCo),
            other => Err(SslError::Config(format!(
                "unknown algorithm '{}', expected one of simclr, barlow-twins, moco",
                other
            ))),
        }
    }
}

/// The full hyperparameter set shared by all algorithms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// EMA coefficient of the MoCo momentum networks
    #[serde(default = "default_momentum_coeff")]
    pub momentum_coeff: f64,
    /// Softmax temperature of SimCLR and MoCo
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Off-diagonal weight of the BarlowTwins loss
    #[serde(default = "default_redundancy_reduction_weight")]
    pub redundancy_reduction_weight: f64,
    /// Number of negatives kept in the MoCo queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_momentum_coeff() -> f64 {
    0.99
}
fn default_temperature() -> f64 {
    0.1
}
fn default_redundancy_reduction_weight() -> f64 {
    10.0
}
fn default_queue_size() -> usize {
    10_000
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            momentum_coeff: default_momentum_coeff(),
            temperature: default_temperature(),
            redundancy_reduction_weight: default_redundancy_reduction_weight(),
            queue_size: default_queue_size(),
        }
    }
}

impl Hyperparameters {
    /// The subset a given algorithm is constructed with
    pub fn for_algorithm(&self, kind: AlgorithmKind) -> AlgorithmConfig {
        match kind {
            AlgorithmKind::SimClr => AlgorithmConfig::SimClr(SimClrConfig {
                temperature: self.temperature,
            }),
            AlgorithmKind::BarlowTwins => AlgorithmConfig::BarlowTwins(BarlowTwinsConfig {
                redundancy_reduction_weight: self.redundancy_reduction_weight,
            }),
            AlgorithmKind::MoCo => AlgorithmConfig::MoCo(MoCoConfig {
                momentum_coeff: self.momentum_coeff,
                temperature: self.temperature,
                queue_size: self.queue_size,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimClrConfig {
    pub temperature: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarlowTwinsConfig {
    pub redundancy_reduction_weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoCoConfig {
    pub momentum_coeff: f64,
    pub temperature: f64,
    pub queue_size: usize,
}

/// Per-algorithm hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AlgorithmConfig {
    SimClr(SimClrConfig),
    BarlowTwins(BarlowTwinsConfig),
    MoCo(MoCoConfig),
}

impl AlgorithmConfig {
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            AlgorithmConfig::SimClr(_) => AlgorithmKind::SimClr,
            AlgorithmConfig::BarlowTwins(_) => AlgorithmKind::BarlowTwins,
            AlgorithmConfig::MoCo(_) => AlgorithmKind::MoCo,
        }
    }

    /// Names of the hyperparameters this variant carries
    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            AlgorithmConfig::SimClr(_) => &["temperature"],
            AlgorithmConfig::BarlowTwins(_) => &["redundancy_reduction_weight"],
            AlgorithmConfig::MoCo(_) => &["momentum_coeff", "temperature", "queue_size"],
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self {
            AlgorithmConfig::SimClr(config) => check_temperature(config.temperature),
            AlgorithmConfig::BarlowTwins(config) => {
                if config.redundancy_reduction_weight < 0.0 {
                    return Err(SslError::Config(
                        "redundancy_reduction_weight must be non-negative".to_string(),
                    ));
                }
                Ok(())
            }
            AlgorithmConfig::MoCo(config) => {
                check_temperature(config.temperature)?;
                if !(0.0..=1.0).contains(&config.momentum_coeff) {
                    return Err(SslError::Config(
                        "momentum_coeff must be in [0, 1]".to_string(),
                    ));
                }
                if config.queue_size == 0 {
                    return Err(SslError::Config("queue_size must be positive".to_string()));
                }
                Ok(())
            }
        }
    }
}

fn check_temperature(temperature: f64) -> Result<()> {
    if temperature <= 0.0 {
        return Err(SslError::Config("temperature must be positive".to_string()));
    }
    Ok(())
}

/// Adam settings for the two optimizers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Learning rate of the encoder + projection head optimizer
    #[serde(default = "default_learning_rate")]
    pub contrastive_learning_rate: f64,
    /// Learning rate of the linear probe optimizer
    #[serde(default = "default_learning_rate")]
    pub probe_learning_rate: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
}

fn default_learning_rate() -> f64 {
    1e-3
}
fn default_epsilon() -> f32 {
    1e-7
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            contrastive_learning_rate: default_learning_rate(),
            probe_learning_rate: default_learning_rate(),
            epsilon: default_epsilon(),
        }
    }
}

/// What a run writes to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving `<AlgorithmName>.pkl`
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// Also write the history as JSON
    #[serde(default)]
    pub json: bool,
    /// Save encoder and probe records
    #[serde(default)]
    pub save_model: bool,
    /// Directory for the model records, `dir` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,
}

impl OutputConfig {
    pub fn model_dir(&self) -> &Path {
        self.model_dir.as_deref().unwrap_or(&self.dir)
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            json: false,
            save_model: false,
            model_dir: None,
        }
    }
}

/// Complete configuration of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: AlgorithmKind,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
    #[serde(default = "default_steps_per_epoch")]
    pub steps_per_epoch: usize,
    /// Channel and feature width of every network
    #[serde(default = "default_width")]
    pub width: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub data: DataSource,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_algorithm() -> AlgorithmKind {
    AlgorithmKind::SimClr
}
fn default_num_epochs() -> usize {
    30
}
fn default_steps_per_epoch() -> usize {
    200
}
fn default_width() -> usize {
    128
}
fn default_seed() -> u64 {
    42
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            num_epochs: default_num_epochs(),
            steps_per_epoch: default_steps_per_epoch(),
            width: default_width(),
            seed: default_seed(),
            hyperparameters: Hyperparameters::default(),
            optimizer: OptimizerConfig::default(),
            data: DataSource::default(),
            output: OutputConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Load a configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SslError::PathNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SslError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SslError::Serialization(e.to_string()))
    }

    /// Hyperparameters of the selected algorithm
    pub fn algorithm_config(&self) -> AlgorithmConfig {
        self.hyperparameters.for_algorithm(self.algorithm)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_epochs == 0 {
            return Err(SslError::Config("num_epochs must be positive".to_string()));
        }
        if self.steps_per_epoch == 0 {
            return Err(SslError::Config(
                "steps_per_epoch must be positive".to_string(),
            ));
        }
        if self.width == 0 {
            return Err(SslError::Config("width must be positive".to_string()));
        }
        if self.optimizer.contrastive_learning_rate <= 0.0
            || self.optimizer.probe_learning_rate <= 0.0
        {
            return Err(SslError::Config("learning rates must be positive".to_string()));
        }
        self.algorithm_config().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ExperimentConfig::default();
        assert_eq!(config.num_epochs, 30);
        assert_eq!(config.steps_per_epoch, 200);
        assert_eq!(config.width, 128);
        assert!((config.hyperparameters.momentum_coeff - 0.99).abs() < 1e-12);
        assert!((config.hyperparameters.temperature - 0.1).abs() < 1e-12);
        assert!((config.hyperparameters.redundancy_reduction_weight - 10.0).abs() < 1e-12);
        assert_eq!(config.hyperparameters.queue_size, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hyperparameter_subsets() {
        let hyperparameters = Hyperparameters::default();

        let simclr = hyperparameters.for_algorithm(AlgorithmKind::SimClr);
        assert_eq!(simclr.keys(), &["temperature"]);
        assert_eq!(simclr, AlgorithmConfig::SimClr(SimClrConfig { temperature: 0.1 }));

        let barlow = hyperparameters.for_algorithm(AlgorithmKind::BarlowTwins);
        assert_eq!(barlow.keys(), &["redundancy_reduction_weight"]);

        let moco = hyperparameters.for_algorithm(AlgorithmKind::MoCo);
        assert_eq!(moco.keys(), &["momentum_coeff", "temperature", "queue_size"]);
        assert_eq!(
            moco,
            AlgorithmConfig::MoCo(MoCoConfig {
                momentum_coeff: 0.99,
                temperature: 0.1,
                queue_size: 10_000
            })
        );

        for kind in AlgorithmKind::ALL {
            let config = hyperparameters.for_algorithm(kind);
            assert_eq!(config.kind(), kind);
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("simclr".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::SimClr);
        assert_eq!(
            "Barlow_Twins".parse::<AlgorithmKind>().unwrap(),
            AlgorithmKind::BarlowTwins
        );
        assert_eq!("MoCo".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::MoCo);
        assert!("byol".parse::<AlgorithmKind>().is_err());
        assert_eq!(AlgorithmKind::BarlowTwins.name(), "BarlowTwins");
    }

    #[test]
    fn test_partial_toml() {
        let config: ExperimentConfig = toml::from_str(
            r#"
algorithm = "barlow-twins"
num_epochs = 2

[hyperparameters]
redundancy_reduction_weight = 5.0

[data]
kind = "synthetic"
unlabeled_len = 64
"#,
        )
        .unwrap();

        assert_eq!(config.algorithm, AlgorithmKind::BarlowTwins);
        assert_eq!(config.num_epochs, 2);
        assert_eq!(config.steps_per_epoch, 200);
        assert!((config.hyperparameters.redundancy_reduction_weight - 5.0).abs() < 1e-12);
        assert!((config.hyperparameters.temperature - 0.1).abs() < 1e-12);
        assert!(matches!(config.data, DataSource::Synthetic(ref s) if s.unlabeled_len == 64));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ExperimentConfig {
            algorithm: AlgorithmKind::MoCo,
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        let parsed: ExperimentConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = ExperimentConfig {
            width: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.algorithm = AlgorithmKind::MoCo;
        config.hyperparameters.momentum_coeff = 1.5;
        assert!(config.validate().is_err());
    }
}
