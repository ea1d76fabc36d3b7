//! Model module: networks, momentum targets and run configuration

pub mod config;
pub mod momentum;
pub mod networks;

pub use config::{
    AlgorithmConfig, AlgorithmKind, BarlowTwinsConfig, ExperimentConfig, Hyperparameters,
    MoCoConfig, OptimizerConfig, OutputConfig, SimClrConfig,
};
pub use momentum::{ema_update, momentum_copy};
pub use networks::{ContrastiveNetworks, Encoder, LinearProbe, NetworkConfig, ProjectionHead};
