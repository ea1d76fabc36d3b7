//! Algorithm strategies
//!
//! The trainer is the same for every method; what differs is how the two
//! views' projections become a loss and whether a momentum target has to be
//! maintained. `ContrastiveAlgorithm` captures exactly that seam.

use burn::prelude::*;
use burn::tensor::Distribution;
use tracing::debug;

use super::losses::{barlow_twins_loss, l2_normalize, moco_loss, simclr_loss};
use crate::model::config::{
    AlgorithmConfig, AlgorithmKind, BarlowTwinsConfig, MoCoConfig, SimClrConfig,
};
use crate::model::momentum::{ema_update, momentum_copy};
use crate::model::networks::{ContrastiveNetworks, NetworkConfig};
use crate::utils::error::Result;

/// Behaviour specific to one self-supervised method
pub trait ContrastiveAlgorithm<B: Backend> {
    fn kind(&self) -> AlgorithmKind;

    /// Name used for logging and the history file
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Loss between the projections of two augmented views
    ///
    /// `views_1`/`views_2` are the augmented images the projections came
    /// from, for methods that run their own target networks on them.
    fn contrastive_loss(
        &mut self,
        views_1: Tensor<B, 4>,
        views_2: Tensor<B, 4>,
        projections_1: Tensor<B, 2>,
        projections_2: Tensor<B, 2>,
    ) -> Tensor<B, 1>;

    /// Called after every representation optimizer step
    fn momentum_update(&mut self, _online: &ContrastiveNetworks<B>) {}
}

/// SimCLR: NT-Xent between the two views of a batch
#[derive(Debug, Clone)]
pub struct SimClr {
    pub config: SimClrConfig,
}

impl<B: Backend> ContrastiveAlgorithm<B> for SimClr {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::SimClr
    }

    fn contrastive_loss(
        &mut self,
        _views_1: Tensor<B, 4>,
        _views_2: Tensor<B, 4>,
        projections_1: Tensor<B, 2>,
        projections_2: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        simclr_loss(projections_1, projections_2, self.config.temperature)
    }
}

/// BarlowTwins: cross-correlation towards the identity
#[derive(Debug, Clone)]
pub struct BarlowTwins {
    pub config: BarlowTwinsConfig,
}

impl<B: Backend> ContrastiveAlgorithm<B> for BarlowTwins {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::BarlowTwins
    }

    fn contrastive_loss(
        &mut self,
        _views_1: Tensor<B, 4>,
        _views_2: Tensor<B, 4>,
        projections_1: Tensor<B, 2>,
        projections_2: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        barlow_twins_loss(
            projections_1,
            projections_2,
            self.config.redundancy_reduction_weight,
        )
    }
}

/// MoCo: momentum target networks plus a queue of past targets as negatives
#[derive(Debug)]
pub struct MoCo<B: Backend> {
    pub config: MoCoConfig,
    momentum_networks: ContrastiveNetworks<B>,
    queue: Tensor<B, 2>,
}

impl<B: Backend> MoCo<B> {
    /// Copy `online` into gradient-free momentum networks and fill the queue
    /// with random unit vectors
    pub fn new(
        config: MoCoConfig,
        online: &ContrastiveNetworks<B>,
        width: usize,
        device: &B::Device,
    ) -> Self {
        let queue = l2_normalize(Tensor::<B, 2>::random(
            [config.queue_size, width],
            Distribution::Normal(0.0, 1.0),
            device,
        ))
        .detach();

        Self {
            config,
            momentum_networks: momentum_copy(
                online,
                NetworkConfig::new()
                    .with_width(width)
                    .init_contrastive(device),
            ),
            queue,
        }
    }

    pub fn momentum_networks(&self) -> &ContrastiveNetworks<B> {
        &self.momentum_networks
    }

    /// Current queue of negatives, `[queue_size, width]`
    pub fn queue(&self) -> &Tensor<B, 2> {
        &self.queue
    }

    fn momentum_projections(&self, views: Tensor<B, 4>) -> Tensor<B, 2> {
        let (_, projections) = self.momentum_networks.forward(views);
        l2_normalize(projections).detach()
    }
}

impl<B: Backend> ContrastiveAlgorithm<B> for MoCo<B> {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::MoCo
    }

    fn contrastive_loss(
        &mut self,
        views_1: Tensor<B, 4>,
        views_2: Tensor<B, 4>,
        projections_1: Tensor<B, 2>,
        projections_2: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let momentum_1 = self.momentum_projections(views_1);
        let momentum_2 = self.momentum_projections(views_2);

        let loss = moco_loss(
            projections_1,
            projections_2,
            momentum_1.clone(),
            momentum_2.clone(),
            self.queue.clone(),
            self.config.temperature,
        );

        // newest targets first, oldest fall off the end
        self.queue = Tensor::cat(vec![momentum_1, momentum_2, self.queue.clone()], 0)
            .narrow(0, 0, self.config.queue_size)
            .detach();

        loss
    }

    fn momentum_update(&mut self, online: &ContrastiveNetworks<B>) {
        self.momentum_networks = ema_update(
            self.momentum_networks.clone(),
            online,
            self.config.momentum_coeff,
        );
    }
}

/// Any of the supported algorithms, chosen at runtime
#[derive(Debug)]
pub enum Algorithm<B: Backend> {
    SimClr(SimClr),
    BarlowTwins(BarlowTwins),
    MoCo(MoCo<B>),
}

impl<B: Backend> Algorithm<B> {
    /// Build the algorithm for `config`; MoCo snapshots `online` as its target
    pub fn from_config(
        config: AlgorithmConfig,
        online: &ContrastiveNetworks<B>,
        width: usize,
        device: &B::Device,
    ) -> Result<Self> {
        config.validate()?;
        debug!("Building {} with {:?}", config.kind(), config);

        Ok(match config {
            AlgorithmConfig::SimClr(config) => Algorithm::SimClr(SimClr { config }),
            AlgorithmConfig::BarlowTwins(config) => Algorithm::BarlowTwins(BarlowTwins { config }),
            AlgorithmConfig::MoCo(config) => {
                Algorithm::MoCo(MoCo::new(config, online, width, device))
            }
        })
    }
}

impl<B: Backend> ContrastiveAlgorithm<B> for Algorithm<B> {
    fn kind(&self) -> AlgorithmKind {
        match self {
            Algorithm::SimClr(_) => AlgorithmKind::SimClr,
            Algorithm::BarlowTwins(_) => AlgorithmKind::BarlowTwins,
            Algorithm::MoCo(_) => AlgorithmKind::MoCo,
        }
    }

    fn contrastive_loss(
        &mut self,
        views_1: Tensor<B, 4>,
        views_2: Tensor<B, 4>,
        projections_1: Tensor<B, 2>,
        projections_2: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        match self {
            Algorithm::SimClr(algorithm) => ContrastiveAlgorithm::<B>::contrastive_loss(
                algorithm,
                views_1,
                views_2,
                projections_1,
                projections_2,
            ),
            Algorithm::BarlowTwins(algorithm) => ContrastiveAlgorithm::<B>::contrastive_loss(
                algorithm,
                views_1,
                views_2,
                projections_1,
                projections_2,
            ),
            Algorithm::MoCo(algorithm) => {
                algorithm.contrastive_loss(views_1, views_2, projections_1, projections_2)
            }
        }
    }

    fn momentum_update(&mut self, online: &ContrastiveNetworks<B>) {
        if let Algorithm::MoCo(algorithm) = self {
            algorithm.momentum_update(online);
        }
    }
}
