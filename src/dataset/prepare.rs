//! Dataset preparation
//!
//! Derives the batch sizes from a steps-per-epoch budget and hands out the
//! three batch streams consumed by the fit loop:
//!
//! - **train**: `steps_per_epoch` zipped (unlabeled, labeled) batches, both
//!   splits reshuffled every epoch, remainders dropped
//! - **labeled train**: `steps_per_epoch` batches of `labeled_batch_size`
//!   labeled images, remainder dropped
//! - **test**: the test split in order, `batch_size` at a time
//!
//! For STL-10 with 200 steps this gives 100000/200 = 500 unlabeled plus
//! 5000/200 = 25 labeled images per step, i.e. a batch size of 525.

use std::path::PathBuf;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::stl10::{resolve_root, Stl10Dataset, Stl10Split};
use super::synthetic::{SyntheticConfig, SyntheticDataset};
use super::{ImageDataset, RawBatch, TrainBatch};
use crate::utils::error::{Result, SslError};

/// Where the images come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    /// STL-10 binary distribution
    Stl10 {
        /// `stl10_binary` directory or its parent
        dir: PathBuf,
        /// Cap on unlabeled images, for quick runs
        #[serde(default)]
        max_unlabeled: Option<usize>,
    },
    /// Procedurally generated images
    Synthetic(SyntheticConfig),
}

impl Default for DataSource {
    fn default() -> Self {
        DataSource::Stl10 {
            dir: PathBuf::from("data"),
            max_unlabeled: None,
        }
    }
}

impl DataSource {
    /// Open the unlabeled, labeled and test splits
    pub fn open(&self) -> Result<DatasetTriple> {
        match self {
            DataSource::Stl10 { dir, max_unlabeled } => {
                let root = resolve_root(dir)?;
                info!("Loading STL-10 from {:?}", root);
                Ok(DatasetTriple {
                    unlabeled: Arc::new(Stl10Dataset::open(
                        &root,
                        Stl10Split::Unlabeled,
                        *max_unlabeled,
                    )?),
                    labeled: Arc::new(Stl10Dataset::open(&root, Stl10Split::Train, None)?),
                    test: Arc::new(Stl10Dataset::open(&root, Stl10Split::Test, None)?),
                })
            }
            DataSource::Synthetic(config) => {
                info!(
                    "Using synthetic data: {} unlabeled, {} labeled, {} test",
                    config.unlabeled_len, config.labeled_len, config.test_len
                );
                Ok(DatasetTriple {
                    unlabeled: Arc::new(SyntheticDataset::new(
                        config.unlabeled_len,
                        false,
                        config.seed,
                    )),
                    labeled: Arc::new(SyntheticDataset::new(
                        config.labeled_len,
                        true,
                        config.seed.wrapping_add(1),
                    )),
                    test: Arc::new(SyntheticDataset::new(
                        config.test_len,
                        true,
                        config.seed.wrapping_add(2),
                    )),
                })
            }
        }
    }
}

/// The three splits of a corpus
#[derive(Clone)]
pub struct DatasetTriple {
    pub unlabeled: Arc<dyn ImageDataset>,
    pub labeled: Arc<dyn ImageDataset>,
    pub test: Arc<dyn ImageDataset>,
}

/// Split sizes and derived batch sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub unlabeled_len: usize,
    pub labeled_len: usize,
    pub test_len: usize,
    pub steps_per_epoch: usize,
    pub unlabeled_batch_size: usize,
    pub labeled_batch_size: usize,
    pub batch_size: usize,
    pub test_batches: usize,
}

/// Splits plus the batch geometry derived from them
#[derive(Clone)]
pub struct PreparedDatasets {
    splits: DatasetTriple,
    steps_per_epoch: usize,
    unlabeled_batch_size: usize,
    labeled_batch_size: usize,
}

impl std::fmt::Debug for PreparedDatasets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedDatasets")
            .field("stats", &self.stats())
            .finish()
    }
}

impl PreparedDatasets {
    /// Derive batch sizes so that one epoch of `steps_per_epoch` steps covers
    /// each training split once
    pub fn new(steps_per_epoch: usize, splits: DatasetTriple) -> Result<Self> {
        if steps_per_epoch == 0 {
            return Err(SslError::Config("steps_per_epoch must be positive".into()));
        }
        if !splits.labeled.is_labeled() || !splits.test.is_labeled() {
            return Err(SslError::Config(
                "labeled train and test splits must carry labels".into(),
            ));
        }
        if splits.test.is_empty() {
            return Err(SslError::Config("test split is empty".into()));
        }

        let unlabeled_batch_size = splits.unlabeled.len() / steps_per_epoch;
        let labeled_batch_size = splits.labeled.len() / steps_per_epoch;
        if unlabeled_batch_size == 0 || labeled_batch_size == 0 {
            return Err(SslError::Config(format!(
                "{} steps per epoch leave no room for a batch ({} unlabeled, {} labeled images)",
                steps_per_epoch,
                splits.unlabeled.len(),
                splits.labeled.len()
            )));
        }

        Ok(Self {
            splits,
            steps_per_epoch,
            unlabeled_batch_size,
            labeled_batch_size,
        })
    }

    pub fn steps_per_epoch(&self) -> usize {
        self.steps_per_epoch
    }

    pub fn unlabeled_batch_size(&self) -> usize {
        self.unlabeled_batch_size
    }

    pub fn labeled_batch_size(&self) -> usize {
        self.labeled_batch_size
    }

    /// Images per training step, unlabeled plus labeled
    pub fn batch_size(&self) -> usize {
        self.unlabeled_batch_size + self.labeled_batch_size
    }

    pub fn splits(&self) -> &DatasetTriple {
        &self.splits
    }

    pub fn num_test_batches(&self) -> usize {
        self.splits.test.len().div_ceil(self.batch_size())
    }

    pub fn stats(&self) -> DatasetStats {
        DatasetStats {
            unlabeled_len: self.splits.unlabeled.len(),
            labeled_len: self.splits.labeled.len(),
            test_len: self.splits.test.len(),
            steps_per_epoch: self.steps_per_epoch,
            unlabeled_batch_size: self.unlabeled_batch_size,
            labeled_batch_size: self.labeled_batch_size,
            batch_size: self.batch_size(),
            test_batches: self.num_test_batches(),
        }
    }

    /// One epoch of zipped (unlabeled, labeled) batches
    pub fn train_batches<'a>(
        &'a self,
        rng: &mut ChaCha8Rng,
    ) -> impl Iterator<Item = Result<TrainBatch>> + 'a {
        self.unlabeled_batches(rng)
            .zip(self.labeled_batches(rng))
            .map(|(unlabeled, labeled)| {
                Ok(TrainBatch {
                    unlabeled: unlabeled?,
                    labeled: labeled?,
                })
            })
    }

    fn unlabeled_batches<'a>(
        &'a self,
        rng: &mut ChaCha8Rng,
    ) -> impl Iterator<Item = Result<RawBatch>> + 'a {
        self.epoch_batches(self.splits.unlabeled.as_ref(), self.unlabeled_batch_size, rng)
    }

    /// Shuffled labeled batches, `steps_per_epoch` of `labeled_batch_size`
    pub fn labeled_batches<'a>(
        &'a self,
        rng: &mut ChaCha8Rng,
    ) -> impl Iterator<Item = Result<RawBatch>> + 'a {
        self.epoch_batches(self.splits.labeled.as_ref(), self.labeled_batch_size, rng)
    }

    fn epoch_batches<'a>(
        &'a self,
        dataset: &'a dyn ImageDataset,
        batch_size: usize,
        rng: &mut ChaCha8Rng,
    ) -> impl Iterator<Item = Result<RawBatch>> + 'a {
        let order = shuffled_indices(dataset.len(), rng);

        (0..self.steps_per_epoch)
            .map(move |step| fetch_batch(dataset, batch_window(&order, step, batch_size)))
    }

    /// The test split in order; the last batch may be short
    pub fn test_batches(&self) -> impl Iterator<Item = Result<RawBatch>> + '_ {
        let len = self.splits.test.len();
        let batch_size = self.batch_size();

        (0..self.num_test_batches()).map(move |step| {
            let start = step * batch_size;
            let indices: Vec<usize> = (start..(start + batch_size).min(len)).collect();
            fetch_batch(self.splits.test.as_ref(), &indices)
        })
    }
}

/// Open `source` and derive batch sizes for `steps_per_epoch`
pub fn prepare_dataset(steps_per_epoch: usize, source: &DataSource) -> Result<PreparedDatasets> {
    let prepared = PreparedDatasets::new(steps_per_epoch, source.open()?)?;
    let stats = prepared.stats();
    info!(
        "Batch size {} ({} unlabeled + {} labeled) over {} steps per epoch",
        stats.batch_size, stats.unlabeled_batch_size, stats.labeled_batch_size, stats.steps_per_epoch
    );
    Ok(prepared)
}

fn shuffled_indices(len: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);
    indices
}

fn batch_window(order: &[usize], step: usize, batch_size: usize) -> &[usize] {
    &order[step * batch_size..(step + 1) * batch_size]
}

/// Fetch items in parallel, preserving index order
fn fetch_batch(dataset: &dyn ImageDataset, indices: &[usize]) -> Result<RawBatch> {
    let items = indices
        .par_iter()
        .map(|&index| dataset.get(index))
        .collect::<Result<Vec<_>>>()?;
    RawBatch::from_items(items)
}
