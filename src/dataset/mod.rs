//! Dataset module for STL-10 style image corpora
//!
//! This module provides functionality for:
//! - Reading the STL-10 binary distribution (labeled train/test, unlabeled)
//! - Generating small synthetic corpora for dry runs and tests
//! - Deriving batch sizes from a steps-per-epoch budget and yielding batches
//! - Stochastic view augmentation (flip, resized crop, colour jitter)
//!
//! ## Batch Layout
//!
//! Host batches (`RawBatch`) keep images as `u8` RGB, `[n, 96, 96, 3]`.
//! Augmented views (`ViewBatch`) are `f32` in `[0, 1]`, channel-first
//! `[n, 3, 96, 96]`, which is the layout Burn's convolutions expect.

pub mod augmentation;
pub mod batch;
pub mod prepare;
pub mod stl10;
pub mod synthetic;

use image::RgbImage;

use crate::utils::error::Result;

// Re-export main types for convenience
pub use augmentation::{AugmentationConfig, Augmenter};
pub use batch::{RawBatch, TrainBatch, ViewBatch};
pub use prepare::{prepare_dataset, DataSource, DatasetStats, DatasetTriple, PreparedDatasets};
pub use stl10::{Stl10Dataset, Stl10Split};
pub use synthetic::{SyntheticConfig, SyntheticDataset};

/// Image height and width
pub const IMAGE_SIZE: usize = 96;

/// RGB
pub const CHANNELS: usize = 3;

/// Number of STL-10 classes
pub const NUM_CLASSES: usize = 10;

/// A single decoded image with its class label, if the split is labeled
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub image: RgbImage,
    pub label: Option<usize>,
}

/// Random-access image corpus
///
/// Implementations must be safe to read from several rayon workers at once.
pub trait ImageDataset: Send + Sync {
    /// Number of items in the split
    fn len(&self) -> usize;

    /// Fetch one item
    fn get(&self, index: usize) -> Result<ImageItem>;

    /// Whether every item carries a label
    fn is_labeled(&self) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
