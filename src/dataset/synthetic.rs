//! Procedurally generated corpus for dry runs and tests.
//!
//! Each class gets a fixed base colour and a diagonal gradient direction;
//! per-item noise comes from a `ChaCha8Rng` seeded with the item index, so the
//! same index always yields the same image.

use image::{Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{ImageDataset, ImageItem, IMAGE_SIZE, NUM_CLASSES};
use crate::utils::error::{Result, SslError};

/// Sizes and seed of a synthetic dataset triple
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyntheticConfig {
    #[serde(default = "default_unlabeled_len")]
    pub unlabeled_len: usize,
    #[serde(default = "default_labeled_len")]
    pub labeled_len: usize,
    #[serde(default = "default_test_len")]
    pub test_len: usize,
    #[serde(default = "default_synthetic_seed")]
    pub seed: u64,
}

fn default_unlabeled_len() -> usize {
    400
}
fn default_labeled_len() -> usize {
    40
}
fn default_test_len() -> usize {
    40
}
fn default_synthetic_seed() -> u64 {
    7
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            unlabeled_len: default_unlabeled_len(),
            labeled_len: default_labeled_len(),
            test_len: default_test_len(),
            seed: default_synthetic_seed(),
        }
    }
}

/// Deterministic synthetic split
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    len: usize,
    labeled: bool,
    seed: u64,
}

impl SyntheticDataset {
    pub fn new(len: usize, labeled: bool, seed: u64) -> Self {
        Self { len, labeled, seed }
    }

    fn class_colour(class: usize) -> [f32; 3] {
        [
            ((class * 53 + 20) % 256) as f32,
            ((class * 97 + 60) % 256) as f32,
            ((class * 151 + 110) % 256) as f32,
        ]
    }

    fn render(&self, index: usize, class: usize) -> RgbImage {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ (index as u64).wrapping_mul(0x9E37_79B9));
        let base = Self::class_colour(class);
        let flip = class % 2 == 1;
        let size = IMAGE_SIZE as f32;

        RgbImage::from_fn(IMAGE_SIZE as u32, IMAGE_SIZE as u32, |x, y| {
            let t = if flip { x as f32 } else { y as f32 } / size;
            let shade = 0.6 + 0.4 * t;
            let mut pixel = [0u8; 3];
            for (c, value) in pixel.iter_mut().enumerate() {
                let noise: f32 = rng.gen_range(-24.0..24.0);
                *value = (base[c] * shade + noise).clamp(0.0, 255.0) as u8;
            }
            Rgb(pixel)
        })
    }
}

impl ImageDataset for SyntheticDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<ImageItem> {
        if index >= self.len {
            return Err(SslError::InvalidInput(format!(
                "index {} out of range for synthetic split of {} images",
                index, self.len
            )));
        }

        let class = index % NUM_CLASSES;
        Ok(ImageItem {
            image: self.render(index, class),
            label: self.labeled.then_some(class),
        })
    }

    fn is_labeled(&self) -> bool {
        self.labeled
    }
}
