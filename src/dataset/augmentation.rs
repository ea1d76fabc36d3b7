//! View Augmentation Module
//!
//! Produces the stochastic views that contrastive training compares. Every
//! image goes through the same fixed stage order:
//!
//! 1. **Rescaling**: `u8` pixels to `f32` in `[0, 1]`
//! 2. **Random flip**: horizontal mirror with probability 0.5
//! 3. **Random resized crop**: crop a random area fraction and aspect ratio,
//!    resize back to 96x96
//! 4. **Random colour jitter**: brightness, contrast, saturation and hue, each
//!    with its own random factor, applied in a random order
//!
//! # Presets
//!
//! - **Contrastive**: aggressive crops and jitter, used for the two views
//! - **Classification**: milder settings, used for the linear probe
//! - **Inference**: rescaling only (`Augmenter::preprocess`)
//!
//! Work is parallel over the images of a batch. Each image draws from its own
//! `ChaCha8Rng` stream derived from one per-batch seed, so a batch is
//! reproducible for a given caller RNG no matter how rayon schedules it.

use image::imageops::{self, FilterType};
use image::{Rgb, Rgb32FImage, RgbImage};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{ViewBatch, CHANNELS, IMAGE_SIZE};
use crate::utils::error::{Result, SslError};

/// Grey weights used for contrast and saturation blending
const LUMA: [f32; 3] = [0.2989, 0.587, 0.114];

/// Configuration for one augmentation pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Multiplier applied to raw `u8` pixel values
    pub rescale: f32,
    /// Probability of a horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Range of the cropped area as a fraction of the image
    pub crop_scale: (f32, f32),
    /// Range of the crop aspect ratio (width / height)
    pub crop_ratio: (f32, f32),
    /// Brightness factor range (1.0 ± brightness)
    pub brightness: f32,
    /// Contrast factor range (1.0 ± contrast)
    pub contrast: f32,
    /// Saturation factor range (1.0 ± saturation)
    pub saturation: f32,
    /// Hue rotation range in turns (± hue)
    pub hue: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self::contrastive()
    }
}

impl AugmentationConfig {
    /// Aggressive preset for the two contrastive views
    pub fn contrastive() -> Self {
        Self {
            rescale: 1.0 / 255.0,
            horizontal_flip_prob: 0.5,
            crop_scale: (0.2, 1.0),
            crop_ratio: (3.0 / 4.0, 4.0 / 3.0),
            brightness: 0.5,
            contrast: 0.5,
            saturation: 0.5,
            hue: 0.2,
        }
    }

    /// Milder preset for the linear probe
    pub fn classification() -> Self {
        Self {
            rescale: 1.0 / 255.0,
            horizontal_flip_prob: 0.5,
            crop_scale: (0.5, 1.0),
            crop_ratio: (3.0 / 4.0, 4.0 / 3.0),
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.2,
            hue: 0.1,
        }
    }

    /// Rescaling only
    pub fn none() -> Self {
        Self {
            rescale: 1.0 / 255.0,
            horizontal_flip_prob: 0.0,
            crop_scale: (1.0, 1.0),
            crop_ratio: (1.0, 1.0),
            brightness: 0.0,
            contrast: 0.0,
            saturation: 0.0,
            hue: 0.0,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let (scale_min, scale_max) = self.crop_scale;
        if !(scale_min > 0.0 && scale_min <= scale_max && scale_max <= 1.0) {
            return Err(SslError::Config(format!(
                "crop_scale must satisfy 0 < min <= max <= 1, got {:?}",
                self.crop_scale
            )));
        }

        let (ratio_min, ratio_max) = self.crop_ratio;
        if !(ratio_min > 0.0 && ratio_min <= ratio_max) {
            return Err(SslError::Config(format!(
                "crop_ratio must satisfy 0 < min <= max, got {:?}",
                self.crop_ratio
            )));
        }

        if !(0.0..=1.0).contains(&self.horizontal_flip_prob) {
            return Err(SslError::Config(
                "horizontal_flip_prob must be in [0, 1]".to_string(),
            ));
        }

        for (name, value) in [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SslError::Config(format!("{name} must be in [0, 1]")));
            }
        }

        if !(0.0..=0.5).contains(&self.hue) {
            return Err(SslError::Config("hue must be in [0, 0.5]".to_string()));
        }

        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Jitter {
    Brightness,
    Contrast,
    Saturation,
    Hue,
}

/// Uniform sample in `[low, high)`; degenerate ranges return `low`
fn uniform(rng: &mut ChaCha8Rng, low: f32, high: f32) -> f32 {
    low + (high - low) * rng.gen::<f32>()
}

fn luma(pixel: &Rgb<f32>) -> f32 {
    LUMA[0] * pixel[0] + LUMA[1] * pixel[1] + LUMA[2] * pixel[2]
}

/// Stochastic view generator
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: u32,
}

impl Augmenter {
    /// Create a new augmenter with the given configuration
    pub fn new(config: AugmentationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            image_size: IMAGE_SIZE as u32,
        })
    }

    /// Preset for the two contrastive views
    pub fn contrastive() -> Self {
        Self {
            config: AugmentationConfig::contrastive(),
            image_size: IMAGE_SIZE as u32,
        }
    }

    /// Preset for the linear probe
    pub fn classification() -> Self {
        Self {
            config: AugmentationConfig::classification(),
            image_size: IMAGE_SIZE as u32,
        }
    }

    /// Produce one augmented view of every image
    ///
    /// The input is only read; the output has the same number of images.
    pub fn augment(&self, images: &[RgbImage], rng: &mut ChaCha8Rng) -> Result<ViewBatch> {
        let batch_seed: u64 = rng.gen();

        let views = images
            .par_iter()
            .enumerate()
            .map(|(index, image)| {
                let mut image_rng = ChaCha8Rng::seed_from_u64(batch_seed);
                image_rng.set_stream(index as u64);
                self.augment_one(image, &mut image_rng)
            })
            .collect::<Result<Vec<_>>>()?;

        ViewBatch::from_images(views)
    }

    /// Inference path: rescaling only
    pub fn preprocess(&self, images: &[RgbImage]) -> Result<ViewBatch> {
        let views = images
            .par_iter()
            .map(|image| {
                self.check_size(image)?;
                Ok(to_chw(&self.rescale(image)))
            })
            .collect::<Result<Vec<_>>>()?;

        ViewBatch::from_images(views)
    }

    fn check_size(&self, image: &RgbImage) -> Result<()> {
        if image.dimensions() != (self.image_size, self.image_size) {
            return Err(SslError::InvalidInput(format!(
                "expected {}x{} image, got {:?}",
                self.image_size,
                self.image_size,
                image.dimensions()
            )));
        }
        Ok(())
    }

    fn augment_one(&self, image: &RgbImage, rng: &mut ChaCha8Rng) -> Result<Vec<f32>> {
        self.check_size(image)?;

        let mut view = self.rescale(image);

        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            view = imageops::flip_horizontal(&view);
        }

        view = self.random_resized_crop(&view, rng);
        self.color_jitter(&mut view, rng);

        Ok(to_chw(&view))
    }

    fn rescale(&self, image: &RgbImage) -> Rgb32FImage {
        let scale = self.config.rescale;
        Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
            let pixel = image.get_pixel(x, y);
            Rgb([
                pixel[0] as f32 * scale,
                pixel[1] as f32 * scale,
                pixel[2] as f32 * scale,
            ])
        })
    }

    /// Crop a random box and resize it back to the full image size
    ///
    /// Box height and width are fractions `sqrt(s / r)` and `sqrt(s * r)` of
    /// the image for area fraction `s` and log-uniform aspect ratio `r`.
    fn random_resized_crop(&self, image: &Rgb32FImage, rng: &mut ChaCha8Rng) -> Rgb32FImage {
        let (scale_min, scale_max) = self.config.crop_scale;
        let (ratio_min, ratio_max) = self.config.crop_ratio;

        let scale = uniform(rng, scale_min, scale_max);
        let ratio = uniform(rng, ratio_min.ln(), ratio_max.ln()).exp();

        let height = (scale / ratio).sqrt().clamp(0.0, 1.0);
        let width = (scale * ratio).sqrt().clamp(0.0, 1.0);
        let top = rng.gen::<f32>() * (1.0 - height);
        let left = rng.gen::<f32>() * (1.0 - width);

        let size = self.image_size as f32;
        let crop_height = ((height * size).round() as u32).clamp(1, self.image_size);
        let crop_width = ((width * size).round() as u32).clamp(1, self.image_size);
        let y = ((top * size) as u32).min(self.image_size - crop_height);
        let x = ((left * size) as u32).min(self.image_size - crop_width);

        if crop_width == self.image_size && crop_height == self.image_size {
            return image.clone();
        }

        let cropped = imageops::crop_imm(image, x, y, crop_width, crop_height).to_image();
        imageops::resize(&cropped, self.image_size, self.image_size, FilterType::Triangle)
    }

    /// Apply the four jitter transforms in a random order, clipping after each
    fn color_jitter(&self, image: &mut Rgb32FImage, rng: &mut ChaCha8Rng) {
        let mut order = [
            Jitter::Brightness,
            Jitter::Contrast,
            Jitter::Saturation,
            Jitter::Hue,
        ];
        order.shuffle(rng);

        for jitter in order {
            match jitter {
                Jitter::Brightness if self.config.brightness > 0.0 => {
                    let factor = 1.0 + uniform(rng, -self.config.brightness, self.config.brightness);
                    adjust_brightness(image, factor);
                }
                Jitter::Contrast if self.config.contrast > 0.0 => {
                    let factor = 1.0 + uniform(rng, -self.config.contrast, self.config.contrast);
                    adjust_contrast(image, factor);
                }
                Jitter::Saturation if self.config.saturation > 0.0 => {
                    let factor = 1.0 + uniform(rng, -self.config.saturation, self.config.saturation);
                    adjust_saturation(image, factor);
                }
                Jitter::Hue if self.config.hue > 0.0 => {
                    let turns = uniform(rng, -self.config.hue, self.config.hue);
                    rotate_hue(image, turns);
                }
                _ => {}
            }
        }
    }
}

fn adjust_brightness(image: &mut Rgb32FImage, factor: f32) {
    for pixel in image.pixels_mut() {
        for value in pixel.0.iter_mut() {
            *value = (*value * factor).clamp(0.0, 1.0);
        }
    }
}

/// Blend each pixel with the mean grey level of the image
fn adjust_contrast(image: &mut Rgb32FImage, factor: f32) {
    let count = (image.width() * image.height()).max(1) as f32;
    let mean = image.pixels().map(luma).sum::<f32>() / count;

    for pixel in image.pixels_mut() {
        for value in pixel.0.iter_mut() {
            *value = (mean + factor * (*value - mean)).clamp(0.0, 1.0);
        }
    }
}

/// Blend each pixel with its own grey level
fn adjust_saturation(image: &mut Rgb32FImage, factor: f32) {
    for pixel in image.pixels_mut() {
        let grey = luma(pixel);
        for value in pixel.0.iter_mut() {
            *value = (grey + factor * (*value - grey)).clamp(0.0, 1.0);
        }
    }
}

/// Rotate chroma in YIQ space by `turns` of a full circle
fn rotate_hue(image: &mut Rgb32FImage, turns: f32) {
    let (sin, cos) = (turns * std::f32::consts::TAU).sin_cos();

    for pixel in image.pixels_mut() {
        let [r, g, b] = pixel.0;
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        let i = 0.596 * r - 0.274 * g - 0.322 * b;
        let q = 0.211 * r - 0.523 * g + 0.312 * b;

        let i_rot = i * cos - q * sin;
        let q_rot = i * sin + q * cos;

        pixel.0 = [
            (y + 0.956 * i_rot + 0.621 * q_rot).clamp(0.0, 1.0),
            (y - 0.272 * i_rot - 0.647 * q_rot).clamp(0.0, 1.0),
            (y - 1.106 * i_rot + 1.703 * q_rot).clamp(0.0, 1.0),
        ];
    }
}

/// Flatten HWC pixels into a CHW buffer
fn to_chw(image: &Rgb32FImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let mut data = Vec::with_capacity(CHANNELS * height as usize * width as usize);

    for c in 0..CHANNELS {
        for y in 0..height {
            for x in 0..width {
                data.push(image.get_pixel(x, y)[c]);
            }
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_images(count: usize) -> Vec<RgbImage> {
        (0..count)
            .map(|i| {
                RgbImage::from_fn(96, 96, |x, y| {
                    Rgb([(x * 2) as u8, (y * 2) as u8, (i * 40) as u8])
                })
            })
            .collect()
    }

    #[test]
    fn test_presets_validate() {
        assert!(AugmentationConfig::contrastive().validate().is_ok());
        assert!(AugmentationConfig::classification().validate().is_ok());
        assert!(AugmentationConfig::none().validate().is_ok());
    }

    #[test]
    fn test_invalid_scale_rejected() {
        let config = AugmentationConfig {
            crop_scale: (0.8, 0.2),
            ..AugmentationConfig::contrastive()
        };
        assert!(Augmenter::new(config).is_err());
    }

    #[test]
    fn test_output_shape_matches_input() {
        let images = create_test_images(3);
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for augmenter in [Augmenter::contrastive(), Augmenter::classification()] {
            let views = augmenter.augment(&images, &mut rng).unwrap();
            assert_eq!(views.shape(), [3, 3, 96, 96]);
        }
    }

    #[test]
    fn test_values_stay_in_unit_range() {
        let images = create_test_images(4);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let views = Augmenter::contrastive().augment(&images, &mut rng).unwrap();

        for i in 0..views.len() {
            let image = views.image(i).unwrap();
            assert!(image.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_augment_is_deterministic_per_seed() {
        let images = create_test_images(2);
        let augmenter = Augmenter::contrastive();

        let a = augmenter
            .augment(&images, &mut ChaCha8Rng::seed_from_u64(9))
            .unwrap();
        let b = augmenter
            .augment(&images, &mut ChaCha8Rng::seed_from_u64(9))
            .unwrap();
        assert_eq!(a.image(0), b.image(0));
        assert_eq!(a.image(1), b.image(1));
    }

    #[test]
    fn test_two_views_differ() {
        let images = create_test_images(1);
        let augmenter = Augmenter::contrastive();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let first = augmenter.augment(&images, &mut rng).unwrap();
        let second = augmenter.augment(&images, &mut rng).unwrap();
        assert_ne!(first.image(0), second.image(0));
    }

    #[test]
    fn test_preprocess_only_rescales() {
        let images = create_test_images(1);
        let views = Augmenter::classification().preprocess(&images).unwrap();
        let data = views.image(0).unwrap();

        // red channel of pixel (x = 5, y = 0) is 10
        assert!((data[5] - 10.0 / 255.0).abs() < 1e-6);
        // green channel plane starts after 96 * 96 values; pixel (0, 7) is 14
        assert!((data[96 * 96 + 7 * 96] - 14.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_flip_only_mirrors() {
        let config = AugmentationConfig {
            horizontal_flip_prob: 1.0,
            ..AugmentationConfig::none()
        };
        let augmenter = Augmenter::new(config).unwrap();
        let images = create_test_images(1);
        let views = augmenter
            .augment(&images, &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        let data = views.image(0).unwrap();

        // red channel of the first output pixel comes from x = 95
        assert!((data[0] - 190.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_wrong_size_rejected() {
        let images = vec![RgbImage::new(32, 32)];
        assert!(Augmenter::contrastive().preprocess(&images).is_err());
    }

    #[test]
    fn test_saturation_zero_gives_grey() {
        let mut image = Rgb32FImage::from_pixel(2, 2, Rgb([1.0, 0.0, 0.0]));
        adjust_saturation(&mut image, 0.0);
        let pixel = image.get_pixel(0, 0);
        assert!((pixel[0] - pixel[1]).abs() < 1e-6);
        assert!((pixel[1] - pixel[2]).abs() < 1e-6);
    }

    #[test]
    fn test_hue_full_turn_is_identity() {
        let mut image = Rgb32FImage::from_pixel(1, 1, Rgb([0.6, 0.3, 0.2]));
        rotate_hue(&mut image, 1.0);
        let pixel = image.get_pixel(0, 0);
        assert!((pixel[0] - 0.6).abs() < 1e-2);
        assert!((pixel[1] - 0.3).abs() < 1e-2);
        assert!((pixel[2] - 0.2).abs() < 1e-2);
    }
}
