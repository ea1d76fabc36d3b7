//! Host-side batches and their conversion to Burn tensors.

use burn::prelude::*;
use burn::tensor::TensorData;
use image::RgbImage;

use super::{ImageItem, CHANNELS, IMAGE_SIZE};
use crate::utils::error::{Result, SslError};

/// A batch of decoded `u8` RGB images, optionally with labels
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    /// Images, each `IMAGE_SIZE x IMAGE_SIZE`
    pub images: Vec<RgbImage>,
    /// Class labels (0-9), present for labeled splits
    pub labels: Option<Vec<usize>>,
}

impl RawBatch {
    /// Assemble a batch from fetched items
    ///
    /// A batch is labeled only if every item carries a label.
    pub fn from_items(items: Vec<ImageItem>) -> Result<Self> {
        let labeled = items.iter().filter(|item| item.label.is_some()).count();
        if labeled != 0 && labeled != items.len() {
            return Err(SslError::Dataset(format!(
                "mixed batch: {} of {} items are labeled",
                labeled,
                items.len()
            )));
        }

        let mut images = Vec::with_capacity(items.len());
        let mut labels = Vec::with_capacity(labeled);
        for item in items {
            images.push(item.image);
            if let Some(label) = item.label {
                labels.push(label);
            }
        }

        let labels = (labeled > 0).then_some(labels);
        Ok(Self { images, labels })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Host layout `[n, height, width, channels]`
    pub fn shape(&self) -> [usize; 4] {
        [self.len(), IMAGE_SIZE, IMAGE_SIZE, CHANNELS]
    }

    /// Labels as an integer tensor `[n]`
    pub fn labels_tensor<B: Backend>(&self, device: &B::Device) -> Result<Tensor<B, 1, Int>> {
        let labels = self
            .labels
            .as_ref()
            .ok_or_else(|| SslError::InvalidInput("batch has no labels".to_string()))?;

        let data: Vec<i64> = labels.iter().map(|&label| label as i64).collect();
        Ok(Tensor::<B, 1, Int>::from_data(
            TensorData::new(data, [labels.len()]),
            device,
        ))
    }

    /// Images of `self` followed by images of `other`; labels are dropped
    pub fn concat(&self, other: &RawBatch) -> RawBatch {
        let mut images = Vec::with_capacity(self.len() + other.len());
        images.extend(self.images.iter().cloned());
        images.extend(other.images.iter().cloned());
        RawBatch {
            images,
            labels: None,
        }
    }
}

/// One training step's worth of data: an unlabeled and a labeled batch
#[derive(Debug, Clone)]
pub struct TrainBatch {
    pub unlabeled: RawBatch,
    pub labeled: RawBatch,
}

impl TrainBatch {
    /// Combined number of images
    pub fn len(&self) -> usize {
        self.unlabeled.len() + self.labeled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Host layout of the combined images
    pub fn shape(&self) -> [usize; 4] {
        [self.len(), IMAGE_SIZE, IMAGE_SIZE, CHANNELS]
    }

    /// Unlabeled images followed by labeled images
    pub fn images(&self) -> RawBatch {
        self.unlabeled.concat(&self.labeled)
    }
}

/// Augmented `f32` views in channel-first layout, ready for upload
#[derive(Debug, Clone)]
pub struct ViewBatch {
    data: Vec<f32>,
    len: usize,
}

impl ViewBatch {
    /// Number of floats in one CHW image
    pub const IMAGE_LEN: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;

    /// Concatenate per-image CHW buffers
    pub fn from_images(images: Vec<Vec<f32>>) -> Result<Self> {
        let len = images.len();
        let mut data = Vec::with_capacity(len * Self::IMAGE_LEN);
        for image in images {
            if image.len() != Self::IMAGE_LEN {
                return Err(SslError::InvalidInput(format!(
                    "view has {} values, expected {}",
                    image.len(),
                    Self::IMAGE_LEN
                )));
            }
            data.extend(image);
        }
        Ok(Self { data, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Device layout `[n, channels, height, width]`
    pub fn shape(&self) -> [usize; 4] {
        [self.len, CHANNELS, IMAGE_SIZE, IMAGE_SIZE]
    }

    /// Raw CHW values of image `index`
    pub fn image(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(Self::IMAGE_LEN)?;
        self.data.get(start..start + Self::IMAGE_LEN)
    }

    /// Upload to the device as a `[n, 3, 96, 96]` tensor
    pub fn into_tensor<B: Backend>(self, device: &B::Device) -> Tensor<B, 4> {
        let shape = self.shape();
        Tensor::<B, 4>::from_floats(TensorData::new(self.data, shape), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::Rgb;

    type TestBackend = NdArray<f32>;

    fn item(label: Option<usize>) -> ImageItem {
        ImageItem {
            image: RgbImage::from_pixel(IMAGE_SIZE as u32, IMAGE_SIZE as u32, Rgb([1, 2, 3])),
            label,
        }
    }

    #[test]
    fn test_labeled_batch() {
        let batch = RawBatch::from_items(vec![item(Some(3)), item(Some(7))]).unwrap();
        assert_eq!(batch.shape(), [2, 96, 96, 3]);
        assert_eq!(batch.labels, Some(vec![3, 7]));

        let labels = batch.labels_tensor::<TestBackend>(&Default::default()).unwrap();
        assert_eq!(labels.dims(), [2]);
    }

    #[test]
    fn test_unlabeled_batch_has_no_label_tensor() {
        let batch = RawBatch::from_items(vec![item(None)]).unwrap();
        assert!(batch.labels.is_none());
        assert!(batch.labels_tensor::<TestBackend>(&Default::default()).is_err());
    }

    #[test]
    fn test_mixed_batch_rejected() {
        assert!(RawBatch::from_items(vec![item(None), item(Some(1))]).is_err());
    }

    #[test]
    fn test_train_batch_combines_splits() {
        let batch = TrainBatch {
            unlabeled: RawBatch::from_items(vec![item(None), item(None), item(None)]).unwrap(),
            labeled: RawBatch::from_items(vec![item(Some(0))]).unwrap(),
        };
        assert_eq!(batch.shape(), [4, 96, 96, 3]);
        assert_eq!(batch.images().len(), 4);
    }

    #[test]
    fn test_view_batch_tensor_layout() {
        let views = ViewBatch::from_images(vec![vec![0.5; ViewBatch::IMAGE_LEN]; 2]).unwrap();
        assert_eq!(views.shape(), [2, 3, 96, 96]);

        let tensor = views.into_tensor::<TestBackend>(&Default::default());
        assert_eq!(tensor.dims(), [2, 3, 96, 96]);
    }

    #[test]
    fn test_view_batch_rejects_wrong_size() {
        assert!(ViewBatch::from_images(vec![vec![0.0; 10]]).is_err());
    }
}
