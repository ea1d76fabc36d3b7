//! STL-10 binary reader
//!
//! The binary distribution (`stl10_binary/`) stores every image as 27648 raw
//! bytes: three channel planes, each plane column-major, so pixel `(x, y)` of
//! channel `c` sits at byte `c * 96 * 96 + x * 96 + y`. Label files hold one
//! byte per image in `1..=10`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tracing::{debug, info};

use super::{ImageDataset, ImageItem, CHANNELS, IMAGE_SIZE, NUM_CLASSES};
use crate::utils::error::{Result, ResultExt, SslError};

/// Bytes per encoded image
pub const IMAGE_BYTES: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;

const PLANE: usize = IMAGE_SIZE * IMAGE_SIZE;

/// The three splits of the binary distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stl10Split {
    /// 5000 labeled training images
    Train,
    /// 8000 labeled test images
    Test,
    /// 100000 unlabeled images
    Unlabeled,
}

impl Stl10Split {
    pub fn image_file(&self) -> &'static str {
        match self {
            Stl10Split::Train => "train_X.bin",
            Stl10Split::Test => "test_X.bin",
            Stl10Split::Unlabeled => "unlabeled_X.bin",
        }
    }

    pub fn label_file(&self) -> Option<&'static str> {
        match self {
            Stl10Split::Train => Some("train_y.bin"),
            Stl10Split::Test => Some("test_y.bin"),
            Stl10Split::Unlabeled => None,
        }
    }

    /// Size of the split in the official release
    pub fn official_len(&self) -> usize {
        match self {
            Stl10Split::Train => 5_000,
            Stl10Split::Test => 8_000,
            Stl10Split::Unlabeled => 100_000,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stl10Split::Train => "train",
            Stl10Split::Test => "test",
            Stl10Split::Unlabeled => "unlabeled",
        }
    }
}

/// Resolve the directory holding the `.bin` files
///
/// Accepts either the `stl10_binary` directory itself or its parent.
pub fn resolve_root(dir: &Path) -> Result<PathBuf> {
    let nested = dir.join("stl10_binary");
    if nested.join(Stl10Split::Train.image_file()).exists() {
        return Ok(nested);
    }
    if dir.join(Stl10Split::Train.image_file()).exists() {
        return Ok(dir.to_path_buf());
    }
    Err(SslError::PathNotFound(
        dir.join(Stl10Split::Train.image_file()),
    ))
}

/// Decode one encoded image into an `RgbImage`
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.len() != IMAGE_BYTES {
        return Err(SslError::Dataset(format!(
            "encoded image has {} bytes, expected {}",
            bytes.len(),
            IMAGE_BYTES
        )));
    }

    Ok(RgbImage::from_fn(IMAGE_SIZE as u32, IMAGE_SIZE as u32, |x, y| {
        let offset = x as usize * IMAGE_SIZE + y as usize;
        Rgb([
            bytes[offset],
            bytes[PLANE + offset],
            bytes[2 * PLANE + offset],
        ])
    }))
}

/// Read a label file and shift labels to `0..10`
fn read_labels(path: &Path) -> Result<Vec<usize>> {
    if !path.exists() {
        return Err(SslError::PathNotFound(path.to_path_buf()));
    }
    let raw = std::fs::read(path)?;
    raw.iter()
        .enumerate()
        .map(|(i, &label)| {
            let label = label as usize;
            if (1..=NUM_CLASSES).contains(&label) {
                Ok(label - 1)
            } else {
                Err(SslError::Dataset(format!(
                    "{}: label {} at index {} outside 1..={}",
                    path.display(),
                    label,
                    i,
                    NUM_CLASSES
                )))
            }
        })
        .collect()
}

enum Storage {
    /// Whole split held in memory
    Cached(Vec<u8>),
    /// Images read on demand from the file
    Lazy,
}

/// One split of STL-10
pub struct Stl10Dataset {
    split: Stl10Split,
    images_path: PathBuf,
    storage: Storage,
    labels: Option<Vec<usize>>,
    len: usize,
}

impl std::fmt::Debug for Stl10Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stl10Dataset")
            .field("split", &self.split)
            .field("path", &self.images_path)
            .field("len", &self.len)
            .field("cached", &matches!(self.storage, Storage::Cached(_)))
            .finish()
    }
}

impl Stl10Dataset {
    /// Open a split under `root` (the directory holding the `.bin` files)
    ///
    /// Labeled splits are loaded into memory; the unlabeled split is read
    /// lazily. `limit` caps the number of items exposed.
    pub fn open(root: &Path, split: Stl10Split, limit: Option<usize>) -> Result<Self> {
        let images_path = root.join(split.image_file());
        if !images_path.exists() {
            return Err(SslError::PathNotFound(images_path));
        }

        let file_len = std::fs::metadata(&images_path)?.len() as usize;
        if file_len % IMAGE_BYTES != 0 {
            return Err(SslError::Dataset(format!(
                "{}: size {} is not a multiple of {}",
                images_path.display(),
                file_len,
                IMAGE_BYTES
            )));
        }
        let available = file_len / IMAGE_BYTES;
        let len = limit.map_or(available, |limit| limit.min(available));

        if available != split.official_len() {
            debug!(
                "{} split has {} images (official release: {})",
                split.name(),
                available,
                split.official_len()
            );
        }

        let labels = match split.label_file() {
            Some(file) => {
                let mut labels = read_labels(&root.join(file))?;
                if labels.len() != available {
                    return Err(SslError::Dataset(format!(
                        "{} split has {} images but {} labels",
                        split.name(),
                        available,
                        labels.len()
                    )));
                }
                labels.truncate(len);
                Some(labels)
            }
            None => None,
        };

        let storage = if labels.is_some() {
            let mut bytes = std::fs::read(&images_path)
                .with_context(|| format!("Failed to read {}", images_path.display()))?;
            bytes.truncate(len * IMAGE_BYTES);
            Storage::Cached(bytes)
        } else {
            Storage::Lazy
        };

        info!(
            "Opened STL-10 {} split: {} images{}",
            split.name(),
            len,
            if labels.is_some() { " (cached)" } else { "" }
        );

        Ok(Self {
            split,
            images_path,
            storage,
            labels,
            len,
        })
    }

    pub fn split(&self) -> Stl10Split {
        self.split
    }

    fn read_encoded(&self, index: usize) -> Result<Vec<u8>> {
        match &self.storage {
            Storage::Cached(bytes) => {
                let start = index * IMAGE_BYTES;
                Ok(bytes[start..start + IMAGE_BYTES].to_vec())
            }
            Storage::Lazy => {
                let mut file = File::open(&self.images_path)?;
                file.seek(SeekFrom::Start((index * IMAGE_BYTES) as u64))?;
                let mut buffer = vec![0u8; IMAGE_BYTES];
                file.read_exact(&mut buffer)?;
                Ok(buffer)
            }
        }
    }
}

impl ImageDataset for Stl10Dataset {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<ImageItem> {
        if index >= self.len {
            return Err(SslError::InvalidInput(format!(
                "index {} out of range for {} split of {} images",
                index,
                self.split.name(),
                self.len
            )));
        }

        let image = decode_image(&self.read_encoded(index)?)?;
        let label = self.labels.as_ref().map(|labels| labels[index]);
        Ok(ImageItem { image, label })
    }

    fn is_labeled(&self) -> bool {
        self.labels.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Image whose every byte encodes its own (channel, x, y) position
    fn encoded_image(seed: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; IMAGE_BYTES];
        for c in 0..CHANNELS {
            for x in 0..IMAGE_SIZE {
                for y in 0..IMAGE_SIZE {
                    bytes[c * PLANE + x * IMAGE_SIZE + y] =
                        seed.wrapping_add((c * 50 + x + 2 * y) as u8);
                }
            }
        }
        bytes
    }

    fn write_split(dir: &Path, split: Stl10Split, labels: Option<&[u8]>, count: usize) {
        let images: Vec<u8> = (0..count).flat_map(|i| encoded_image(i as u8)).collect();
        std::fs::write(dir.join(split.image_file()), images).unwrap();
        if let (Some(file), Some(labels)) = (split.label_file(), labels) {
            std::fs::write(dir.join(file), labels).unwrap();
        }
    }

    #[test]
    fn test_decode_is_column_major() {
        let image = decode_image(&encoded_image(0)).unwrap();
        let pixel = image.get_pixel(3, 7);
        assert_eq!(pixel[0], (3 + 2 * 7) as u8);
        assert_eq!(pixel[1], (50 + 3 + 2 * 7) as u8);
        assert_eq!(pixel[2], (100 + 3 + 2 * 7) as u8);
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        assert!(decode_image(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_labeled_split_shifts_labels() {
        let dir = TempDir::new().unwrap();
        write_split(dir.path(), Stl10Split::Train, Some(&[1, 10, 5]), 3);

        let dataset = Stl10Dataset::open(dir.path(), Stl10Split::Train, None).unwrap();
        assert_eq!(dataset.len(), 3);
        assert!(dataset.is_labeled());
        assert_eq!(dataset.get(0).unwrap().label, Some(0));
        assert_eq!(dataset.get(1).unwrap().label, Some(9));
        assert_eq!(dataset.get(2).unwrap().label, Some(4));
        assert!(dataset.get(3).is_err());
    }

    #[test]
    fn test_invalid_label_rejected() {
        let dir = TempDir::new().unwrap();
        write_split(dir.path(), Stl10Split::Test, Some(&[0]), 1);
        assert!(Stl10Dataset::open(dir.path(), Stl10Split::Test, None).is_err());
    }

    #[test]
    fn test_unlabeled_split_reads_lazily_with_limit() {
        let dir = TempDir::new().unwrap();
        write_split(dir.path(), Stl10Split::Unlabeled, None, 4);

        let dataset = Stl10Dataset::open(dir.path(), Stl10Split::Unlabeled, Some(2)).unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(!dataset.is_labeled());

        let item = dataset.get(1).unwrap();
        assert_eq!(item.label, None);
        assert_eq!(item.image.get_pixel(0, 0)[0], 1);
    }

    #[test]
    fn test_missing_split_is_path_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Stl10Dataset::open(dir.path(), Stl10Split::Train, None).unwrap_err();
        assert!(matches!(err, SslError::PathNotFound(_)));
        assert!(resolve_root(dir.path()).is_err());
    }

    #[test]
    fn test_resolve_nested_root() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("stl10_binary");
        std::fs::create_dir_all(&nested).unwrap();
        write_split(&nested, Stl10Split::Train, Some(&[1]), 1);
        assert_eq!(resolve_root(dir.path()).unwrap(), nested);
    }
}
