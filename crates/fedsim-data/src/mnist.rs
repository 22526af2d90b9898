// MNIST dataset provider — IDX file format parser
//
// The MNIST database consists of 4 files:
//   - train-images-idx3-ubyte  (60,000  28×28 images)
//   - train-labels-idx1-ubyte  (60,000  labels 0-9)
//   - t10k-images-idx3-ubyte   (10,000  28×28 images)
//   - t10k-labels-idx1-ubyte   (10,000  labels 0-9)
//
// IDX format (all values big-endian):
//   images: magic(2051) | count(u32) | rows(u32) | cols(u32) | pixel_data(u8...)
//   labels: magic(2049) | count(u32) | label_data(u8...)
//
// The dataset root defaults to ./data and can be overridden with the
// FEDSIM_DATA_DIR environment variable; MNIST files live under <root>/mnist.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use fedsim_core::{bail, Error, Result};

use crate::dataset::LabeledDataset;

const NUM_CLASSES: usize = 10;

/// Sample count kept per split in reduced mode (quick experiments).
const REDUCED_SAMPLES: usize = 5_000;

/// Environment variable overriding the dataset storage root.
pub const DATA_DIR_ENV: &str = "FEDSIM_DATA_DIR";

/// Which dataset the provider should load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// MNIST handwritten digits in IDX format.
    Mnist,
}

/// Which split of MNIST to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MnistSplit {
    Train,
    Test,
}

/// Load `(train, test)` collections for the given dataset.
///
/// `reduced` truncates both splits to the first 5 000 samples, which keeps
/// round times short during experimentation. Pixel values are scaled to
/// `[0, 1]`.
pub fn load(kind: DatasetKind, reduced: bool) -> Result<(LabeledDataset, LabeledDataset)> {
    match kind {
        DatasetKind::Mnist => {
            let dir = data_root().join("mnist");
            let mut train = load_mnist(&dir, MnistSplit::Train)?;
            let mut test = load_mnist(&dir, MnistSplit::Test)?;
            if reduced {
                train = train.take(REDUCED_SAMPLES);
                test = test.take(REDUCED_SAMPLES);
            }
            Ok((train, test))
        }
    }
}

/// The dataset storage root: `$FEDSIM_DATA_DIR` or `./data`.
pub fn data_root() -> PathBuf {
    env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Load one MNIST split from a directory of IDX files.
pub fn load_mnist(dir: impl AsRef<Path>, split: MnistSplit) -> Result<LabeledDataset> {
    let dir = dir.as_ref();
    let (img_name, lbl_name) = match split {
        MnistSplit::Train => ("train-images-idx3-ubyte", "train-labels-idx1-ubyte"),
        MnistSplit::Test => ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte"),
    };

    let img_bytes = read_idx_file(dir, img_name)?;
    let lbl_bytes = read_idx_file(dir, lbl_name)?;
    mnist_from_raw(&img_bytes, &lbl_bytes)
}

/// Build a dataset from raw IDX bytes (useful for tests and embedding).
pub fn mnist_from_raw(image_bytes: &[u8], label_bytes: &[u8]) -> Result<LabeledDataset> {
    let (pixels, count, rows, cols) = parse_idx3_images(image_bytes)?;
    let labels = parse_idx1_labels(label_bytes)?;

    if count != labels.len() {
        bail!("count mismatch: {} images vs {} labels", count, labels.len());
    }

    let features: Vec<f32> = pixels.iter().map(|&p| p as f32 / 255.0).collect();
    let labels: Vec<u32> = labels.iter().map(|&l| l as u32).collect();
    LabeledDataset::new(features, rows * cols, labels, NUM_CLASSES)
}

/// Read an IDX file, reporting gzip'd files with an actionable error.
fn read_idx_file(dir: &Path, base_name: &str) -> Result<Vec<u8>> {
    let plain = dir.join(base_name);
    if plain.exists() {
        return Ok(fs::read(&plain)?);
    }

    let gz = dir.join(format!("{base_name}.gz"));
    if gz.exists() {
        return Err(Error::InvalidFormat(format!(
            "{} is gzip-compressed; decompress it first (gunzip {})",
            gz.display(),
            gz.display()
        )));
    }

    bail!("MNIST file not found: {}", plain.display())
}

/// Parse an IDX3 file (images): magic=2051, count, rows, cols, data.
fn parse_idx3_images(data: &[u8]) -> Result<(&[u8], usize, usize, usize)> {
    if data.len() < 16 {
        return Err(Error::InvalidFormat("IDX3 file too short".into()));
    }

    let magic = read_u32_be(data, 0);
    if magic != 2051 {
        return Err(Error::InvalidFormat(format!(
            "IDX3 invalid magic: expected 2051, got {magic}"
        )));
    }

    let count = read_u32_be(data, 4) as usize;
    let rows = read_u32_be(data, 8) as usize;
    let cols = read_u32_be(data, 12) as usize;
    let expected_len = 16 + count * rows * cols;
    if data.len() < expected_len {
        return Err(Error::InvalidFormat(format!(
            "IDX3 truncated: expected {expected_len} bytes, got {}",
            data.len()
        )));
    }

    Ok((&data[16..expected_len], count, rows, cols))
}

/// Parse an IDX1 file (labels): magic=2049, count, data.
fn parse_idx1_labels(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 8 {
        return Err(Error::InvalidFormat("IDX1 file too short".into()));
    }

    let magic = read_u32_be(data, 0);
    if magic != 2049 {
        return Err(Error::InvalidFormat(format!(
            "IDX1 invalid magic: expected 2049, got {magic}"
        )));
    }

    let count = read_u32_be(data, 4) as usize;
    let expected_len = 8 + count;
    if data.len() < expected_len {
        return Err(Error::InvalidFormat(format!(
            "IDX1 truncated: expected {expected_len} bytes, got {}",
            data.len()
        )));
    }

    Ok(&data[8..expected_len])
}

/// Read a big-endian u32 from `data` at byte offset `off`.
fn read_u32_be(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

// Builder helpers for tests

/// Build IDX3 image bytes from raw image data.
pub fn build_idx3_bytes(images: &[&[u8]], rows: u32, cols: u32) -> Vec<u8> {
    let count = images.len() as u32;
    let mut buf = Vec::new();
    buf.extend_from_slice(&2051u32.to_be_bytes());
    buf.extend_from_slice(&count.to_be_bytes());
    buf.extend_from_slice(&rows.to_be_bytes());
    buf.extend_from_slice(&cols.to_be_bytes());
    for img in images {
        buf.extend_from_slice(img);
    }
    buf
}

/// Build IDX1 label bytes.
pub fn build_idx1_bytes(labels: &[u8]) -> Vec<u8> {
    let count = labels.len() as u32;
    let mut buf = Vec::new();
    buf.extend_from_slice(&2049u32.to_be_bytes());
    buf.extend_from_slice(&count.to_be_bytes());
    buf.extend_from_slice(labels);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idx_roundtrip_to_dataset() {
        let img1 = vec![0u8; 4]; // 2×2 image
        let img2 = vec![255u8; 4];
        let img_bytes = build_idx3_bytes(&[&img1, &img2], 2, 2);
        let lbl_bytes = build_idx1_bytes(&[3, 7]);

        let ds = mnist_from_raw(&img_bytes, &lbl_bytes).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.feature_dim(), 4);
        assert_eq!(ds.label(0), 3);
        assert_eq!(ds.label(1), 7);
        assert_eq!(ds.feature(0), &[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(ds.feature(1), &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut img_bytes = build_idx3_bytes(&[&[0u8; 4]], 2, 2);
        img_bytes[3] = 99;
        let lbl_bytes = build_idx1_bytes(&[0]);
        assert!(mnist_from_raw(&img_bytes, &lbl_bytes).is_err());

        let img_bytes = build_idx3_bytes(&[&[0u8; 4]], 2, 2);
        let mut lbl_bytes = build_idx1_bytes(&[0]);
        lbl_bytes[3] = 99;
        assert!(mnist_from_raw(&img_bytes, &lbl_bytes).is_err());
    }

    #[test]
    fn count_mismatch_rejected() {
        let img_bytes = build_idx3_bytes(&[&[0u8; 4]], 2, 2); // 1 image
        let lbl_bytes = build_idx1_bytes(&[0, 1]); // 2 labels
        assert!(mnist_from_raw(&img_bytes, &lbl_bytes).is_err());
    }

    #[test]
    fn truncated_files_rejected() {
        let img_bytes = build_idx3_bytes(&[&[0u8; 4]], 2, 2);
        assert!(mnist_from_raw(&img_bytes[..10], &build_idx1_bytes(&[0])).is_err());
        assert!(mnist_from_raw(&img_bytes, &[1, 2, 3]).is_err());
    }
}
