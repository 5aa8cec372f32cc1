//! On-disk columnar store for ingested datasets
//!
//! The ingested dataset is written once as MessagePack and re-read by every
//! later pipeline stage. Writing always replaces an existing file.

use crate::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Current columnar layout version
pub const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ColumnarError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode columnar file: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode columnar file: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Columnar format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

pub type Result<T> = std::result::Result<T, ColumnarError>;

#[derive(Serialize)]
struct ColumnarFileRef<'a> {
    format_version: u32,
    dataset: &'a Dataset,
}

#[derive(Deserialize)]
struct ColumnarFile {
    format_version: u32,
    dataset: Dataset,
}

/// Write `dataset` to `path`, creating parent directories as needed
pub fn write_columnar(dataset: &Dataset, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let io_err = |source| ColumnarError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let bytes = rmp_serde::to_vec_named(&ColumnarFileRef {
        format_version: FORMAT_VERSION,
        dataset,
    })?;
    fs::write(path, &bytes).map_err(io_err)?;

    tracing::debug!(
        "Wrote columnar dataset ({} bytes, {} records) to {}",
        bytes.len(),
        dataset.len(),
        path.display()
    );
    Ok(())
}

/// Read a dataset previously written by [`write_columnar`]
pub fn read_columnar(path: impl AsRef<Path>) -> Result<Dataset> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| ColumnarError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let file: ColumnarFile = rmp_serde::from_slice(&bytes)?;
    if file.format_version != FORMAT_VERSION {
        return Err(ColumnarError::VersionMismatch {
            expected: FORMAT_VERSION,
            found: file.format_version,
        });
    }
    Ok(file.dataset)
}
