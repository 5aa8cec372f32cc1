//! Model persistence in aprender's `.apr` container
//!
//! The selected model is saved together with its bound design (feature list
//! and factor levels) so that a separate scoring process can rebuild the
//! design matrix for new records without the training data.

use crate::dataset::Dataset;
use crate::formula::{DesignSpec, FormulaError};
use crate::models::{Classifier, TrainedModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during model persistence operations
#[derive(Error, Debug)]
pub enum ModelPersistenceError {
    #[error("Failed to save model: {0}")]
    SaveError(String),

    #[error("Failed to load model: {0}")]
    LoadError(String),

    #[error("Model file not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cannot score dataset: {0}")]
    Design(#[from] FormulaError),
}

/// Result type for model persistence operations
pub type Result<T> = std::result::Result<T, ModelPersistenceError>;

/// Metadata for a persisted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// creditrisk version that created this model
    pub creditrisk_version: String,
    /// When the model was trained (seconds since the Unix epoch)
    pub trained_at: String,
    /// Number of rows used for training
    pub training_samples: usize,
    /// Model-specific hyperparameters
    pub hyperparameters: BTreeMap<String, String>,
    /// SHA-256 of the input file the model was trained on
    pub dataset_fingerprint: String,
    /// Optional description
    pub description: Option<String>,
}

impl ModelMetadata {
    /// Create new metadata with current timestamp
    pub fn new(training_samples: usize, dataset_fingerprint: impl Into<String>) -> Self {
        Self {
            creditrisk_version: env!("CARGO_PKG_VERSION").to_string(),
            trained_at: unix_timestamp(),
            training_samples,
            hyperparameters: BTreeMap::new(),
            dataset_fingerprint: dataset_fingerprint.into(),
            description: None,
        }
    }

    /// Add a hyperparameter
    pub fn with_hyperparameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hyperparameters.insert(key.into(), value.into());
        self
    }

    /// Add a description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

fn unix_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", duration.as_secs())
}

/// Everything a scoring process needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedModel {
    /// Report name of the model (e.g. `boosted_trees`)
    pub name: String,
    /// Formula as configured
    pub formula: String,
    pub design: DesignSpec,
    pub model: TrainedModel,
    pub metadata: ModelMetadata,
}

/// One scored record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRow {
    pub id: String,
    /// Positive-class probability (absent for vote ensembles)
    pub probability: Option<f64>,
    pub label: u8,
}

impl PersistedModel {
    /// Score every record of `dataset`
    pub fn score(&self, dataset: &Dataset) -> Result<Vec<ScoredRow>> {
        let rows: Vec<usize> = (0..dataset.len()).collect();
        let x = self.design.matrix(dataset, &rows)?;
        let labels = self.model.predict(&x);
        let probabilities = self.model.predict_proba(&x);

        Ok(dataset
            .ids
            .iter()
            .zip(labels)
            .enumerate()
            .map(|(i, (id, label))| ScoredRow {
                id: id.clone(),
                probability: probabilities.as_ref().map(|p| p[i]),
                label,
            })
            .collect())
    }
}

/// Options for saving models
#[derive(Debug, Clone)]
pub struct PersistenceOptions {
    /// Enable compression (default: true)
    pub compress: bool,
    /// Model description
    pub description: Option<String>,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            compress: true,
            description: None,
        }
    }
}

impl PersistenceOptions {
    /// Create new options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set compression
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Set model description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Save a model to `.apr` format, replacing any existing file
pub fn save_model(
    model: &PersistedModel,
    path: impl AsRef<Path>,
    options: PersistenceOptions,
) -> Result<()> {
    use aprender::format::{save, Compression, ModelType, SaveOptions};

    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let compression = if options.compress {
        Compression::ZstdDefault
    } else {
        Compression::None
    };

    let mut save_options = SaveOptions::new()
        .with_compression(compression)
        .with_name(model.name.clone());
    if let Some(desc) = options.description {
        save_options = save_options.with_description(desc);
    }

    save(model, ModelType::Custom, path, save_options)
        .map_err(|e| ModelPersistenceError::SaveError(e.to_string()))?;

    tracing::info!("Saved model '{}' to {}", model.name, path.display());
    Ok(())
}

/// Load a model from `.apr` format
pub fn load_model(path: impl AsRef<Path>) -> Result<PersistedModel> {
    use aprender::format::{load, ModelType};

    if !path.as_ref().exists() {
        return Err(ModelPersistenceError::FileNotFound(
            path.as_ref().display().to_string(),
        ));
    }

    load::<PersistedModel>(path.as_ref(), ModelType::Custom)
        .map_err(|e| ModelPersistenceError::LoadError(e.to_string()))
}

/// Generate a status line for model information
pub fn model_status_line(model: &PersistedModel) -> String {
    format!(
        "model: {} ({}), creditrisk v{}, trained with {} samples",
        model.name,
        model.model.family(),
        model.metadata.creditrisk_version,
        model.metadata.training_samples
    )
}
