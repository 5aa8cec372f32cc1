//! Pipeline configuration
//!
//! Loaded from a TOML file (`creditrisk.toml`), then overridden by CLI flags.
//! Every field has a default, so an empty file describes the standard run:
//! six models, the four boosted-tree variants combined by majority vote, and
//! `boosted_trees` persisted.
//!
//! # Example
//! ```
//! use creditrisk::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_toml_str("seed = 7").unwrap();
//! assert_eq!(config.seed, 7);
//! assert_eq!(config.resolved_models().len(), 6);
//! ```

use crate::dataset::IngestOptions;
use crate::formula::{Formula, FormulaError};
use crate::models::{BoostingParams, ComputeContext, ForestParams, LogisticParams, ModelParams};
use crate::split::DEFAULT_TRAIN_FRACTION;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_FORMULA: &str = "bad_flag ~ .";
pub const DEFAULT_ENSEMBLE: &str = "majority_vote";
pub const DEFAULT_SELECTED_MODEL: &str = "boosted_trees";

/// Semantic problems in an otherwise well-formed config
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("train_fraction must lie strictly between 0 and 1, got {0}")]
    InvalidTrainFraction(f64),

    #[error("Delimiter must be a single character, got {0:?}")]
    InvalidDelimiter(String),

    #[error("No models configured")]
    NoModels,

    #[error("Duplicate model name: {0}")]
    DuplicateModel(String),

    #[error("Model {model}: invalid formula: {source}")]
    Formula {
        model: String,
        #[source]
        source: FormulaError,
    },

    #[error("Model {model}: {reason}")]
    InvalidModel { model: String, reason: String },

    #[error("Model {model}: hyperparameter '{key}' does not apply to {family}")]
    InapplicableHyperparameter {
        model: String,
        key: &'static str,
        family: &'static str,
    },

    #[error("Ensemble {ensemble}: member {member} is not a configured model")]
    UnknownEnsembleMember { ensemble: String, member: String },

    #[error("Ensemble {0} has no members")]
    EmptyEnsemble(String),

    #[error("Ensemble {ensemble}: member {member} uses a different formula")]
    EnsembleFormulaMismatch { ensemble: String, member: String },

    #[error("Selected model {0} is neither a configured model nor the ensemble")]
    UnknownSelectedModel(String),
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub seed: u64,
    /// Probability that a record lands in the training partition
    pub train_fraction: f64,
    pub columnar_path: PathBuf,
    pub model_path: PathBuf,
    /// Write the selected model to `model_path`
    pub persist: bool,
    pub dataset: DatasetConfig,
    pub compute: ComputeConfig,
    pub selection: SelectionConfig,
    /// `[[model]]` tables; `None` means the default six
    #[serde(rename = "model")]
    pub models: Option<Vec<ModelSpec>>,
    pub ensemble: Option<EnsembleSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            train_fraction: DEFAULT_TRAIN_FRACTION,
            columnar_path: PathBuf::from("data/credit.cols"),
            model_path: PathBuf::from("models/credit_model.apr"),
            persist: true,
            dataset: DatasetConfig::default(),
            compute: ComputeConfig::default(),
            selection: SelectionConfig::default(),
            models: None,
            ensemble: None,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse and validate a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Configured models, or the default six
    pub fn resolved_models(&self) -> Vec<ModelSpec> {
        self.models.clone().unwrap_or_else(default_models)
    }

    /// The configured ensemble; the default one only applies when neither
    /// models nor an ensemble are configured
    pub fn resolved_ensemble(&self) -> Option<EnsembleSpec> {
        match (&self.models, &self.ensemble) {
            (_, Some(ensemble)) => Some(ensemble.clone()),
            (None, None) => Some(default_ensemble()),
            (Some(_), None) => None,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(ConfigError::InvalidTrainFraction(self.train_fraction));
        }
        self.dataset.delimiter()?;

        let models = self.resolved_models();
        if models.is_empty() {
            return Err(ConfigError::NoModels);
        }

        let mut names = HashSet::new();
        for spec in &models {
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateModel(spec.name.clone()));
            }
            spec.parsed_formula()?;
            spec.params()?;
        }

        let ensemble = self.resolved_ensemble();
        if let Some(ensemble) = &ensemble {
            ensemble.validate(&models)?;
            if !names.insert(ensemble.name.as_str()) {
                return Err(ConfigError::DuplicateModel(ensemble.name.clone()));
            }
        }

        if self.selection.policy == SelectionPolicy::Named
            && !names.contains(self.selection.model.as_str())
        {
            return Err(ConfigError::UnknownSelectedModel(self.selection.model.clone()));
        }
        Ok(())
    }
}

/// `[dataset]`: input layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    pub id_column: String,
    pub target_column: String,
    pub delimiter: String,
    /// Columns read as factors even when numeric
    pub categorical: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        let options = IngestOptions::default();
        Self {
            id_column: options.id_column,
            target_column: options.target_column,
            delimiter: options.delimiter.to_string(),
            categorical: options.categorical,
        }
    }
}

impl DatasetConfig {
    fn delimiter(&self) -> std::result::Result<char, ConfigError> {
        let mut chars = self.delimiter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c != '"' && c != '\n' => Ok(c),
            _ => Err(ConfigError::InvalidDelimiter(self.delimiter.clone())),
        }
    }

    pub fn ingest_options(&self) -> std::result::Result<IngestOptions, ConfigError> {
        Ok(IngestOptions {
            id_column: self.id_column.clone(),
            target_column: self.target_column.clone(),
            delimiter: self.delimiter()?,
            categorical: self.categorical.clone(),
            require_target: true,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    #[default]
    Local,
    Parallel,
}

/// `[compute]`: where tree building runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputeConfig {
    pub context: ContextKind,
    pub threads: usize,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            context: ContextKind::Local,
            threads: 4,
        }
    }
}

impl ComputeConfig {
    pub fn context(&self) -> ComputeContext {
        match self.context {
            ContextKind::Local => ComputeContext::Local,
            ContextKind::Parallel => ComputeContext::Parallel {
                threads: self.threads,
            },
        }
    }
}

/// How the persisted model is chosen from the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// The model called `selection.model`
    #[default]
    Named,
    /// Highest defined AUC
    BestAuc,
    BestAccuracy,
}

/// `[selection]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    pub policy: SelectionPolicy,
    pub model: String,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::Named,
            model: DEFAULT_SELECTED_MODEL.to_string(),
        }
    }
}

/// Algorithm family of a `[[model]]` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    LogisticRegression,
    RandomForest,
    BoostedTrees,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::LogisticRegression => "logistic_regression",
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::BoostedTrees => "boosted_trees",
        }
    }
}

fn default_formula() -> String {
    DEFAULT_FORMULA.to_string()
}

/// One `[[model]]` table. Unset hyperparameters take the family defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub name: String,
    pub family: ModelFamily,
    #[serde(default = "default_formula")]
    pub formula: String,

    #[serde(default)]
    pub num_trees: Option<usize>,
    #[serde(default)]
    pub learning_rate: Option<f64>,
    #[serde(default)]
    pub num_leaves: Option<usize>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub min_split: Option<usize>,
    #[serde(default)]
    pub max_features: Option<usize>,
    #[serde(default)]
    pub unbalanced: Option<bool>,
    #[serde(default)]
    pub lambda: Option<f64>,
    #[serde(default)]
    pub iterations: Option<usize>,
    #[serde(default)]
    pub l2: Option<f64>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, family: ModelFamily) -> Self {
        Self {
            name: name.into(),
            family,
            formula: default_formula(),
            num_trees: None,
            learning_rate: None,
            num_leaves: None,
            max_depth: None,
            min_split: None,
            max_features: None,
            unbalanced: None,
            lambda: None,
            iterations: None,
            l2: None,
        }
    }

    pub fn parsed_formula(&self) -> std::result::Result<Formula, ConfigError> {
        self.formula.parse().map_err(|source| ConfigError::Formula {
            model: self.name.clone(),
            source,
        })
    }

    /// Family defaults overlaid with the configured hyperparameters
    pub fn params(&self) -> std::result::Result<ModelParams, ConfigError> {
        let params = match self.family {
            ModelFamily::LogisticRegression => {
                self.reject(&[
                    ("num_trees", self.num_trees.is_some()),
                    ("num_leaves", self.num_leaves.is_some()),
                    ("max_depth", self.max_depth.is_some()),
                    ("min_split", self.min_split.is_some()),
                    ("max_features", self.max_features.is_some()),
                    ("unbalanced", self.unbalanced.is_some()),
                    ("lambda", self.lambda.is_some()),
                ])?;
                let d = LogisticParams::default();
                ModelParams::LogisticRegression(LogisticParams {
                    iterations: self.iterations.unwrap_or(d.iterations),
                    learning_rate: self.learning_rate.unwrap_or(d.learning_rate),
                    l2: self.l2.unwrap_or(d.l2),
                })
            }
            ModelFamily::RandomForest => {
                self.reject(&[
                    ("learning_rate", self.learning_rate.is_some()),
                    ("num_leaves", self.num_leaves.is_some()),
                    ("unbalanced", self.unbalanced.is_some()),
                    ("lambda", self.lambda.is_some()),
                    ("iterations", self.iterations.is_some()),
                    ("l2", self.l2.is_some()),
                ])?;
                let d = ForestParams::default();
                ModelParams::RandomForest(ForestParams {
                    num_trees: self.num_trees.unwrap_or(d.num_trees),
                    max_depth: self.max_depth.unwrap_or(d.max_depth),
                    min_split: self.min_split.unwrap_or(d.min_split),
                    max_features: self.max_features.or(d.max_features),
                })
            }
            ModelFamily::BoostedTrees => {
                self.reject(&[
                    ("max_features", self.max_features.is_some()),
                    ("iterations", self.iterations.is_some()),
                    ("l2", self.l2.is_some()),
                ])?;
                let d = BoostingParams::default();
                ModelParams::BoostedTrees(BoostingParams {
                    num_trees: self.num_trees.unwrap_or(d.num_trees),
                    learning_rate: self.learning_rate.unwrap_or(d.learning_rate),
                    num_leaves: self.num_leaves.unwrap_or(d.num_leaves),
                    max_depth: self.max_depth.unwrap_or(d.max_depth),
                    min_split: self.min_split.unwrap_or(d.min_split),
                    unbalanced: self.unbalanced.unwrap_or(d.unbalanced),
                    lambda: self.lambda.unwrap_or(d.lambda),
                })
            }
        };

        params.validate().map_err(|e| ConfigError::InvalidModel {
            model: self.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(params)
    }

    fn reject(&self, set: &[(&'static str, bool)]) -> std::result::Result<(), ConfigError> {
        match set.iter().find(|(_, is_set)| *is_set) {
            Some((key, _)) => Err(ConfigError::InapplicableHyperparameter {
                model: self.name.clone(),
                key: *key,
                family: self.family.as_str(),
            }),
            None => Ok(()),
        }
    }
}

/// `[ensemble]`: majority vote over configured models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnsembleSpec {
    pub name: String,
    pub members: Vec<String>,
}

impl EnsembleSpec {
    /// Members must exist and share one formula
    pub fn validate(&self, models: &[ModelSpec]) -> std::result::Result<(), ConfigError> {
        if self.members.is_empty() {
            return Err(ConfigError::EmptyEnsemble(self.name.clone()));
        }

        let mut formula: Option<Formula> = None;
        for member in &self.members {
            let spec = models.iter().find(|m| &m.name == member).ok_or_else(|| {
                ConfigError::UnknownEnsembleMember {
                    ensemble: self.name.clone(),
                    member: member.clone(),
                }
            })?;
            let parsed = spec.parsed_formula()?;
            match &formula {
                None => formula = Some(parsed),
                Some(first) if *first != parsed => {
                    return Err(ConfigError::EnsembleFormulaMismatch {
                        ensemble: self.name.clone(),
                        member: member.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// The six standard model configurations
pub fn default_models() -> Vec<ModelSpec> {
    let boosted = |name: &str, trees: usize, rate: f64, unbalanced: bool| ModelSpec {
        num_trees: Some(trees),
        learning_rate: Some(rate),
        num_leaves: Some(20),
        min_split: Some(10),
        unbalanced: Some(unbalanced),
        ..ModelSpec::new(name, ModelFamily::BoostedTrees)
    };

    vec![
        ModelSpec {
            iterations: Some(200),
            learning_rate: Some(0.1),
            l2: Some(1e-4),
            ..ModelSpec::new("logistic_regression", ModelFamily::LogisticRegression)
        },
        ModelSpec {
            num_trees: Some(50),
            max_depth: Some(10),
            min_split: Some(10),
            ..ModelSpec::new("random_forest", ModelFamily::RandomForest)
        },
        boosted("boosted_trees", 100, 0.1, false),
        boosted("boosted_trees_unbalanced", 100, 0.1, true),
        boosted("boosted_trees_fast", 50, 0.3, false),
        boosted("boosted_trees_slow", 200, 0.05, true),
    ]
}

/// Majority vote over the four boosted-tree configurations
pub fn default_ensemble() -> EnsembleSpec {
    EnsembleSpec {
        name: DEFAULT_ENSEMBLE.to_string(),
        members: vec![
            "boosted_trees".to_string(),
            "boosted_trees_unbalanced".to_string(),
            "boosted_trees_fast".to_string(),
            "boosted_trees_slow".to_string(),
        ],
    }
}
