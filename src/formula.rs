//! Model formulas (`target ~ a + b`) and design matrices
//!
//! A [`Formula`] names the target and the predictors. Binding it to a
//! [`Schema`] yields a [`DesignSpec`]: the ordered list of numeric features
//! fed to the learners. Factor predictors expand to treatment-coded indicator
//! columns, one per level except the first.
//!
//! Indicators are matched by level *name*, so a design built on the training
//! schema can be applied to a dataset ingested later (e.g. for scoring) whose
//! factor codes differ. Levels unseen at training time encode as all zeros.

use crate::dataset::{Column, ColumnKind, Dataset, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FormulaError {
    #[error("Formula '{0}' has no '~' separating target and predictors")]
    MissingTilde(String),

    #[error("Formula has an empty target")]
    EmptyTarget,

    #[error("Formula has no predictors")]
    EmptyPredictors,

    #[error("Predictor '{0}' is listed more than once")]
    DuplicatePredictor(String),

    #[error("Unknown field '{0}'")]
    UnknownField(String),

    #[error("Field '{0}' is the identifier or target and cannot be a predictor")]
    ReservedField(String),

    #[error("Formula target '{found}' does not match dataset target '{expected}'")]
    TargetMismatch { expected: String, found: String },

    #[error("Column '{column}' is {found} in this dataset but the model expects {expected}")]
    KindMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Formula binds to no usable features")]
    NoFeatures,
}

pub type Result<T> = std::result::Result<T, FormulaError>;

/// Right-hand side of a formula
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predictors {
    /// `.`: every predictor column of the dataset
    All,
    Named(Vec<String>),
}

/// Declarative `target ~ predictors` specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    pub target: String,
    pub predictors: Predictors,
}

impl FromStr for Formula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self> {
        let (lhs, rhs) = s
            .split_once('~')
            .ok_or_else(|| FormulaError::MissingTilde(s.to_string()))?;

        let target = lhs.trim();
        if target.is_empty() {
            return Err(FormulaError::EmptyTarget);
        }

        let rhs = rhs.trim();
        if rhs.is_empty() {
            return Err(FormulaError::EmptyPredictors);
        }
        if rhs == "." {
            return Ok(Formula {
                target: target.to_string(),
                predictors: Predictors::All,
            });
        }

        let mut names = Vec::new();
        let mut seen = HashSet::new();
        for term in rhs.split('+').map(str::trim) {
            if term.is_empty() {
                return Err(FormulaError::EmptyPredictors);
            }
            if !seen.insert(term) {
                return Err(FormulaError::DuplicatePredictor(term.to_string()));
            }
            names.push(term.to_string());
        }

        Ok(Formula {
            target: target.to_string(),
            predictors: Predictors::Named(names),
        })
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.predictors {
            Predictors::All => write!(f, "{} ~ .", self.target),
            Predictors::Named(names) => write!(f, "{} ~ {}", self.target, names.join(" + ")),
        }
    }
}

/// One column of the design matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Feature {
    Numeric { column: String },
    Indicator { column: String, level: String },
}

impl Feature {
    /// Display name (`amount`, `state=TX`)
    pub fn name(&self) -> String {
        match self {
            Feature::Numeric { column } => column.clone(),
            Feature::Indicator { column, level } => format!("{}={}", column, level),
        }
    }
}

/// A formula bound to a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignSpec {
    pub target: String,
    pub features: Vec<Feature>,
}

impl Formula {
    /// Resolve predictor names against `schema`
    pub fn bind(&self, schema: &Schema) -> Result<DesignSpec> {
        if self.target != schema.target_column {
            return Err(FormulaError::TargetMismatch {
                expected: schema.target_column.clone(),
                found: self.target.clone(),
            });
        }

        let columns: Vec<usize> = match &self.predictors {
            Predictors::All => (0..schema.columns.len()).collect(),
            Predictors::Named(names) => names
                .iter()
                .map(|name| {
                    if *name == schema.id_column || *name == schema.target_column {
                        return Err(FormulaError::ReservedField(name.clone()));
                    }
                    schema
                        .column_index(name)
                        .ok_or_else(|| FormulaError::UnknownField(name.clone()))
                })
                .collect::<Result<_>>()?,
        };

        let mut features = Vec::new();
        for idx in columns {
            let spec = &schema.columns[idx];
            match &spec.kind {
                ColumnKind::Numeric => features.push(Feature::Numeric {
                    column: spec.name.clone(),
                }),
                ColumnKind::Factor { levels } => {
                    features.extend(levels.iter().skip(1).map(|level| Feature::Indicator {
                        column: spec.name.clone(),
                        level: level.clone(),
                    }))
                }
            }
        }

        if features.is_empty() {
            return Err(FormulaError::NoFeatures);
        }
        Ok(DesignSpec {
            target: self.target.clone(),
            features,
        })
    }
}

enum Resolved<'a> {
    Numeric(&'a [f64]),
    Indicator { codes: &'a [u32], code: Option<u32> },
}

fn kind_name(kind: &ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Numeric => "numeric",
        ColumnKind::Factor { .. } => "a factor",
    }
}

impl DesignSpec {
    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(Feature::name).collect()
    }

    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    /// Columns bound as factors, in feature order
    pub fn factor_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for feature in &self.features {
            if let Feature::Indicator { column, .. } = feature {
                if !columns.contains(&column.as_str()) {
                    columns.push(column);
                }
            }
        }
        columns
    }

    /// Row-major design matrix for `rows` of `dataset`
    pub fn matrix(&self, dataset: &Dataset, rows: &[usize]) -> Result<Vec<Vec<f64>>> {
        let resolved = self
            .features
            .iter()
            .map(|feature| self.resolve(feature, dataset))
            .collect::<Result<Vec<_>>>()?;

        Ok(rows
            .iter()
            .map(|&row| {
                resolved
                    .iter()
                    .map(|r| match r {
                        Resolved::Numeric(values) => values[row],
                        Resolved::Indicator { codes, code } => {
                            if Some(codes[row]) == *code {
                                1.0
                            } else {
                                0.0
                            }
                        }
                    })
                    .collect()
            })
            .collect())
    }

    fn resolve<'a>(&self, feature: &Feature, dataset: &'a Dataset) -> Result<Resolved<'a>> {
        let column = match feature {
            Feature::Numeric { column } | Feature::Indicator { column, .. } => column,
        };
        let (spec, values) = dataset
            .column(column)
            .ok_or_else(|| FormulaError::UnknownField(column.clone()))?;

        match (feature, &spec.kind, values) {
            (Feature::Numeric { .. }, ColumnKind::Numeric, Column::Numeric(values)) => {
                Ok(Resolved::Numeric(values))
            }
            (
                Feature::Indicator { level, .. },
                ColumnKind::Factor { levels },
                Column::Factor(codes),
            ) => Ok(Resolved::Indicator {
                codes,
                code: levels.iter().position(|l| l == level).map(|p| p as u32),
            }),
            (Feature::Numeric { .. }, kind, _) => Err(FormulaError::KindMismatch {
                column: column.clone(),
                expected: "numeric",
                found: kind_name(kind),
            }),
            (Feature::Indicator { .. }, kind, _) => Err(FormulaError::KindMismatch {
                column: column.clone(),
                expected: "a factor",
                found: kind_name(kind),
            }),
        }
    }
}
