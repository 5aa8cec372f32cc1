//! Tabular credit dataset: CSV ingest and factor encoding
//!
//! Records are read once from a delimited file and stored column-major.
//! Every record carries a unique identifier and a binary target; the remaining
//! columns are predictors, either numeric or categorical. Categorical columns
//! become factors whose levels are sorted, so the integer codes depend only on
//! the set of values seen and never on row order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while reading a dataset
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Input has no header row")]
    MissingHeader,

    #[error("Required column '{0}' not found in header")]
    MissingColumn(String),

    #[error("Column '{0}' appears more than once in header")]
    DuplicateColumn(String),

    #[error("Line {line}: expected {expected} cells, found {found}")]
    RaggedRow {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Line {line}: unterminated quoted field")]
    UnterminatedQuote { line: usize },

    #[error("Line {line}: empty value in numeric column '{column}'")]
    MissingValue { line: usize, column: String },

    #[error("Line {line}: non-finite value '{value}' in numeric column '{column}'")]
    NonFiniteValue {
        line: usize,
        column: String,
        value: String,
    },

    #[error("Line {line}: target value '{value}' is not binary (expected 0 or 1)")]
    NonBinaryTarget { line: usize, value: String },

    #[error("Line {line}: duplicate identifier '{id}'")]
    DuplicateId { line: usize, id: String },

    #[error("Dataset contains no records")]
    Empty,
}

pub type Result<T> = std::result::Result<T, DatasetError>;

/// How the ingest step locates and interprets columns
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    /// Unique record identifier column
    pub id_column: String,
    /// Binary (0/1) target column
    pub target_column: String,
    /// Cell delimiter
    pub delimiter: char,
    /// Columns forced to be factors even when every value is numeric
    pub categorical: Vec<String>,
    /// When false a missing target column leaves `Dataset::target` empty
    pub require_target: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            id_column: "account_id".to_string(),
            target_column: "bad_flag".to_string(),
            delimiter: ',',
            categorical: Vec::new(),
            require_target: true,
        }
    }
}

impl IngestOptions {
    /// Options for records to be scored, where labels may be absent
    pub fn for_scoring(mut self) -> Self {
        self.require_target = false;
        self
    }
}

/// Kind of a predictor column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnKind {
    Numeric,
    /// Enumerated factor; `levels[code]` is the original value
    Factor { levels: Vec<String> },
}

/// Name and kind of a predictor column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

/// Layout of a dataset. `columns` lists predictors only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub id_column: String,
    pub target_column: String,
    pub columns: Vec<ColumnSpec>,
}

impl Schema {
    /// Position of a predictor column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Predictor column names in header order
    pub fn predictor_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Values of one predictor column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Numeric(Vec<f64>),
    /// Codes index into the factor levels of the matching [`ColumnSpec`]
    Factor(Vec<u32>),
}

/// Column-major credit dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub schema: Schema,
    pub ids: Vec<String>,
    /// Empty when the input carried no target column
    pub target: Vec<u8>,
    pub columns: Vec<Column>,
    /// Hex SHA-256 of the raw input bytes
    pub fingerprint: String,
}

impl Dataset {
    /// Number of records
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn has_target(&self) -> bool {
        !self.target.is_empty()
    }

    /// Look up a predictor column by name
    pub fn column(&self, name: &str) -> Option<(&ColumnSpec, &Column)> {
        let idx = self.schema.column_index(name)?;
        Some((&self.schema.columns[idx], &self.columns[idx]))
    }

    /// Target values for the given rows
    pub fn labels(&self, rows: &[usize]) -> Vec<u8> {
        rows.iter().map(|&r| self.target[r]).collect()
    }

    /// Share of records with target 1
    pub fn positive_rate(&self) -> f64 {
        if self.target.is_empty() {
            return 0.0;
        }
        self.target.iter().filter(|&&t| t == 1).count() as f64 / self.target.len() as f64
    }
}

/// Read and encode a delimited file
pub fn read_csv(path: impl AsRef<Path>, options: &IngestOptions) -> Result<Dataset> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let dataset = parse_csv(&content, options)?;
    tracing::info!(
        "Ingested {} records with {} predictors from {}",
        dataset.len(),
        dataset.schema.columns.len(),
        path.display()
    );
    Ok(dataset)
}

/// Parse delimited text with a header row into a [`Dataset`]
pub fn parse_csv(content: &str, options: &IngestOptions) -> Result<Dataset> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());

    let (header_line_no, header_line) = lines.next().ok_or(DatasetError::MissingHeader)?;
    let header = split_record(header_line, options.delimiter, header_line_no)?;

    let mut seen = HashSet::new();
    for name in &header {
        if !seen.insert(name.as_str()) {
            return Err(DatasetError::DuplicateColumn(name.clone()));
        }
    }

    let locate = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
    };
    let id_idx = locate(&options.id_column)?;
    let target_idx = match locate(&options.target_column) {
        Ok(idx) => Some(idx),
        Err(_) if !options.require_target => None,
        Err(e) => return Err(e),
    };

    // Raw cells per header column, plus the source line of every record
    let mut raw: Vec<Vec<String>> = vec![Vec::new(); header.len()];
    let mut line_numbers = Vec::new();
    for (line_no, line) in lines {
        let cells = split_record(line, options.delimiter, line_no)?;
        if cells.len() != header.len() {
            return Err(DatasetError::RaggedRow {
                line: line_no,
                expected: header.len(),
                found: cells.len(),
            });
        }
        for (col, cell) in cells.into_iter().enumerate() {
            raw[col].push(cell);
        }
        line_numbers.push(line_no);
    }

    if line_numbers.is_empty() {
        return Err(DatasetError::Empty);
    }

    let ids = std::mem::take(&mut raw[id_idx]);
    let mut unique = HashSet::with_capacity(ids.len());
    for (id, &line) in ids.iter().zip(&line_numbers) {
        if !unique.insert(id.as_str()) {
            return Err(DatasetError::DuplicateId {
                line,
                id: id.clone(),
            });
        }
    }

    let target = match target_idx {
        Some(idx) => raw[idx]
            .iter()
            .zip(&line_numbers)
            .map(|(value, &line)| parse_target(value, line))
            .collect::<Result<Vec<u8>>>()?,
        None => Vec::new(),
    };

    let mut specs = Vec::new();
    let mut columns = Vec::new();
    for (idx, name) in header.iter().enumerate() {
        if idx == id_idx || Some(idx) == target_idx {
            continue;
        }
        let forced = options.categorical.iter().any(|c| c == name);
        let (spec, column) = encode_column(name, &raw[idx], &line_numbers, forced)?;
        specs.push(spec);
        columns.push(column);
    }

    Ok(Dataset {
        schema: Schema {
            id_column: options.id_column.clone(),
            target_column: options.target_column.clone(),
            columns: specs,
        },
        ids,
        target,
        columns,
        fingerprint: hex::encode(Sha256::digest(content.as_bytes())),
    })
}

fn parse_target(value: &str, line: usize) -> Result<u8> {
    match value.parse::<f64>() {
        Ok(v) if v == 0.0 => Ok(0),
        Ok(v) if v == 1.0 => Ok(1),
        _ => Err(DatasetError::NonBinaryTarget {
            line,
            value: value.to_string(),
        }),
    }
}

/// Infer the kind of a column and encode its cells
fn encode_column(
    name: &str,
    cells: &[String],
    line_numbers: &[usize],
    forced_factor: bool,
) -> Result<(ColumnSpec, Column)> {
    let looks_numeric = !forced_factor
        && cells.iter().any(|c| !c.is_empty())
        && cells
            .iter()
            .filter(|c| !c.is_empty())
            .all(|c| c.parse::<f64>().is_ok());

    if looks_numeric {
        let mut values = Vec::with_capacity(cells.len());
        for (cell, &line) in cells.iter().zip(line_numbers) {
            if cell.is_empty() {
                return Err(DatasetError::MissingValue {
                    line,
                    column: name.to_string(),
                });
            }
            let value: f64 = cell.parse().map_err(|_| DatasetError::MissingValue {
                line,
                column: name.to_string(),
            })?;
            if !value.is_finite() {
                return Err(DatasetError::NonFiniteValue {
                    line,
                    column: name.to_string(),
                    value: cell.clone(),
                });
            }
            values.push(value);
        }
        return Ok((
            ColumnSpec {
                name: name.to_string(),
                kind: ColumnKind::Numeric,
            },
            Column::Numeric(values),
        ));
    }

    let levels: Vec<String> = cells
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let codes = cells
        .iter()
        .map(|cell| {
            levels
                .binary_search(cell)
                .map(|code| code as u32)
                .unwrap_or_default()
        })
        .collect();

    Ok((
        ColumnSpec {
            name: name.to_string(),
            kind: ColumnKind::Factor { levels },
        },
        Column::Factor(codes),
    ))
}

/// Split one delimited line, honouring double-quoted cells
fn split_record(line: &str, delimiter: char, line_no: usize) -> Result<Vec<String>> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == '"' {
            in_quotes = true;
            quoted = true;
        } else if ch == delimiter {
            cells.push(finish_cell(&mut current, quoted));
            quoted = false;
        } else {
            current.push(ch);
        }
    }

    if in_quotes {
        return Err(DatasetError::UnterminatedQuote { line: line_no });
    }
    cells.push(finish_cell(&mut current, quoted));
    Ok(cells)
}

fn finish_cell(current: &mut String, quoted: bool) -> String {
    let cell = std::mem::take(current);
    if quoted {
        cell
    } else {
        cell.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;

    const SMALL: &str = "account_id,bad_flag,amount,state\n\
                         a1,0,10.5,CA\n\
                         a2,1,99.0,NY\n\
                         a3,0,12.0,CA\n";

    #[test]
    fn test_parse_small_dataset() {
        let ds = parse_csv(SMALL, &IngestOptions::default()).unwrap();

        assert_eq!(ds.len(), 3);
        assert_eq!(ds.ids, vec!["a1", "a2", "a3"]);
        assert_eq!(ds.target, vec![0, 1, 0]);
        assert_eq!(ds.schema.predictor_names(), vec!["amount", "state"]);
        assert_eq!(ds.columns[0], Column::Numeric(vec![10.5, 99.0, 12.0]));
    }

    #[test]
    fn test_factor_levels_are_sorted() {
        let ds = parse_csv(SMALL, &IngestOptions::default()).unwrap();
        let (spec, column) = ds.column("state").unwrap();

        assert_eq!(
            spec.kind,
            ColumnKind::Factor {
                levels: vec!["CA".to_string(), "NY".to_string()]
            }
        );
        assert_eq!(column, &Column::Factor(vec![0, 1, 0]));
    }

    #[test]
    fn test_forced_categorical_column() {
        let csv = "account_id,bad_flag,branch\nx,0,7\ny,1,3\n";
        let options = IngestOptions {
            categorical: vec!["branch".to_string()],
            ..IngestOptions::default()
        };
        let ds = parse_csv(csv, &options).unwrap();
        let (spec, column) = ds.column("branch").unwrap();

        assert!(matches!(spec.kind, ColumnKind::Factor { .. }));
        assert_eq!(column, &Column::Factor(vec![1, 0]));
    }

    #[test]
    fn test_quoted_cells_and_custom_delimiter() {
        let csv = "account_id;bad_flag;city\n\"a;1\";0;\"New \"\"York\"\"\"\nb;1; Boston \n";
        let options = IngestOptions {
            delimiter: ';',
            ..IngestOptions::default()
        };
        let ds = parse_csv(csv, &options).unwrap();

        assert_eq!(ds.ids[0], "a;1");
        let (spec, _) = ds.column("city").unwrap();
        match &spec.kind {
            ColumnKind::Factor { levels } => {
                assert!(levels.contains(&"New \"York\"".to_string()));
                assert!(levels.contains(&"Boston".to_string()));
            }
            other => panic!("Expected factor, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let csv = "account_id,bad_flag,x\n\na,0,1\n\nb,1,2\n";
        let ds = parse_csv(csv, &IngestOptions::default()).unwrap();
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn test_missing_target_column() {
        let csv = "account_id,amount\na,1\n";
        let err = parse_csv(csv, &IngestOptions::default()).unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn(c) if c == "bad_flag"));
    }

    #[test]
    fn test_target_optional_for_scoring() {
        let csv = "account_id,amount,state\na,1,CA\nb,2,NY\n";
        let ds = parse_csv(csv, &IngestOptions::default().for_scoring()).unwrap();

        assert_eq!(ds.len(), 2);
        assert!(!ds.has_target());
        assert_eq!(ds.schema.predictor_names(), vec!["amount", "state"]);

        // A present target is still validated and kept out of the predictors
        let labelled = parse_csv(SMALL, &IngestOptions::default().for_scoring()).unwrap();
        assert_eq!(labelled.target, vec![0, 1, 0]);
        assert_eq!(labelled.schema.predictor_names(), vec!["amount", "state"]);
    }

    #[test]
    fn test_non_binary_target_rejected() {
        let csv = "account_id,bad_flag,x\na,0,1\nb,2,1\n";
        let err = parse_csv(csv, &IngestOptions::default()).unwrap_err();
        assert!(matches!(err, DatasetError::NonBinaryTarget { line: 3, .. }));
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let csv = "account_id,bad_flag,x\na,0,1\na,1,2\n";
        let err = parse_csv(csv, &IngestOptions::default()).unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateId { id, .. } if id == "a"));
    }

    #[test]
    fn test_ragged_row_rejected() {
        let csv = "account_id,bad_flag,x\na,0,1,9\n";
        let err = parse_csv(csv, &IngestOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::RaggedRow {
                expected: 3,
                found: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_numeric_value_rejected() {
        let csv = "account_id,bad_flag,x\na,0,1\nb,1,\n";
        let err = parse_csv(csv, &IngestOptions::default()).unwrap_err();
        assert!(matches!(err, DatasetError::MissingValue { line: 3, .. }));
    }

    #[test]
    fn test_non_finite_value_rejected() {
        let csv = "account_id,bad_flag,x\na,0,1\nb,1,inf\n";
        let err = parse_csv(csv, &IngestOptions::default()).unwrap_err();
        assert!(matches!(err, DatasetError::NonFiniteValue { .. }));
    }

    #[test]
    fn test_unterminated_quote_rejected() {
        let csv = "account_id,bad_flag,x\n\"a,0,1\n";
        let err = parse_csv(csv, &IngestOptions::default()).unwrap_err();
        assert!(matches!(err, DatasetError::UnterminatedQuote { line: 2 }));
    }

    #[test]
    fn test_header_only_is_empty() {
        let err = parse_csv("account_id,bad_flag\n", &IngestOptions::default()).unwrap_err();
        assert!(matches!(err, DatasetError::Empty));
        let err = parse_csv("", &IngestOptions::default()).unwrap_err();
        assert!(matches!(err, DatasetError::MissingHeader));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = parse_csv(SMALL, &IngestOptions::default()).unwrap();
        let b = parse_csv(SMALL, &IngestOptions::default()).unwrap();
        let c = parse_csv(&SMALL.replace("99.0", "98.0"), &IngestOptions::default()).unwrap();

        assert_eq!(a.fingerprint.len(), 64);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn test_read_csv_missing_file() {
        let err = read_csv("/nonexistent/credit.csv", &IngestOptions::default()).unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn test_synthetic_dataset_shape() {
        let ds = parse_csv(&testdata::credit_csv(200, 7), &IngestOptions::default()).unwrap();

        assert_eq!(ds.len(), 200);
        assert!(ds.positive_rate() > 0.05 && ds.positive_rate() < 0.6);
        assert!(matches!(
            ds.column("gender").unwrap().0.kind,
            ColumnKind::Factor { .. }
        ));
    }
}
