//! Side-by-side model comparison report
//!
//! Rows stay in training order. Renders as an aligned text table, JSON or
//! CSV. Undefined AUC prints as `NaN` in text and CSV and `null` in JSON.

use crate::metrics::{ClassificationMetrics, ConfusionMatrix};
use crate::persistence::ScoredRow;
use serde::Serialize;

/// One model's line in the report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub model: String,
    pub accuracy: f64,
    pub recall: f64,
    pub precision: f64,
    pub auc: f64,
    /// Wall-clock training time
    pub training_seconds: f64,
    /// Test-partition counts behind the rates
    pub confusion: ConfusionMatrix,
}

impl ReportRow {
    pub fn new(
        model: impl Into<String>,
        metrics: &ClassificationMetrics,
        training_seconds: f64,
    ) -> Self {
        Self {
            model: model.into(),
            accuracy: metrics.accuracy,
            recall: metrics.recall,
            precision: metrics.precision,
            auc: metrics.auc,
            training_seconds,
            confusion: metrics.confusion,
        }
    }
}

/// Evaluation report for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub seed: u64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub rows: Vec<ReportRow>,
}

impl EvaluationReport {
    pub fn new(seed: u64, train_rows: usize, test_rows: usize) -> Self {
        Self {
            seed,
            train_rows,
            test_rows,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: ReportRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, model: &str) -> Option<&ReportRow> {
        self.rows.iter().find(|r| r.model == model)
    }

    /// Human-readable table
    pub fn to_text(&self) -> String {
        let name_width = self
            .rows
            .iter()
            .map(|r| r.model.len())
            .max()
            .unwrap_or(0)
            .max("Model".len());

        let mut output = String::new();
        output.push_str(&format!(
            "=== Model Comparison (seed {}, {} train / {} test rows) ===\n",
            self.seed, self.train_rows, self.test_rows
        ));
        output.push_str(&format!(
            "{:<width$}  {:>8}  {:>8}  {:>9}  {:>8}  {:>10}\n",
            "Model",
            "Accuracy",
            "Recall",
            "Precision",
            "AUC",
            "Train (s)",
            width = name_width
        ));
        output.push_str(&format!("{}\n", "─".repeat(name_width + 55)));
        for row in &self.rows {
            output.push_str(&format!(
                "{:<width$}  {:>8.4}  {:>8.4}  {:>9.4}  {:>8.4}  {:>10.3}\n",
                row.model,
                row.accuracy,
                row.recall,
                row.precision,
                row.auc,
                row.training_seconds,
                width = name_width
            ));
        }
        output
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::from("model,accuracy,recall,precision,auc,training_seconds\n");
        for row in &self.rows {
            output.push_str(&format!(
                "{},{},{},{},{},{}\n",
                escape_field(&row.model),
                row.accuracy,
                row.recall,
                row.precision,
                row.auc,
                row.training_seconds
            ));
        }
        output
    }
}

/// `id,probability,label` lines for scored records; vote models leave the
/// probability empty
pub fn scores_to_csv(rows: &[ScoredRow]) -> String {
    let mut output = String::from("id,probability,label\n");
    for row in rows {
        let probability = row.probability.map(|p| p.to_string()).unwrap_or_default();
        output.push_str(&format!(
            "{},{},{}\n",
            escape_field(&row.id),
            probability,
            row.label
        ));
    }
    output
}

/// Quote a CSV field containing a comma, quote or newline
pub(crate) fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
