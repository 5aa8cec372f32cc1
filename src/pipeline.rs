//! End-to-end training and evaluation run
//!
//! ingest → columnar store → split → fit each configured model → evaluate on
//! the test partition → majority-vote ensemble → select → persist.
//!
//! Every stage is fatal on error. Model `i` (0-based, in configured order) is
//! fitted with seed `seed + i`, so a run is reproducible from its config.

use crate::columnar::{read_columnar, write_columnar, ColumnarError};
use crate::config::{ConfigError, EnsembleSpec, PipelineConfig, SelectionPolicy};
use crate::dataset::{read_csv, Dataset, DatasetError, IngestOptions};
use crate::formula::{DesignSpec, Formula, FormulaError};
use crate::metrics::{evaluate, MetricsError};
use crate::models::{Classifier, MajorityVote, ModelError, TrainedModel};
use crate::persistence::{
    load_model, save_model, ModelMetadata, ModelPersistenceError, PersistedModel,
    PersistenceOptions, ScoredRow,
};
use crate::report::{EvaluationReport, ReportRow};
use crate::split::{split, Partition, SplitError};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Columnar(#[from] ColumnarError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error("Model {model}: {source}")]
    Formula {
        model: String,
        #[source]
        source: FormulaError,
    },

    #[error("Model {model}: {source}")]
    Model {
        model: String,
        #[source]
        source: ModelError,
    },

    #[error("Model {model}: {source}")]
    Metrics {
        model: String,
        #[source]
        source: MetricsError,
    },

    #[error(transparent)]
    Persistence(#[from] ModelPersistenceError),

    #[error("Model {0} is not in the report")]
    UnknownModel(String),

    #[error("No model satisfies the selection policy")]
    NoSelectableModel,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// What a run produced
#[derive(Debug)]
pub struct PipelineOutcome {
    pub report: EvaluationReport,
    /// Name of the model chosen by the selection policy
    pub selected: String,
    /// Where the selected model was written, if persisted
    pub model_path: Option<PathBuf>,
    pub partition: Partition,
}

/// A formula bound to the dataset, with both partitions materialized
struct BoundDesign {
    formula: String,
    design: DesignSpec,
    x_train: Vec<Vec<f64>>,
    x_test: Vec<Vec<f64>>,
}

struct FittedModel {
    name: String,
    design: usize,
    hyperparameters: Vec<(String, String)>,
    model: TrainedModel,
    seconds: f64,
}

/// Run the whole pipeline on `input`
pub fn run(input: impl AsRef<Path>, config: &PipelineConfig) -> Result<PipelineOutcome> {
    config.validate()?;
    let started = Instant::now();
    let options = config.dataset.ingest_options()?;

    let raw = read_csv(input.as_ref(), &options)?;
    write_columnar(&raw, &config.columnar_path)?;
    drop(raw);
    let dataset = read_columnar(&config.columnar_path)?;
    tracing::info!(
        "Columnar store {} holds {} records (positive rate {:.3})",
        config.columnar_path.display(),
        dataset.len(),
        dataset.positive_rate()
    );

    let partition = split(dataset.len(), config.train_fraction, config.seed)?;
    partition.ensure_non_empty()?;
    let y_train = dataset.labels(&partition.train);
    let y_test = dataset.labels(&partition.test);
    tracing::info!(
        "Split {} records: {} train / {} test (seed {})",
        dataset.len(),
        partition.train.len(),
        partition.test.len(),
        config.seed
    );
    if y_test.iter().all(|&v| v == y_test[0]) {
        tracing::warn!("Test partition holds a single class; AUC is undefined");
    }

    let compute = config.compute.context();
    let mut designs: Vec<BoundDesign> = Vec::new();
    let mut fitted: Vec<FittedModel> = Vec::new();
    let mut report =
        EvaluationReport::new(config.seed, partition.train.len(), partition.test.len());

    for (position, spec) in config.resolved_models().iter().enumerate() {
        let params = spec.params()?;
        let formula = spec.parsed_formula()?;
        let design = bind_design(&mut designs, &spec.name, &formula, &dataset, &partition)?;
        let hyperparameters = params.describe();
        tracing::debug!("Training {} with {:?}", spec.name, hyperparameters);

        let seed = config.seed.wrapping_add(position as u64);
        let timer = Instant::now();
        let x_train = &designs[design].x_train;
        let model = TrainedModel::fit(&params, x_train, &y_train, seed, compute).map_err(
            |source| PipelineError::Model {
                model: spec.name.clone(),
                source,
            },
        )?;
        let seconds = timer.elapsed().as_secs_f64();

        let row = evaluate_model(&spec.name, &model, &designs[design].x_test, &y_test, seconds)?;
        tracing::info!(
            "Trained {} in {:.3}s: accuracy {:.4}, AUC {:.4}",
            spec.name,
            seconds,
            row.accuracy,
            row.auc
        );
        report.push(row);
        fitted.push(FittedModel {
            name: spec.name.clone(),
            design,
            hyperparameters,
            model,
            seconds,
        });
    }

    if let Some(ensemble) = config.resolved_ensemble() {
        let vote = assemble_ensemble(&ensemble, &fitted)?;
        let row = evaluate_model(
            &vote.name,
            &vote.model,
            &designs[vote.design].x_test,
            &y_test,
            vote.seconds,
        )?;
        tracing::info!(
            "Ensemble {} over {} members: accuracy {:.4}",
            vote.name,
            ensemble.members.len(),
            row.accuracy
        );
        report.push(row);
        fitted.push(vote);
    }

    let selected = select_model(&report, config)?;
    let chosen = fitted
        .iter()
        .find(|f| f.name == selected)
        .ok_or_else(|| PipelineError::UnknownModel(selected.clone()))?;
    tracing::info!("Selected {} ({:?} policy)", selected, config.selection.policy);

    let model_path = if config.persist {
        let bound = &designs[chosen.design];
        let metadata = chosen.hyperparameters.iter().fold(
            ModelMetadata::new(partition.train.len(), dataset.fingerprint.clone()),
            |meta, (k, v)| meta.with_hyperparameter(k.clone(), v.clone()),
        );
        let description = format!("seed {}", config.seed);
        let persisted = PersistedModel {
            name: chosen.name.clone(),
            formula: bound.formula.clone(),
            design: bound.design.clone(),
            model: chosen.model.clone(),
            metadata: metadata.with_description(description.clone()),
        };
        let options = PersistenceOptions::new().with_description(description);
        save_model(&persisted, &config.model_path, options)?;
        Some(config.model_path.clone())
    } else {
        None
    };

    tracing::info!(
        "Pipeline finished in {:.3}s with {} report rows",
        started.elapsed().as_secs_f64(),
        report.len()
    );

    Ok(PipelineOutcome {
        report,
        selected,
        model_path,
        partition,
    })
}

/// Index of the bound design for `formula`, binding it on first use
fn bind_design(
    designs: &mut Vec<BoundDesign>,
    model: &str,
    formula: &Formula,
    dataset: &Dataset,
    partition: &Partition,
) -> Result<usize> {
    let key = formula.to_string();
    if let Some(idx) = designs.iter().position(|d| d.formula == key) {
        return Ok(idx);
    }

    let formula_err = |source| PipelineError::Formula {
        model: model.to_string(),
        source,
    };
    let design = formula.bind(&dataset.schema).map_err(formula_err)?;
    let x_train = design.matrix(dataset, &partition.train).map_err(formula_err)?;
    let x_test = design.matrix(dataset, &partition.test).map_err(formula_err)?;
    tracing::debug!(
        "Bound {} to {} features: {:?}",
        formula,
        design.n_features(),
        design.feature_names()
    );

    designs.push(BoundDesign {
        formula: key,
        design,
        x_train,
        x_test,
    });
    Ok(designs.len() - 1)
}

fn evaluate_model(
    name: &str,
    model: &TrainedModel,
    x_test: &[Vec<f64>],
    y_test: &[u8],
    seconds: f64,
) -> Result<ReportRow> {
    let predicted = model.predict(x_test);
    let probabilities = model.predict_proba(x_test);
    let metrics =
        evaluate(y_test, &predicted, probabilities.as_deref()).map_err(|source| {
            PipelineError::Metrics {
                model: name.to_string(),
                source,
            }
        })?;
    Ok(ReportRow::new(name, &metrics, seconds))
}

/// Vote over already fitted members; its time is the members' total
fn assemble_ensemble(spec: &EnsembleSpec, fitted: &[FittedModel]) -> Result<FittedModel> {
    let members = spec
        .members
        .iter()
        .map(|name| {
            fitted
                .iter()
                .find(|f| &f.name == name)
                .ok_or_else(|| PipelineError::UnknownModel(name.clone()))
        })
        .collect::<Result<Vec<_>>>()?;

    let design = members.first().map(|m| m.design).unwrap_or_default();
    let seconds = members.iter().map(|m| m.seconds).sum();
    let vote = MajorityVote::new(
        members
            .iter()
            .map(|m| (m.name.clone(), m.model.clone()))
            .collect(),
    )
    .map_err(|source| PipelineError::Model {
        model: spec.name.clone(),
        source,
    })?;

    Ok(FittedModel {
        name: spec.name.clone(),
        design,
        hyperparameters: vec![
            ("family".to_string(), "majority_vote".to_string()),
            ("members".to_string(), spec.members.join(",")),
        ],
        model: TrainedModel::MajorityVote(vote),
        seconds,
    })
}

/// Apply the configured selection policy to the report
pub fn select_model(report: &EvaluationReport, config: &PipelineConfig) -> Result<String> {
    let best_by = |metric: fn(&ReportRow) -> f64| {
        report
            .rows
            .iter()
            .filter(|r| !metric(r).is_nan())
            .fold(None::<&ReportRow>, |best, r| match best {
                Some(b) if metric(b) >= metric(r) => Some(b),
                _ => Some(r),
            })
            .map(|r| r.model.clone())
            .ok_or(PipelineError::NoSelectableModel)
    };

    match config.selection.policy {
        SelectionPolicy::Named => report
            .get(&config.selection.model)
            .map(|r| r.model.clone())
            .ok_or_else(|| PipelineError::UnknownModel(config.selection.model.clone())),
        SelectionPolicy::BestAuc => best_by(|r| r.auc),
        SelectionPolicy::BestAccuracy => best_by(|r| r.accuracy),
    }
}

/// Score every record of `input` with the model saved at `model_path`
///
/// The target column may be absent. Columns the model was trained on as
/// factors are read as factors whatever values this batch holds.
pub fn score(
    input: impl AsRef<Path>,
    model_path: impl AsRef<Path>,
    options: &IngestOptions,
) -> Result<(PersistedModel, Vec<ScoredRow>)> {
    let model = load_model(model_path)?;
    let dataset = read_csv(input, &scoring_options(options, &model.design))?;
    let rows = model.score(&dataset)?;
    tracing::info!("Scored {} records with {}", rows.len(), model.name);
    Ok((model, rows))
}

fn scoring_options(options: &IngestOptions, design: &DesignSpec) -> IngestOptions {
    let mut options = options.clone().for_scoring();
    for column in design.factor_columns() {
        if !options.categorical.iter().any(|c| c == column) {
            options.categorical.push(column.to_string());
        }
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_models, ModelFamily, ModelSpec, SelectionConfig};
    use crate::metrics::ConfusionMatrix;
    use crate::models::{ComputeContext, LogisticParams, ModelParams};
    use crate::testdata;
    use std::fs;
    use tempfile::TempDir;

    struct Workspace {
        _dir: TempDir,
        input: PathBuf,
        config: PipelineConfig,
    }

    fn workspace(rows: usize) -> Workspace {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("credit.csv");
        fs::write(&input, testdata::credit_csv(rows, 5)).unwrap();
        let config = PipelineConfig {
            columnar_path: dir.path().join("data").join("credit.cols"),
            model_path: dir.path().join("models").join("credit_model.apr"),
            ..PipelineConfig::default()
        };
        Workspace {
            _dir: dir,
            input,
            config,
        }
    }

    /// Default model list, shrunk so unit tests stay fast
    fn small_models() -> Vec<ModelSpec> {
        default_models()
            .into_iter()
            .map(|mut m| {
                if m.num_trees.is_some() {
                    m.num_trees = Some(5);
                }
                if m.iterations.is_some() {
                    m.iterations = Some(50);
                }
                m
            })
            .collect()
    }

    #[test]
    fn test_run_reports_every_model_and_ensemble() {
        let mut ws = workspace(400);
        ws.config.models = Some(small_models());
        ws.config.ensemble = Some(crate::config::default_ensemble());

        let outcome = run(&ws.input, &ws.config).unwrap();
        let names: Vec<&str> = outcome.report.rows.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "logistic_regression",
                "random_forest",
                "boosted_trees",
                "boosted_trees_unbalanced",
                "boosted_trees_fast",
                "boosted_trees_slow",
                "majority_vote",
            ]
        );
        for row in &outcome.report.rows {
            assert!((0.0..=1.0).contains(&row.accuracy));
            assert!((0.0..=1.0).contains(&row.precision));
            assert!((0.0..=1.0).contains(&row.recall));
            assert!(row.training_seconds >= 0.0);
        }
        for row in &outcome.report.rows {
            assert_eq!(
                row.confusion.total(),
                outcome.partition.test.len(),
                "{}",
                row.model
            );
        }
        assert!(outcome.report.get("majority_vote").unwrap().auc.is_nan());
        assert!(!outcome.report.get("boosted_trees").unwrap().auc.is_nan());
        assert_eq!(outcome.partition.len(), 400);
        assert_eq!(outcome.selected, "boosted_trees");
        assert!(ws.config.columnar_path.exists());
        assert!(outcome.model_path.unwrap().exists());
    }

    #[test]
    fn test_ensemble_time_is_member_total() {
        let mut ws = workspace(200);
        ws.config.models = Some(small_models());
        ws.config.ensemble = Some(crate::config::default_ensemble());
        ws.config.persist = false;

        let report = run(&ws.input, &ws.config).unwrap().report;
        let members: f64 = [
            "boosted_trees",
            "boosted_trees_unbalanced",
            "boosted_trees_fast",
            "boosted_trees_slow",
        ]
        .iter()
        .map(|m| report.get(m).unwrap().training_seconds)
        .sum();
        let vote = report.get("majority_vote").unwrap().training_seconds;
        assert!((vote - members).abs() < 1e-9);
    }

    #[test]
    fn test_runs_are_reproducible() {
        let mut ws = workspace(300);
        ws.config.models = Some(small_models());
        ws.config.persist = false;

        let first = run(&ws.input, &ws.config).unwrap();
        let second = run(&ws.input, &ws.config).unwrap();
        assert_eq!(first.partition, second.partition);
        for (a, b) in first.report.rows.iter().zip(&second.report.rows) {
            assert_eq!(a.model, b.model);
            assert_eq!(a.accuracy, b.accuracy);
            assert!(a.auc == b.auc || (a.auc.is_nan() && b.auc.is_nan()));
        }
    }

    #[test]
    fn test_persisted_model_scores_input() {
        let mut ws = workspace(200);
        ws.config.models = Some(small_models());

        let outcome = run(&ws.input, &ws.config).unwrap();
        let path = outcome.model_path.unwrap();
        let (model, rows) = score(&ws.input, &path, &IngestOptions::default()).unwrap();

        assert_eq!(model.name, "boosted_trees");
        assert_eq!(
            model.metadata.training_samples,
            outcome.partition.train.len()
        );
        assert_eq!(model.metadata.hyperparameters["num_trees"], "5");
        assert_eq!(rows.len(), 200);
        assert_eq!(rows[0].id, "acct-00000");

        // The run description also lands in the container header
        let header = aprender::format::inspect(&path).unwrap();
        assert_eq!(header.metadata.model_name.as_deref(), Some("boosted_trees"));
        assert_eq!(header.metadata.description.as_deref(), Some("seed 42"));
        assert_eq!(header.metadata.description, model.metadata.description);
    }

    #[test]
    fn test_scoring_without_target_column() {
        let mut ws = workspace(200);
        ws.config.models = Some(small_models());
        let path = run(&ws.input, &ws.config).unwrap().model_path.unwrap();

        // Drop the bad_flag column (second field) from every line
        let unlabelled: String = fs::read_to_string(&ws.input)
            .unwrap()
            .lines()
            .map(|line| {
                let mut fields: Vec<&str> = line.split(',').collect();
                fields.remove(1);
                format!("{}\n", fields.join(","))
            })
            .collect();
        let input = ws.input.with_file_name("unlabelled.csv");
        fs::write(&input, unlabelled).unwrap();

        let (_, rows) = score(&input, &path, &IngestOptions::default()).unwrap();
        assert_eq!(rows.len(), 200);
        assert!(rows.iter().all(|r| r.label <= 1));
    }

    #[test]
    fn test_scoring_keeps_trained_factor_columns() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("branches.csv");
        let mut csv = String::from("account_id,bad_flag,amount,branch\n");
        for i in 0..120 {
            let branch = if i % 3 == 0 { "B7" } else { "12" };
            let bad = u8::from(i % 3 == 0 || i % 7 == 0);
            csv.push_str(&format!("a{},{},{},{}\n", i, bad, i % 17, branch));
        }
        fs::write(&input, csv).unwrap();

        let config = PipelineConfig {
            columnar_path: dir.path().join("branches.cols"),
            model_path: dir.path().join("branches.apr"),
            models: Some(vec![ModelSpec {
                formula: "bad_flag ~ amount + branch".to_string(),
                num_trees: Some(5),
                ..ModelSpec::new("gbt", ModelFamily::BoostedTrees)
            }]),
            selection: SelectionConfig {
                policy: SelectionPolicy::Named,
                model: "gbt".to_string(),
            },
            ..PipelineConfig::default()
        };
        let path = run(&input, &config).unwrap().model_path.unwrap();

        // Every branch in this batch looks numeric
        let batch = dir.path().join("batch.csv");
        fs::write(&batch, "account_id,amount,branch\nn1,3,12\nn2,9,12\n").unwrap();

        let (model, rows) = score(&batch, &path, &IngestOptions::default()).unwrap();
        assert_eq!(model.design.factor_columns(), vec!["branch"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id, "n2");
    }

    #[test]
    fn test_evaluation_rejects_truncated_predictions() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<u8> = (0..20).map(|i| u8::from(i >= 10)).collect();
        let params = ModelParams::LogisticRegression(LogisticParams::default());
        let model = TrainedModel::fit(&params, &x, &y, 1, ComputeContext::Local).unwrap();

        let row = evaluate_model("lr", &model, &x, &y, 0.0).unwrap();
        assert_eq!(row.confusion.total(), 20);
        assert!(matches!(
            evaluate_model("lr", &model, &x[..5], &y, 0.0),
            Err(PipelineError::Metrics { model, .. }) if model == "lr"
        ));
    }

    #[test]
    fn test_unknown_formula_field_is_fatal() {
        let mut ws = workspace(100);
        let mut models = small_models();
        models[0].formula = "bad_flag ~ amount + shoe_size".to_string();
        ws.config.models = Some(models);

        match run(&ws.input, &ws.config) {
            Err(PipelineError::Formula { model, source }) => {
                assert_eq!(model, "logistic_regression");
                assert_eq!(source, FormulaError::UnknownField("shoe_size".to_string()));
            }
            other => panic!("expected formula error, got {:?}", other.map(|o| o.selected)),
        }
    }

    #[test]
    fn test_unusable_compute_context_is_fatal() {
        let mut ws = workspace(100);
        ws.config.models = Some(vec![ModelSpec {
            num_trees: Some(3),
            ..ModelSpec::new("rf", ModelFamily::RandomForest)
        }]);
        ws.config.selection.model = "rf".to_string();
        ws.config.compute.context = crate::config::ContextKind::Parallel;
        ws.config.compute.threads = 0;

        assert!(matches!(
            run(&ws.input, &ws.config),
            Err(PipelineError::Model {
                source: ModelError::ComputeContext(_),
                ..
            })
        ));
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let ws = workspace(10);
        assert!(matches!(
            run(ws.input.with_extension("missing"), &ws.config),
            Err(PipelineError::Dataset(DatasetError::Io { .. }))
        ));
    }

    #[test]
    fn test_selection_policies() {
        let mut report = EvaluationReport::new(1, 70, 30);
        for (name, accuracy, auc) in [("a", 0.7, 0.8), ("b", 0.9, 0.75), ("vote", 0.95, f64::NAN)] {
            report.push(ReportRow {
                model: name.to_string(),
                accuracy,
                recall: 0.5,
                precision: 0.5,
                auc,
                training_seconds: 0.1,
                confusion: ConfusionMatrix::default(),
            });
        }

        let mut config = PipelineConfig::default();
        config.selection = SelectionConfig {
            policy: SelectionPolicy::BestAuc,
            model: String::new(),
        };
        assert_eq!(select_model(&report, &config).unwrap(), "a");

        config.selection.policy = SelectionPolicy::BestAccuracy;
        assert_eq!(select_model(&report, &config).unwrap(), "vote");

        config.selection.policy = SelectionPolicy::Named;
        config.selection.model = "b".to_string();
        assert_eq!(select_model(&report, &config).unwrap(), "b");

        config.selection.model = "gbm".to_string();
        assert!(matches!(
            select_model(&report, &config),
            Err(PipelineError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_best_auc_needs_a_defined_auc() {
        let mut report = EvaluationReport::new(1, 70, 30);
        report.push(ReportRow {
            model: "vote".to_string(),
            accuracy: 0.9,
            recall: 0.5,
            precision: 0.5,
            auc: f64::NAN,
            training_seconds: 0.1,
            confusion: ConfusionMatrix::default(),
        });
        let mut config = PipelineConfig::default();
        config.selection.policy = SelectionPolicy::BestAuc;
        assert!(matches!(
            select_model(&report, &config),
            Err(PipelineError::NoSelectableModel)
        ));
    }
}
