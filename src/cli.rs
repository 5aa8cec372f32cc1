//! CLI argument parsing for creditrisk

use crate::config::PipelineConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the model comparison report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// CSV format for spreadsheet analysis
    Csv,
}

#[derive(Parser, Debug)]
#[command(name = "creditrisk")]
#[command(version)]
#[command(about = "Train, compare and persist credit default classifiers", long_about = None)]
pub struct Cli {
    /// Delimited input file with a header row
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Pipeline configuration (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Seed for the split and every learner (default: 42)
    #[arg(long = "seed", value_name = "N")]
    pub seed: Option<u64>,

    /// Probability that a record is used for training (default: 0.7)
    #[arg(long = "train-fraction", value_name = "F")]
    pub train_fraction: Option<f64>,

    /// Intermediate columnar file
    #[arg(long = "columnar", value_name = "PATH")]
    pub columnar: Option<PathBuf>,

    /// Where the selected model is written
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Report format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Train and report without saving a model
    #[arg(long = "no-persist")]
    pub no_persist: bool,

    /// Score INPUT with a saved model instead of training (prints CSV)
    #[arg(long = "score-with", value_name = "MODEL", conflicts_with = "no_persist")]
    pub score_with: Option<PathBuf>,

    /// Enable debug tracing output (to stderr)
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Layer CLI flags over a loaded config
    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(fraction) = self.train_fraction {
            config.train_fraction = fraction;
        }
        if let Some(path) = &self.columnar {
            config.columnar_path = path.clone();
        }
        if let Some(path) = &self.output {
            config.model_path = path.clone();
        }
        if self.no_persist {
            config.persist = false;
        }
    }
}
