// Integration test utilities
//
// Synthetic credit files and scratch directories for driving the binary

#![allow(dead_code)]

pub use creditrisk::testdata::{credit_csv, HEADER};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch directory holding an input file
pub struct Workspace {
    pub dir: TempDir,
    pub input: PathBuf,
}

impl Workspace {
    pub fn new(rows: usize) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let input = dir.path().join("credit.csv");
        fs::write(&input, credit_csv(rows, 2024)).expect("write input");
        Self { dir, input }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a config file with small forests so CLI runs stay quick
    pub fn fast_config(&self) -> PathBuf {
        let path = self.path("creditrisk.toml");
        fs::write(&path, FAST_CONFIG).expect("write config");
        path
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

pub const FAST_CONFIG: &str = r#"
[[model]]
name = "logistic_regression"
family = "logistic_regression"
iterations = 50

[[model]]
name = "random_forest"
family = "random_forest"
num_trees = 5

[[model]]
name = "boosted_trees"
family = "boosted_trees"
num_trees = 10

[[model]]
name = "boosted_trees_unbalanced"
family = "boosted_trees"
num_trees = 10
unbalanced = true

[ensemble]
name = "majority_vote"
members = ["boosted_trees", "boosted_trees_unbalanced"]
"#;
