//! creditrisk - credit default model comparison
//!
//! This library ingests labelled credit records, stores them in a columnar
//! file, splits them with a fixed seed, trains several classifiers (logistic
//! regression, random forest, gradient-boosted trees and a majority-vote
//! ensemble), compares them on held-out data and persists the chosen model
//! for later scoring.

pub mod cli;
pub mod columnar;
pub mod config;
pub mod dataset;
pub mod formula;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod report;
pub mod split;

#[doc(hidden)]
pub mod testdata;
