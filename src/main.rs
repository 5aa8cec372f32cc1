use anyhow::{Context, Result};
use clap::Parser;
use creditrisk::cli::{Cli, OutputFormat};
use creditrisk::config::PipelineConfig;
use creditrisk::{persistence, pipeline, report};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    if let Some(fraction) = args.train_fraction {
        if !(fraction > 0.0 && fraction < 1.0) {
            anyhow::bail!(
                "Invalid value for --train-fraction: {} (must be between 0 and 1)",
                fraction
            );
        }
    }

    init_tracing(args.debug);

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    args.apply_overrides(&mut config);

    if let Some(model_path) = &args.score_with {
        let options = config.dataset.ingest_options()?;
        let (model, rows) = pipeline::score(&args.input, model_path, &options)
            .with_context(|| format!("Failed to score {}", args.input.display()))?;
        eprintln!("{}", persistence::model_status_line(&model));
        print!("{}", report::scores_to_csv(&rows));
        return Ok(());
    }

    let outcome = pipeline::run(&args.input, &config)
        .with_context(|| format!("Pipeline failed on {}", args.input.display()))?;

    match args.format {
        OutputFormat::Text => {
            print!("{}", outcome.report.to_text());
            println!();
            match &outcome.model_path {
                Some(path) => println!(
                    "Selected model: {} (saved to {})",
                    outcome.selected,
                    path.display()
                ),
                None => println!("Selected model: {} (not saved)", outcome.selected),
            }
        }
        OutputFormat::Json => println!("{}", outcome.report.to_json()?),
        OutputFormat::Csv => print!("{}", outcome.report.to_csv()),
    }

    Ok(())
}
