use anyhow::Context;
use clap::{Parser, ValueEnum};
use cov2momcore::PolarizationMode;
use std::fs;
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    SinglePolH,
    SinglePolV,
    DpAltHvCoOnly,
    DpAltHvCoCross,
    DpSimHv,
    DpHOnly,
    DpVOnly,
}

impl From<Mode> for PolarizationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::SinglePolH => PolarizationMode::SinglePolH,
            Mode::SinglePolV => PolarizationMode::SinglePolV,
            Mode::DpAltHvCoOnly => PolarizationMode::DpAltHvCoOnly,
            Mode::DpAltHvCoCross => PolarizationMode::DpAltHvCoCross,
            Mode::DpSimHv => PolarizationMode::DpSimHv,
            Mode::DpHOnly => PolarizationMode::DpHOnly,
            Mode::DpVOnly => PolarizationMode::DpVOnly,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "Synthetic covariance volume driver for the moments engine")]
struct Args {
    /// Load a workflow config from YAML; the remaining flags are ignored
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Mode::DpSimHv)]
    mode: Mode,
    #[arg(long, default_value_t = 4)]
    workers: usize,
    #[arg(long, default_value_t = 500)]
    gates: usize,
    #[arg(long, default_value_t = 36)]
    rays: usize,
    /// Write the JSON summary here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = if let Some(path) = args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::from_args(args.mode.into(), args.workers, args.gates, args.rays)
    };

    let result = Runner::new(workflow_config).execute()?;
    log::info!(
        "volume done: processed {}, dropped {}, peak in flight {}",
        result.metrics.processed,
        result.metrics.dropped,
        result.metrics.peak_in_flight
    );

    let summary = serde_json::to_string_pretty(&result).context("serializing summary")?;
    match args.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            fs::write(&path, summary)
                .with_context(|| format!("writing summary {}", path.display()))?;
        }
        None => println!("{summary}"),
    }

    Ok(())
}
