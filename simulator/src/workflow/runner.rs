use crate::generator::profile::build_volume;
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use cov2momcore::prelude::ChannelValues;
use cov2momcore::ray_interface::{CalibrationSet, MomentsRay};
use cov2momcore::scheduler::ChannelNoiseMean;
use cov2momcore::telemetry::Metrics;
use cov2momcore::{PolarizationMode, RayScheduler};
use serde::Serialize;
use std::sync::Arc;

/// Valid-gate statistics of one output field over a volume.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSummary {
    pub name: String,
    pub valid_gates: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub mode: PolarizationMode,
    pub metrics: Metrics,
    pub errors: Vec<String>,
    pub censored_gates: usize,
    pub fields: Vec<FieldSummary>,
    pub noise_means: ChannelValues<Option<ChannelNoiseMean>>,
    pub calibrations_used: Vec<f64>,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> anyhow::Result<WorkflowResult> {
        let moments = Arc::new(self.config.moments.clone());
        let mut calibrations =
            CalibrationSet::new(self.config.calibrations()).context("building calibration set")?;
        let rays = build_volume(&self.config.generator).context("synthesizing volume")?;
        log::info!(
            "processing {} rays in {:?} mode with {} workers",
            rays.len(),
            moments.mode,
            self.config.n_workers
        );

        let mut scheduler = RayScheduler::new(Arc::clone(&moments), self.config.n_workers)
            .context("starting worker pool")?;
        for ray in rays {
            let calibration = calibrations.select(ray.context.pulse_width_us);
            scheduler
                .dispatch(ray, calibration)
                .context("dispatching ray")?;
        }
        let volume = scheduler.finish_volume().context("collecting volume")?;

        let fields = moments
            .output_fields
            .iter()
            .map(|spec| summarize(&spec.name, &volume.rays))
            .collect();
        let censored_gates = volume
            .rays
            .iter()
            .filter_map(|ray| ray.censor_flag.as_ref())
            .map(|flag| flag.data.iter().filter(|value| **value != 0).count())
            .sum();

        Ok(WorkflowResult {
            mode: moments.mode,
            metrics: volume.metrics,
            errors: volume
                .errors
                .iter()
                .map(|err| format!("ray {}: {}", err.index, err.error))
                .collect(),
            censored_gates,
            fields,
            noise_means: volume.noise_means,
            calibrations_used: calibrations
                .used()
                .iter()
                .map(|cal| cal.pulse_width_us)
                .collect(),
        })
    }
}

fn summarize(name: &str, rays: &[MomentsRay]) -> FieldSummary {
    let mut valid_gates = 0usize;
    let mut sum = 0.0;
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    let values = rays
        .iter()
        .filter_map(|ray| ray.field(name))
        .flat_map(|field| {
            let missing = field.missing_value;
            field.data.iter().filter(move |value| **value != missing)
        });
    for value in values {
        let value = f64::from(*value);
        valid_gates += 1;
        sum += value;
        min = min.min(value);
        max = max.max(value);
    }
    let (min, max, mean) = if valid_gates > 0 {
        (Some(min), Some(max), Some(sum / valid_gates as f64))
    } else {
        (None, None, None)
    };
    FieldSummary {
        name: name.to_string(),
        valid_gates,
        min,
        max,
        mean,
    }
}
