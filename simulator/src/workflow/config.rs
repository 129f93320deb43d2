use anyhow::Context;
use cov2momcore::config::OutputFieldSpec;
use cov2momcore::prelude::ChannelValues;
use cov2momcore::ray_interface::{Calibration, OutputEncoding, OutputFieldId};
use cov2momcore::{MomentsConfig, PolarizationMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::generator::profile::GeneratorConfig;

const DEFAULT_RECEIVER_GAIN_DB: f64 = 37.0;
const DEFAULT_RADAR_CONSTANT_DB: f64 = -68.0;

fn default_workers() -> usize {
    4
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub moments: MomentsConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    /// One entry per pulse width. Empty means derive one from the generator.
    #[serde(default)]
    pub calibrations: Vec<Calibration>,
    #[serde(default = "default_workers")]
    pub n_workers: usize,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(
        mode: PolarizationMode,
        n_workers: usize,
        gate_count: usize,
        rays_per_sweep: usize,
    ) -> Self {
        Self {
            moments: MomentsConfig::new(mode, default_output_fields(mode)),
            generator: GeneratorConfig {
                gate_count,
                rays_per_sweep,
                ..Default::default()
            },
            calibrations: Vec::new(),
            n_workers,
        }
    }

    pub fn calibrations(&self) -> Vec<Calibration> {
        if !self.calibrations.is_empty() {
            return self.calibrations.clone();
        }
        vec![Calibration {
            pulse_width_us: self.generator.pulse_width_us,
            noise_dbm: ChannelValues::splat(self.generator.noise_dbm),
            receiver_gain_db: ChannelValues::splat(DEFAULT_RECEIVER_GAIN_DB),
            radar_constant_h_db: DEFAULT_RADAR_CONSTANT_DB,
            radar_constant_v_db: DEFAULT_RADAR_CONSTANT_DB,
            system_phidp_deg: self.generator.system_phidp_deg,
            zdr_correction_db: 0.0,
            ldr_correction_db_h: 0.0,
            ldr_correction_db_v: 0.0,
            dbz_correction: 0.0,
            xmit_power_dbm_h: None,
            xmit_power_dbm_v: None,
        }]
    }
}

fn spec(id: OutputFieldId, name: &str, units: &str, long_name: &str) -> OutputFieldSpec {
    OutputFieldSpec {
        id,
        name: name.to_string(),
        units: units.to_string(),
        long_name: long_name.to_string(),
        encoding: OutputEncoding::Float32,
    }
}

/// Output set used when no workflow file is given.
pub fn default_output_fields(mode: PolarizationMode) -> Vec<OutputFieldSpec> {
    let mut fields = vec![
        spec(OutputFieldId::Snr, "SNR", "dB", "signal_to_noise_ratio"),
        spec(OutputFieldId::Dbz, "DBZ", "dBZ", "reflectivity"),
        spec(OutputFieldId::Vel, "VEL", "m/s", "radial_velocity"),
        spec(OutputFieldId::Width, "WIDTH", "m/s", "spectrum_width"),
        spec(OutputFieldId::Ncp, "NCP", "", "normalized_coherent_power"),
    ];
    match mode {
        PolarizationMode::SinglePolH | PolarizationMode::SinglePolV => {}
        PolarizationMode::DpHOnly => {
            fields.push(spec(OutputFieldId::Ldrh, "LDRH", "dB", "linear_depolarization_ratio_h"));
        }
        PolarizationMode::DpVOnly => {
            fields.push(spec(OutputFieldId::Ldrv, "LDRV", "dB", "linear_depolarization_ratio_v"));
        }
        PolarizationMode::DpAltHvCoOnly
        | PolarizationMode::DpAltHvCoCross
        | PolarizationMode::DpSimHv => {
            fields.push(spec(OutputFieldId::Zdr, "ZDR", "dB", "differential_reflectivity"));
            fields.push(spec(OutputFieldId::Rhohv, "RHOHV", "", "cross_correlation_ratio"));
            fields.push(spec(OutputFieldId::Phidp, "PHIDP", "deg", "differential_phase"));
            fields.push(spec(OutputFieldId::Kdp, "KDP", "deg/km", "specific_differential_phase"));
            fields.push(spec(OutputFieldId::Psob, "PSOB", "", "possible_second_trip_flag"));
        }
    }
    if mode.is_alternating() {
        fields.push(spec(OutputFieldId::VelAlt, "VEL_ALT", "m/s", "radial_velocity_alternating"));
    }
    if mode == PolarizationMode::DpAltHvCoCross {
        fields.push(spec(OutputFieldId::Ldrh, "LDRH", "dB", "linear_depolarization_ratio_h"));
    }
    fields
}
