//! Shared fixtures for the unit tests.

use crate::config::OutputFieldSpec;
use crate::prelude::ChannelValues;
use crate::ray_interface::{
    Calibration, CovarianceFieldId, CovarianceRay, OutputEncoding, OutputFieldId, RayContext,
};

pub fn calibration(pulse_width_us: f64) -> Calibration {
    Calibration {
        pulse_width_us,
        noise_dbm: ChannelValues::splat(-77.0),
        receiver_gain_db: ChannelValues::splat(37.0),
        radar_constant_h_db: -68.0,
        radar_constant_v_db: -68.2,
        system_phidp_deg: 0.0,
        zdr_correction_db: 0.0,
        ldr_correction_db_h: 0.0,
        ldr_correction_db_v: 0.0,
        dbz_correction: 0.0,
        xmit_power_dbm_h: None,
        xmit_power_dbm_v: None,
    }
}

pub fn context(gate_count: usize) -> RayContext {
    RayContext {
        gate_count,
        start_range_km: 0.15,
        gate_spacing_km: 0.15,
        azimuth_deg: 45.0,
        elevation_deg: 0.5,
        time_secs: 1_700_000_000,
        nano_secs: 0,
        nyquist_mps: 25.0,
        prt_sec: 0.001,
        n_samples: 64,
        pulse_width_us: 1.0,
        wavelength_m: 0.1068,
        radar_height_km: 1.6,
        meas_xmit_power_dbm_h: None,
        meas_xmit_power_dbm_v: None,
        sweep_index: 0,
        ray_index: 0,
    }
}

const CO_POWER_DB: f32 = -54.0;
const CROSS_POWER_DB: f32 = -60.0;

/// Stationary target about 23 dB above the noise floor on the co-polar
/// channels. Lagged magnitudes are stored as 20 log10 |R|, so a lag at 0.9
/// of the co-polar power sits near twice the power in dB.
fn add_stationary(ray: &mut CovarianceRay, ids: &[CovarianceFieldId]) {
    let n_gates = ray.context.gate_count;
    for id in ids {
        let name = id.as_str();
        let is_cross = name.contains("HX") || name.contains("VX");
        let value = if name.ends_with("_PHASE") {
            0.0
        } else if matches!(
            id,
            CovarianceFieldId::Lag0HcDb
                | CovarianceFieldId::Lag0HxDb
                | CovarianceFieldId::Lag0VcDb
                | CovarianceFieldId::Lag0VxDb
        ) {
            if is_cross {
                CROSS_POWER_DB
            } else {
                CO_POWER_DB
            }
        } else if is_cross {
            CO_POWER_DB + CROSS_POWER_DB - 1.0
        } else {
            2.0 * CO_POWER_DB - 1.0
        };
        ray.add_field(name, vec![value; n_gates]);
    }
}

pub fn single_pol_h_ray(gate_count: usize) -> CovarianceRay {
    use CovarianceFieldId::*;
    let mut ray = CovarianceRay::new(context(gate_count));
    add_stationary(
        &mut ray,
        &[
            Lag0HcDb,
            Lag1HcDb,
            Lag1HcPhase,
            Lag2HcDb,
            Lag2HcPhase,
            Lag3HcDb,
            Lag3HcPhase,
        ],
    );
    ray
}

pub fn alt_co_cross_ray(gate_count: usize) -> CovarianceRay {
    use CovarianceFieldId::*;
    let mut ray = CovarianceRay::new(context(gate_count));
    add_stationary(
        &mut ray,
        &[
            Lag0HcDb,
            Lag0HxDb,
            Lag0VcDb,
            Lag0VxDb,
            Lag0VchxDb,
            Lag0VchxPhase,
            Lag0HcvxDb,
            Lag0HcvxPhase,
            Lag1VxhxDb,
            Lag1VxhxPhase,
            Lag1VchcDb,
            Lag1VchcPhase,
            Lag1HcvcDb,
            Lag1HcvcPhase,
            Lag2HcDb,
            Lag2HcPhase,
            Lag2VcDb,
            Lag2VcPhase,
        ],
    );
    ray
}

/// Every covariance field present, so any mode can extract.
pub fn full_ray(gate_count: usize) -> CovarianceRay {
    let mut ray = CovarianceRay::new(context(gate_count));
    add_stationary(&mut ray, &CovarianceFieldId::ALL);
    ray
}

pub fn output(id: OutputFieldId, name: &str) -> OutputFieldSpec {
    OutputFieldSpec {
        id,
        name: name.into(),
        units: String::new(),
        long_name: String::new(),
        encoding: OutputEncoding::Float32,
    }
}

pub fn dbz_outputs() -> Vec<OutputFieldSpec> {
    vec![output(OutputFieldId::Dbz, "DBZ"), output(OutputFieldId::Vel, "VEL")]
}
