//! Capabilities the engine consumes: moment estimation, noise location,
//! alternating-velocity unfolding and KDP filtering.
//!
//! Each capability is a trait so that a worker can be handed any
//! implementation. The reference implementations live in the submodules.

pub mod alt_vel;
pub mod kdp_filter;
pub mod noise_locator;
pub mod pulse_pair;

use ndarray::Array1;
use num_complex::Complex64;

use crate::prelude::{Channel, ChannelValues};
use crate::processing::PerGateFields;
use crate::ray_interface::{Calibration, RayContext};

pub use alt_vel::FoldIntervalUnfolder;
pub use kdp_filter::FirKdpFilter;
pub use noise_locator::InterestNoiseLocator;
pub use pulse_pair::PulsePairEstimator;

/// Single-channel covariances (SinglePolH, SinglePolV).
#[derive(Debug, Clone, Copy)]
pub struct SinglePolInputs {
    pub lag0: f64,
    pub lag1: Complex64,
    pub lag2: Complex64,
    pub lag3: Complex64,
}

/// Alternating H/V covariances. Cross-polar members are zero in co-only mode.
#[derive(Debug, Clone, Copy)]
pub struct AltHvInputs {
    pub lag0_hc: f64,
    pub lag0_hx: f64,
    pub lag0_vc: f64,
    pub lag0_vx: f64,
    pub lag0_vchx: Complex64,
    pub lag0_hcvx: Complex64,
    pub lag1_vxhx: Complex64,
    pub lag1_vchc: Complex64,
    pub lag1_hcvc: Complex64,
    pub lag2_hc: Complex64,
    pub lag2_vc: Complex64,
}

/// Simultaneous H/V covariances.
#[derive(Debug, Clone, Copy)]
pub struct SimHvInputs {
    pub lag0_hc: f64,
    pub lag0_vc: f64,
    pub rvvhh0: Complex64,
    pub lag1_hc: Complex64,
    pub lag1_vc: Complex64,
    pub lag2_hc: Complex64,
    pub lag2_vc: Complex64,
    pub lag3_hc: Complex64,
    pub lag3_vc: Complex64,
}

/// Single-transmit dual-receive covariances (H-only or V-only transmit).
#[derive(Debug, Clone, Copy)]
pub struct DpSingleTxInputs {
    pub lag0_co: f64,
    pub lag0_cross: f64,
    pub lag1: Complex64,
    pub lag2: Complex64,
    pub lag3: Complex64,
}

/// Per-gate moment estimation, one entry point per mode and per
/// noise-preparation variant.
///
/// `init_ray` runs once per ray before any gate; it resets any estimated
/// noise to the calibrated values.
pub trait MomentEstimator: Send {
    fn init_ray(&mut self, context: &RayContext, calibration: &Calibration);

    /// Use `noise_dbm` instead of the calibrated noise when subtracting noise.
    fn set_estimated_noise_dbm(&mut self, channel: Channel, noise_dbm: f64);

    fn single_pol_h(&self, gate: usize, inputs: &SinglePolInputs, fields: &mut PerGateFields);
    fn single_pol_v(&self, gate: usize, inputs: &SinglePolInputs, fields: &mut PerGateFields);
    fn alt_hv_co_only(&self, gate: usize, inputs: &AltHvInputs, fields: &mut PerGateFields);
    fn alt_hv_co_cross(&self, gate: usize, inputs: &AltHvInputs, fields: &mut PerGateFields);
    fn sim_hv(&self, gate: usize, inputs: &SimHvInputs, fields: &mut PerGateFields);
    fn h_only(&self, gate: usize, inputs: &DpSingleTxInputs, fields: &mut PerGateFields);
    fn v_only(&self, gate: usize, inputs: &DpSingleTxInputs, fields: &mut PerGateFields);

    fn single_pol_h_noise_prep(&self, inputs: &SinglePolInputs, fields: &mut PerGateFields);
    fn single_pol_v_noise_prep(&self, inputs: &SinglePolInputs, fields: &mut PerGateFields);
    fn alt_hv_noise_prep(&self, inputs: &AltHvInputs, fields: &mut PerGateFields);
    fn sim_hv_noise_prep(&self, inputs: &SimHvInputs, fields: &mut PerGateFields);
    fn h_only_noise_prep(&self, inputs: &DpSingleTxInputs, fields: &mut PerGateFields);
    fn v_only_noise_prep(&self, inputs: &DpSingleTxInputs, fields: &mut PerGateFields);
}

/// Result of noise location over one ray.
#[derive(Debug, Clone, Default)]
pub struct NoiseLocation {
    pub noise_flag: Vec<Option<bool>>,
    pub signal_flag: Vec<Option<bool>>,
    pub accum_phase_change: Vec<Option<f64>>,
    pub phase_change_error: Vec<Option<f64>>,
    pub dbm_sdev: Vec<Option<f64>>,
    pub ncp_mean: Vec<Option<f64>>,
    /// Median noise power per channel; `None` where it was not resolved.
    pub median_noise_dbm: ChannelValues<Option<f64>>,
    /// Median minus calibrated noise per channel.
    pub noise_bias_db: ChannelValues<Option<f64>>,
}

impl NoiseLocation {
    /// Clears every per-gate vector to `n_gates` missing entries.
    pub fn reset(&mut self, n_gates: usize) {
        for flags in [&mut self.noise_flag, &mut self.signal_flag] {
            flags.clear();
            flags.resize(n_gates, None);
        }
        for stats in [
            &mut self.accum_phase_change,
            &mut self.phase_change_error,
            &mut self.dbm_sdev,
            &mut self.ncp_mean,
        ] {
            stats.clear();
            stats.resize(n_gates, None);
        }
        self.median_noise_dbm = ChannelValues::splat(None);
        self.noise_bias_db = ChannelValues::splat(None);
    }
}

/// Classifies gates as noise or signal and estimates per-channel noise.
///
/// Implementations may keep state across rays (running medians); one
/// instance belongs to exactly one worker.
pub trait NoiseLocator: Send {
    fn set_ray_props(&mut self, context: &RayContext, calibration: &Calibration);

    /// Reads noise-prep members of `fields` for the given channels.
    fn locate(&mut self, channels: &[Channel], fields: &[PerGateFields]) -> &NoiseLocation;
}

/// Recovers the full velocity from the alternating-mode estimates.
pub trait AltVelUnfolder: Send {
    fn unfold(&self, nyquist_mps: f64, fields: &mut [PerGateFields]);
}

/// Flat per-gate inputs of the KDP filter. `NaN` marks a missing gate.
#[derive(Debug, Clone, Default)]
pub struct KdpInputs {
    pub snr: Array1<f64>,
    pub dbz: Array1<f64>,
    pub zdr: Array1<f64>,
    pub rhohv: Array1<f64>,
    pub phidp: Array1<f64>,
}

/// KDP filter output per gate. `NaN` marks a missing gate.
#[derive(Debug, Clone, Default)]
pub struct KdpOutput {
    pub kdp: Array1<f64>,
    pub phidp_cond: Array1<f64>,
    pub phidp_filt: Array1<f64>,
    pub phidp_sdev: Array1<f64>,
    pub phidp_jitter: Array1<f64>,
    pub zdr_sdev: Array1<f64>,
    pub psob: Array1<f64>,
    pub dbz_atten_correction: Array1<f64>,
    pub zdr_atten_correction: Array1<f64>,
}

pub trait KdpFilter: Send {
    fn compute(&mut self, context: &RayContext, inputs: &KdpInputs) -> &KdpOutput;
}

/// `NaN` to `None`.
pub(crate) fn finite(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}
