use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::prelude::{MomentsError, MomentsResult};
use crate::ray_interface::{Calibration, CovarianceFieldId, OutputEncoding, OutputFieldId};

/// Transmit/receive configuration of the radar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolarizationMode {
    SinglePolH,
    SinglePolV,
    DpAltHvCoOnly,
    DpAltHvCoCross,
    DpSimHv,
    DpHOnly,
    DpVOnly,
}

impl PolarizationMode {
    pub const ALL: [PolarizationMode; 7] = [
        PolarizationMode::SinglePolH,
        PolarizationMode::SinglePolV,
        PolarizationMode::DpAltHvCoOnly,
        PolarizationMode::DpAltHvCoCross,
        PolarizationMode::DpSimHv,
        PolarizationMode::DpHOnly,
        PolarizationMode::DpVOnly,
    ];

    /// Alternating H/V transmit modes.
    pub fn is_alternating(self) -> bool {
        matches!(
            self,
            PolarizationMode::DpAltHvCoOnly | PolarizationMode::DpAltHvCoCross
        )
    }

    /// Modes for which the KDP filter runs.
    pub fn computes_kdp(self) -> bool {
        matches!(
            self,
            PolarizationMode::DpAltHvCoOnly
                | PolarizationMode::DpAltHvCoCross
                | PolarizationMode::DpSimHv
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CensoringMode {
    #[default]
    None,
    ByNoiseFlag,
    BySnrAndNcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CensoringConfig {
    pub mode: CensoringMode,
    pub snr_threshold_db: f64,
    pub ncp_threshold: f64,
    /// Append a CENSOR_FLAG field to each output ray.
    pub write_censor_flag: bool,
}

impl Default for CensoringConfig {
    fn default() -> Self {
        Self {
            mode: CensoringMode::None,
            snr_threshold_db: 3.0,
            ncp_threshold: 0.15,
            write_censor_flag: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseMethod {
    #[default]
    RayMedian,
    RunningMedian,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterestMapPoint {
    pub value: f64,
    pub interest: f64,
}

impl InterestMapPoint {
    pub const fn new(value: f64, interest: f64) -> Self {
        Self { value, interest }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestMapConfig {
    pub points: Vec<InterestMapPoint>,
    pub weight: f64,
}

impl InterestMapConfig {
    fn ramp(lo: (f64, f64), hi: (f64, f64)) -> Self {
        Self {
            points: vec![
                InterestMapPoint::new(lo.0, lo.1),
                InterestMapPoint::new(hi.0, hi.1),
            ],
            weight: 1.0,
        }
    }
}

/// Parameters of the noise locator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub method: NoiseMethod,
    pub ngates_kernel: usize,
    pub ngates_for_running_median: usize,
    pub min_ngates_for_ray_median: usize,
    pub equal_bias_in_all_channels: bool,
    pub phase_change_error_for_noise: InterestMapConfig,
    pub dbm_sdev_for_noise: InterestMapConfig,
    pub ncp_mean_for_noise: InterestMapConfig,
    pub interest_threshold_for_noise: f64,
    pub phase_change_error_for_signal: InterestMapConfig,
    pub dbm_sdev_for_signal: InterestMapConfig,
    pub interest_threshold_for_signal: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            method: NoiseMethod::RayMedian,
            ngates_kernel: 9,
            ngates_for_running_median: 2500,
            min_ngates_for_ray_median: 30,
            equal_bias_in_all_channels: false,
            phase_change_error_for_noise: InterestMapConfig::ramp((40.0, 0.001), (50.0, 1.0)),
            dbm_sdev_for_noise: InterestMapConfig::ramp((0.65, 1.0), (0.75, 0.001)),
            ncp_mean_for_noise: InterestMapConfig::ramp((0.10, 1.0), (0.20, 0.001)),
            interest_threshold_for_noise: 0.51,
            phase_change_error_for_signal: InterestMapConfig::ramp((10.0, 0.001), (20.0, 1.0)),
            dbm_sdev_for_signal: InterestMapConfig::ramp((0.75, 1.0), (0.85, 0.001)),
            interest_threshold_for_signal: 0.51,
        }
    }
}

/// FIR filter lengths supported by the KDP filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum FirLength {
    Len10,
    Len20,
    Len30,
    Len40,
    Len60,
    Len125,
}

impl FirLength {
    pub fn taps(self) -> usize {
        match self {
            FirLength::Len10 => 10,
            FirLength::Len20 => 20,
            FirLength::Len30 => 30,
            FirLength::Len40 => 40,
            FirLength::Len60 => 60,
            FirLength::Len125 => 125,
        }
    }
}

impl TryFrom<usize> for FirLength {
    type Error = MomentsError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(FirLength::Len10),
            20 => Ok(FirLength::Len20),
            30 => Ok(FirLength::Len30),
            40 => Ok(FirLength::Len40),
            60 => Ok(FirLength::Len60),
            125 => Ok(FirLength::Len125),
            other => Err(MomentsError::Configuration(format!(
                "unsupported KDP FIR length {other}, expected one of 10, 20, 30, 40, 60, 125"
            ))),
        }
    }
}

impl From<FirLength> for usize {
    fn from(len: FirLength) -> usize {
        len.taps()
    }
}

/// Power-law coefficients for KDP-based attenuation correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttenuationCoefficients {
    pub dbz_coeff: f64,
    pub dbz_expon: f64,
    pub zdr_coeff: f64,
    pub zdr_expon: f64,
}

impl AttenuationCoefficients {
    /// Band defaults keyed on wavelength (X, C, S).
    pub fn for_wavelength_cm(wavelength_cm: f64) -> Self {
        if wavelength_cm < 4.0 {
            Self {
                dbz_coeff: 0.233,
                dbz_expon: 1.02,
                zdr_coeff: 0.033,
                zdr_expon: 1.15,
            }
        } else if wavelength_cm < 7.0 {
            Self {
                dbz_coeff: 0.073,
                dbz_expon: 0.99,
                zdr_coeff: 0.013,
                zdr_expon: 1.23,
            }
        } else {
            Self {
                dbz_coeff: 0.017,
                dbz_expon: 0.84,
                zdr_coeff: 0.003,
                zdr_expon: 1.05,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AttenuationCorrection {
    #[default]
    None,
    /// Integrate measured KDP; coefficients default by wavelength.
    Kdp {
        #[serde(default)]
        coefficients: Option<AttenuationCoefficients>,
    },
    /// Integrate KDP conditioned on the Z/ZDR self-consistency estimate.
    SelfConsistency {
        #[serde(default)]
        coefficients: Option<AttenuationCoefficients>,
    },
}

/// Parameters of the KDP filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdpConfig {
    pub fir_length: FirLength,
    pub ngates_stats: usize,
    pub use_iterative_filtering: bool,
    pub phidp_difference_threshold: f64,
    pub n_filt_iterations_unfolded: usize,
    pub n_filt_iterations_conditioned: usize,
    pub snr_threshold_db: f64,
    pub rhohv_threshold: f64,
    pub phidp_sdev_max: f64,
    pub phidp_jitter_max: f64,
    pub check_zdr_sdev: bool,
    pub zdr_sdev_max: f64,
    pub min_valid_abs_kdp: f64,
    pub kdp_min_for_self_consistency: f64,
    pub attenuation: AttenuationCorrection,
}

impl Default for KdpConfig {
    fn default() -> Self {
        Self {
            fir_length: FirLength::Len20,
            ngates_stats: 9,
            use_iterative_filtering: false,
            phidp_difference_threshold: 4.0,
            n_filt_iterations_unfolded: 2,
            n_filt_iterations_conditioned: 2,
            snr_threshold_db: -6.0,
            rhohv_threshold: 0.7,
            phidp_sdev_max: 20.0,
            phidp_jitter_max: 25.0,
            check_zdr_sdev: false,
            zdr_sdev_max: 2.0,
            min_valid_abs_kdp: 0.01,
            kdp_min_for_self_consistency: 0.25,
            attenuation: AttenuationCorrection::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AtmosphericAttenuation {
    #[default]
    None,
    /// Two-way attenuation at a constant rate.
    Constant { db_per_km: f64 },
}

/// Screening of the per-ray measured transmit power.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasuredXmitPowerConfig {
    /// Readings outside `[min_valid_dbm, max_valid_dbm]` are ignored.
    pub min_valid_dbm: f64,
    pub max_valid_dbm: f64,
    /// Added to every accepted reading.
    pub correction_db: f64,
    /// The H and V readings are recorded on each other's channel.
    pub swap_channels: bool,
}

impl Default for MeasuredXmitPowerConfig {
    fn default() -> Self {
        Self {
            min_valid_dbm: 0.0,
            max_valid_dbm: 100.0,
            correction_db: 0.0,
            swap_channels: false,
        }
    }
}

impl MeasuredXmitPowerConfig {
    /// Accepted and corrected H and V readings, after any swap.
    pub fn screen(&self, h_dbm: Option<f64>, v_dbm: Option<f64>) -> (Option<f64>, Option<f64>) {
        let accept = |reading: Option<f64>| {
            reading
                .filter(|dbm| *dbm >= self.min_valid_dbm && *dbm <= self.max_valid_dbm)
                .map(|dbm| dbm + self.correction_db)
        };
        let (h, v) = (accept(h_dbm), accept(v_dbm));
        if self.swap_channels {
            (v, h)
        } else {
            (h, v)
        }
    }
}

/// Options handed to the moment estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub correct_for_system_phidp: bool,
    pub change_velocity_sign: bool,
    pub min_snr_db_for_zdr: f64,
    pub min_snr_db_for_ldr: f64,
    /// Scale dBZ and ZDR by measured against calibrated transmit power.
    pub adjust_for_measured_xmit_power: bool,
    pub measured_xmit_power: MeasuredXmitPowerConfig,
    pub atmospheric_attenuation: AtmosphericAttenuation,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            correct_for_system_phidp: true,
            change_velocity_sign: false,
            min_snr_db_for_zdr: -7.0,
            min_snr_db_for_ldr: -7.0,
            adjust_for_measured_xmit_power: false,
            measured_xmit_power: MeasuredXmitPowerConfig::default(),
            atmospheric_attenuation: AtmosphericAttenuation::None,
        }
    }
}

/// Values that replace the corresponding calibration entries for every ray.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationOverrides {
    pub system_phidp_deg: Option<f64>,
    pub dbz_correction: Option<f64>,
    pub zdr_correction_db: Option<f64>,
    /// H and V LDR corrections, replaced together.
    pub ldr_correction_db: Option<(f64, f64)>,
}

impl CalibrationOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The calibration a ray is processed with.
    pub fn working<'a>(&self, calibration: &'a Calibration) -> Cow<'a, Calibration> {
        if self.is_empty() {
            return Cow::Borrowed(calibration);
        }
        let mut working = calibration.clone();
        self.apply(&mut working);
        Cow::Owned(working)
    }

    pub fn apply(&self, calibration: &mut Calibration) {
        if let Some(phidp) = self.system_phidp_deg {
            calibration.system_phidp_deg = phidp;
        }
        if let Some(correction) = self.dbz_correction {
            calibration.dbz_correction = correction;
        }
        if let Some(correction) = self.zdr_correction_db {
            calibration.zdr_correction_db = correction;
        }
        if let Some((h, v)) = self.ldr_correction_db {
            calibration.ldr_correction_db_h = h;
            calibration.ldr_correction_db_v = v;
        }
    }
}

/// Elevation band over which per-ray noise feeds volume statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolNoiseStatsConfig {
    pub enabled: bool,
    pub min_elev_deg: f64,
    pub max_elev_deg: f64,
}

impl Default for VolNoiseStatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_elev_deg: 0.0,
            max_elev_deg: 90.0,
        }
    }
}

impl VolNoiseStatsConfig {
    pub fn contains(&self, elevation_deg: f64) -> bool {
        elevation_deg >= self.min_elev_deg && elevation_deg <= self.max_elev_deg
    }
}

/// Mapping of a covariance field id to the name it carries on input rays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    pub id: CovarianceFieldId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFieldSpec {
    pub id: OutputFieldId,
    pub name: String,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub long_name: String,
    #[serde(default)]
    pub encoding: OutputEncoding,
}

/// Process-wide configuration of the moments engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentsConfig {
    pub mode: PolarizationMode,
    #[serde(default)]
    pub censoring: CensoringConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub kdp: KdpConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub vol_noise_stats: VolNoiseStatsConfig,
    #[serde(default)]
    pub calibration_overrides: CalibrationOverrides,
    #[serde(default)]
    pub use_estimated_noise_for_noise_subtraction: bool,
    #[serde(default = "default_input_fields")]
    pub input_fields: Vec<InputField>,
    pub output_fields: Vec<OutputFieldSpec>,
}

/// Input names default to the upper-case field ids.
pub fn default_input_fields() -> Vec<InputField> {
    CovarianceFieldId::ALL
        .iter()
        .map(|id| InputField {
            id: *id,
            name: id.as_str().to_string(),
        })
        .collect()
}

impl MomentsConfig {
    pub fn new(mode: PolarizationMode, output_fields: Vec<OutputFieldSpec>) -> Self {
        Self {
            mode,
            censoring: CensoringConfig::default(),
            noise: NoiseConfig::default(),
            kdp: KdpConfig::default(),
            estimator: EstimatorConfig::default(),
            vol_noise_stats: VolNoiseStatsConfig::default(),
            calibration_overrides: CalibrationOverrides::default(),
            use_estimated_noise_for_noise_subtraction: false,
            input_fields: default_input_fields(),
            output_fields,
        }
    }

    /// Name mapped to `id` on input rays, if any.
    pub fn input_name(&self, id: CovarianceFieldId) -> Option<&str> {
        self.input_fields
            .iter()
            .find(|field| field.id == id)
            .map(|field| field.name.as_str())
    }

    /// Whether the noise locator runs for a ray at this elevation.
    pub fn locates_noise(&self, elevation_deg: f64) -> bool {
        self.censoring.mode == CensoringMode::ByNoiseFlag
            || (self.vol_noise_stats.enabled && self.vol_noise_stats.contains(elevation_deg))
    }

    pub fn validate(&self) -> MomentsResult<()> {
        if self.output_fields.is_empty() {
            return Err(MomentsError::Configuration(
                "no output fields configured".into(),
            ));
        }
        if self.noise.ngates_kernel == 0 {
            return Err(MomentsError::Configuration(
                "noise kernel must span at least one gate".into(),
            ));
        }
        if self.noise.method == NoiseMethod::RunningMedian
            && self.noise.ngates_for_running_median == 0
        {
            return Err(MomentsError::Configuration(
                "running median needs a non-zero gate count".into(),
            ));
        }
        if self.kdp.ngates_stats == 0 {
            return Err(MomentsError::Configuration(
                "KDP stats window must span at least one gate".into(),
            ));
        }
        if self.vol_noise_stats.min_elev_deg > self.vol_noise_stats.max_elev_deg {
            return Err(MomentsError::Configuration(format!(
                "volume noise band is inverted: {} > {}",
                self.vol_noise_stats.min_elev_deg, self.vol_noise_stats.max_elev_deg
            )));
        }
        Ok(())
    }
}
