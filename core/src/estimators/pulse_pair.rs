use std::f64::consts::PI;

use num_complex::Complex64;

use super::{
    AltHvInputs, DpSingleTxInputs, MomentEstimator, SimHvInputs, SinglePolInputs,
};
use crate::config::{AtmosphericAttenuation, EstimatorConfig};
use crate::math::complex::conjugate_product;
use crate::math::ComplexFieldDecoder;
use crate::prelude::{Channel, ChannelValues};
use crate::processing::PerGateFields;
use crate::ray_interface::{Calibration, RayContext};

/// Noise-subtracted power below this fraction of the noise is not detectable.
const MIN_DETECTABLE_SNR: f64 = 0.01;

/// Reference phases the system phidp is rotated towards, so the phase
/// vectors do not wrap prematurely.
const PHIDP_PHASE_LIMIT_ALT_DEG: f64 = -70.0;
const PHIDP_PHASE_LIMIT_SIM_DEG: f64 = -160.0;

const MIN_WIDTH: f64 = 0.01;

/// Power of one channel at one gate.
#[derive(Debug, Clone, Copy)]
struct ChannelPower {
    lag0: f64,
    dbm: f64,
    /// Noise-subtracted power.
    ns: f64,
    /// Linear SNR, `None` when the signal is not detectable.
    snr: Option<f64>,
}

impl ChannelPower {
    fn snr_db(&self) -> Option<f64> {
        self.snr.map(ComplexFieldDecoder::power_to_db)
    }

    fn snr_above(&self, min_db: f64) -> bool {
        self.snr_db().map_or(false, |snr| snr > min_db)
    }
}

/// Pulse-pair moment estimator covering every polarization mode.
pub struct PulsePairEstimator {
    config: EstimatorConfig,
    vel_sign: f64,
    nyquist: f64,
    start_range_km: f64,
    gate_spacing_km: f64,
    cal_noise: ChannelValues<f64>,
    est_noise: ChannelValues<f64>,
    base_dbz_1km: ChannelValues<f64>,
    receiver_gain_db: ChannelValues<f64>,
    dbz_correction: f64,
    zdr_correction_db: f64,
    ldr_correction_db_h: f64,
    ldr_correction_db_v: f64,
    xmit_diff_db_h: Option<f64>,
    xmit_diff_db_v: Option<f64>,
    phidp_offset_alt: Complex64,
    phidp_offset_sim: Complex64,
}

impl PulsePairEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let vel_sign = if config.change_velocity_sign { -1.0 } else { 1.0 };
        Self {
            config,
            vel_sign,
            nyquist: 0.0,
            start_range_km: 0.0,
            gate_spacing_km: 0.0,
            cal_noise: ChannelValues::splat(1.0),
            est_noise: ChannelValues::splat(1.0),
            base_dbz_1km: ChannelValues::splat(0.0),
            receiver_gain_db: ChannelValues::splat(0.0),
            dbz_correction: 0.0,
            zdr_correction_db: 0.0,
            ldr_correction_db_h: 0.0,
            ldr_correction_db_v: 0.0,
            xmit_diff_db_h: None,
            xmit_diff_db_v: None,
            phidp_offset_alt: Complex64::new(1.0, 0.0),
            phidp_offset_sim: Complex64::new(1.0, 0.0),
        }
    }

    fn power(&self, channel: Channel, lag0: f64) -> ChannelPower {
        let noise = self.est_noise.get(channel);
        let ns = lag0 - noise;
        let snr = if ns < noise * MIN_DETECTABLE_SNR {
            None
        } else {
            Some(ns / self.cal_noise.get(channel))
        };
        ChannelPower {
            lag0,
            dbm: ComplexFieldDecoder::power_to_db(lag0) - self.receiver_gain_db.get(channel),
            ns,
            snr,
        }
    }

    fn range_correction(&self, gate: usize) -> f64 {
        let range_km = self.start_range_km + gate as f64 * self.gate_spacing_km;
        if range_km < 0.001 {
            0.0
        } else {
            20.0 * range_km.log10()
        }
    }

    fn atmos_correction(&self, gate: usize) -> f64 {
        match self.config.atmospheric_attenuation {
            AtmosphericAttenuation::None => 0.0,
            AtmosphericAttenuation::Constant { db_per_km } => {
                db_per_km * (self.start_range_km + gate as f64 * self.gate_spacing_km)
            }
        }
    }

    /// Transmit power excess on the channel that illuminated `channel`.
    fn xmit_diff(&self, channel: Channel) -> Option<f64> {
        if !self.config.adjust_for_measured_xmit_power {
            return None;
        }
        match channel {
            Channel::Hc | Channel::Vx => self.xmit_diff_db_h,
            Channel::Vc | Channel::Hx => self.xmit_diff_db_v,
        }
    }

    /// Reflectivity with and without atmospheric attenuation correction.
    fn dbz(&self, gate: usize, channel: Channel, power: &ChannelPower) -> Option<(f64, f64)> {
        let snr = power.snr?;
        let adjust = self.xmit_diff(channel).unwrap_or(0.0);
        let no_atmos = ComplexFieldDecoder::power_to_db(snr)
            + self.base_dbz_1km.get(channel)
            + self.range_correction(gate)
            + self.dbz_correction
            - adjust;
        Some((no_atmos + self.atmos_correction(gate), no_atmos))
    }

    fn adjust_zdr(&self, zdr: f64) -> f64 {
        match (self.xmit_diff(Channel::Hc), self.xmit_diff(Channel::Vc)) {
            (Some(diff_h), Some(diff_v)) => zdr - (diff_h - diff_v),
            _ => zdr,
        }
    }

    /// Velocity from a phase, scaled to `nyquist`.
    fn velocity(&self, arg_rad: f64, nyquist: f64) -> f64 {
        (arg_rad / PI) * nyquist * self.vel_sign * -1.0
    }

    fn set_channel_power(fields: &mut PerGateFields, channel: Channel, power: &ChannelPower) {
        let (dbm, snr) = match channel {
            Channel::Hc => (&mut fields.dbmhc, &mut fields.snrhc),
            Channel::Hx => (&mut fields.dbmhx, &mut fields.snrhx),
            Channel::Vc => (&mut fields.dbmvc, &mut fields.snrvc),
            Channel::Vx => (&mut fields.dbmvx, &mut fields.snrvx),
        };
        *dbm = Some(power.dbm);
        *snr = power.snr_db();
    }

    fn set_channel_dbz(&self, fields: &mut PerGateFields, gate: usize, channel: Channel, power: &ChannelPower) {
        let dbz = self.dbz(gate, channel, power).map(|(dbz, _)| dbz);
        match channel {
            Channel::Hc => fields.dbzhc = dbz,
            Channel::Hx => fields.dbzhx = dbz,
            Channel::Vc => fields.dbzvc = dbz,
            Channel::Vx => fields.dbzvx = dbz,
        }
    }

    /// dbz and dbz_no_atmos_atten from the transmit co-polar channel.
    fn set_primary_dbz(&self, fields: &mut PerGateFields, gate: usize, channel: Channel, power: &ChannelPower) {
        self.set_channel_dbz(fields, gate, channel, power);
        match self.dbz(gate, channel, power) {
            Some((dbz, no_atmos)) => {
                fields.dbz = Some(dbz);
                fields.dbz_no_atmos_atten = Some(no_atmos);
            }
            None => {
                fields.dbz = None;
                fields.dbz_no_atmos_atten = None;
            }
        }
    }

    /// Shared by every dual-receive co-polar H/V mode.
    fn dual_co_powers(&self, gate: usize, h: &ChannelPower, v: &ChannelPower, fields: &mut PerGateFields) {
        Self::set_channel_power(fields, Channel::Hc, h);
        Self::set_channel_power(fields, Channel::Vc, v);
        fields.dbm = Some((h.dbm + v.dbm) / 2.0);
        fields.snr = match (h.snr, v.snr) {
            (Some(snr_h), Some(snr_v)) => Some(ComplexFieldDecoder::power_to_db((snr_h + snr_v) / 2.0)),
            _ => None,
        };
        self.set_primary_dbz(fields, gate, Channel::Hc, h);
        self.set_channel_dbz(fields, gate, Channel::Vc, v);

        let min_snr = self.config.min_snr_db_for_zdr;
        if h.snr_above(min_snr) && v.snr_above(min_snr) {
            let zdrm = self.adjust_zdr(ComplexFieldDecoder::power_to_db(h.ns / v.ns));
            fields.zdrm = Some(zdrm);
            fields.zdr = Some(zdrm + self.zdr_correction_db);
        } else {
            fields.zdrm = None;
            fields.zdr = None;
        }
    }

    /// Measured and corrected LDR, cross over co power.
    fn ldr(&self, co: &ChannelPower, cross: &ChannelPower, correction: f64) -> (Option<f64>, Option<f64>) {
        let min_snr = self.config.min_snr_db_for_ldr;
        if co.snr_above(min_snr) && cross.snr_above(min_snr) {
            let ldrm = ComplexFieldDecoder::power_to_db(cross.ns / co.ns);
            (Some(ldrm), Some(ldrm + correction))
        } else {
            (None, None)
        }
    }

    /// Phidp and velocity from the alternating lag-1 cross products.
    fn alt_phase_moments(&self, inputs: &AltHvInputs, fields: &mut PerGateFields) {
        let phidp0 = conjugate_product(inputs.lag1_vchc, inputs.lag1_hcvc).arg() / 2.0;
        fields.phidp0 = Some(phidp0.to_degrees() * self.vel_sign);

        let phi_h = inputs.lag1_vchc * self.phidp_offset_alt;
        let phi_v = conjugate_product(inputs.lag1_hcvc, self.phidp_offset_alt);
        let phi = -0.5 * conjugate_product(phi_v, phi_h).arg();
        fields.phidp = Some(phi.to_degrees() * self.vel_sign);

        let psi_h = wrap_pi(phi_h.arg() - phi);
        let psi_v = wrap_pi(phi_v.arg() + phi);
        let vel = self.velocity(mean_angle(psi_h, psi_v), self.nyquist);
        fields.vel = Some(vel);
        fields.vel_alt = Some(vel);

        let half_nyquist = self.nyquist / 2.0;
        fields.vel_h_only = Some(self.velocity(inputs.lag2_hc.arg(), half_nyquist));
        fields.vel_v_only = Some(self.velocity(inputs.lag2_vc.arg(), half_nyquist));
        let lag2_sum = inputs.lag2_hc + inputs.lag2_vc;
        fields.vel_hv = Some(self.velocity(lag2_sum.arg(), half_nyquist));
        fields.phase_for_noise = Some(lag2_sum);
    }

    /// Width, rhohv and ncp from the alternating lag-2 terms.
    fn alt_correlation_moments(
        &self,
        inputs: &AltHvInputs,
        h: &ChannelPower,
        v: &ChannelPower,
        fields: &mut PerGateFields,
    ) {
        let mag_lag2_hc = inputs.lag2_hc.norm();
        let mag_lag2_vc = inputs.lag2_vc.norm();
        let mean_mag_r2 = (inputs.lag2_hc + inputs.lag2_vc).norm() / 2.0;
        let lag1_mags = inputs.lag1_vchc.norm() + inputs.lag1_hcvc.norm();

        if h.snr.is_some() && v.snr.is_some() {
            let mut mean_lag0_ns = (h.ns + v.ns) / 2.0;
            if mean_lag0_ns <= 0.0 {
                mean_lag0_ns = 1.0e-20;
            }
            let rho2 = mean_mag_r2 / mean_lag0_ns;
            let width = if rho2 < 1.0 {
                ((-0.5 * rho2.ln()).sqrt() / PI) * self.nyquist
            } else {
                0.0
            };
            fields.width = Some(clamp_width(width, self.nyquist));

            let half_nyquist = self.nyquist / 2.0;
            fields.width_h_only = Some(clamp_width(width_r0r1(h.ns, mag_lag2_hc, half_nyquist), self.nyquist));
            fields.width_v_only = Some(clamp_width(width_r0r1(v.ns, mag_lag2_vc, half_nyquist), self.nyquist));

            let rhohv1 = lag1_mags / (2.0 * (h.ns * v.ns).sqrt());
            fields.rhohv = Some(clamp_unit(rhohv1 / rho2.powf(0.25)));
        }

        let rho2_raw = mean_mag_r2 / ((h.lag0 + v.lag0) / 2.0);
        fields.ncp = Some(clamp_unit(rho2_raw));
        let ncp_h = clamp_unit(mag_lag2_hc / h.lag0);
        let ncp_v = clamp_unit(mag_lag2_vc / v.lag0);
        fields.ncp_h_only = Some(ncp_h);
        fields.ncp_v_only = Some(ncp_v);
        fields.ncp_h_minus_v = Some(ncp_h - ncp_v);

        let rhohv1_raw = lag1_mags / (2.0 * (h.lag0 * v.lag0).sqrt());
        fields.rhohv_nnc = Some(clamp_unit(rhohv1_raw / rho2_raw.powf(0.25)));
    }

    /// H-only and V-only transmit share everything but the channel names.
    fn single_tx(
        &self,
        gate: usize,
        inputs: &DpSingleTxInputs,
        co_channel: Channel,
        cross_channel: Channel,
        fields: &mut PerGateFields,
    ) {
        let co = self.power(co_channel, inputs.lag0_co);
        let cross = self.power(cross_channel, inputs.lag0_cross);
        Self::set_channel_power(fields, co_channel, &co);
        Self::set_channel_power(fields, cross_channel, &cross);
        fields.dbm = Some(co.dbm);
        fields.snr = co.snr_db();
        self.set_primary_dbz(fields, gate, co_channel, &co);
        self.set_channel_dbz(fields, gate, cross_channel, &cross);

        // measured zdr as H power over V power, whichever is co-polar
        fields.zdrm = match (co.snr, cross.snr) {
            (Some(_), Some(_)) => Some(match co_channel {
                Channel::Hc => ComplexFieldDecoder::power_to_db(co.ns / cross.ns),
                _ => ComplexFieldDecoder::power_to_db(cross.ns / co.ns),
            }),
            _ => None,
        };
        fields.zdr = None;

        match co_channel {
            Channel::Hc => {
                let (ldrhm, ldrh) = self.ldr(&co, &cross, self.ldr_correction_db_h);
                fields.ldrhm = ldrhm;
                fields.ldrh = ldrh;
            }
            _ => {
                let (ldrvm, ldrv) = self.ldr(&co, &cross, self.ldr_correction_db_v);
                fields.ldrvm = ldrvm;
                fields.ldrv = ldrv;
            }
        }
        fields.ldr_diff = None;
        fields.ldr_mean = None;

        self.lag1_moments(inputs.lag1, inputs.lag0_co, fields);
        if co.snr.is_some() {
            fields.width = Some(clamp_width(width_r0r1(co.ns, inputs.lag1.norm(), self.nyquist), self.nyquist));
        }
    }

    /// Velocity, ncp and noise phase from a single lag-1 estimate.
    fn lag1_moments(&self, lag1: Complex64, lag0: f64, fields: &mut PerGateFields) {
        fields.vel = Some(self.velocity(lag1.arg(), self.nyquist));
        fields.phase_for_noise = Some(lag1);
        fields.ncp = Some(clamp_unit(lag1.norm() / lag0));
    }

    fn single_pol(&self, gate: usize, channel: Channel, inputs: &SinglePolInputs, fields: &mut PerGateFields) {
        let power = self.power(channel, inputs.lag0);
        Self::set_channel_power(fields, channel, &power);
        fields.dbm = Some(power.dbm);
        fields.snr = power.snr_db();
        self.set_primary_dbz(fields, gate, channel, &power);
        self.lag1_moments(inputs.lag1, inputs.lag0, fields);

        let r1 = inputs.lag1.norm();
        fields.width = Some(clamp_width(width_r1r2(r1, inputs.lag2.norm(), self.nyquist), self.nyquist));
        if power.snr.is_some() {
            fields.width = Some(clamp_width(width_r0r1(power.ns, r1, self.nyquist), self.nyquist));
        }
    }

    fn single_channel_noise_prep(
        fields: &mut PerGateFields,
        co: (Channel, f64),
        cross: Option<(Channel, f64)>,
        lag1: Complex64,
    ) {
        let co_db = ComplexFieldDecoder::power_to_db(co.1);
        set_lag0_db(fields, co.0, co_db);
        if let Some((channel, lag0)) = cross {
            set_lag0_db(fields, channel, ComplexFieldDecoder::power_to_db(lag0));
        }
        fields.dbm_for_noise = Some(co_db);
        fields.phase_for_noise = Some(lag1);
        fields.ncp = Some(clamp_unit(lag1.norm() / co.1));
    }
}

impl MomentEstimator for PulsePairEstimator {
    fn init_ray(&mut self, context: &RayContext, calibration: &Calibration) {
        self.nyquist = context.nyquist_mps;
        self.start_range_km = context.start_range_km;
        self.gate_spacing_km = context.gate_spacing_km;

        for channel in Channel::ALL {
            let noise = calibration.noise_power(channel);
            self.cal_noise.set(channel, noise);
            self.est_noise.set(channel, noise);
            self.base_dbz_1km.set(channel, calibration.base_dbz_1km(channel));
        }
        self.receiver_gain_db = calibration.receiver_gain_db;
        self.dbz_correction = calibration.dbz_correction;
        self.zdr_correction_db = calibration.zdr_correction_db;
        self.ldr_correction_db_h = calibration.ldr_correction_db_h;
        self.ldr_correction_db_v = calibration.ldr_correction_db_v;
        let (measured_h, measured_v) = self
            .config
            .measured_xmit_power
            .screen(context.meas_xmit_power_dbm_h, context.meas_xmit_power_dbm_v);
        self.xmit_diff_db_h = measured_h
            .zip(calibration.xmit_power_dbm_h)
            .map(|(measured, calibrated)| measured - calibrated);
        self.xmit_diff_db_v = measured_v
            .zip(calibration.xmit_power_dbm_v)
            .map(|(measured, calibrated)| measured - calibrated);

        if self.config.correct_for_system_phidp {
            let offset_alt = (calibration.system_phidp_deg - PHIDP_PHASE_LIMIT_ALT_DEG).to_radians();
            self.phidp_offset_alt = Complex64::from_polar(1.0, offset_alt * -1.0 * self.vel_sign);
            let offset_sim = (calibration.system_phidp_deg - PHIDP_PHASE_LIMIT_SIM_DEG).to_radians();
            self.phidp_offset_sim = Complex64::from_polar(1.0, offset_sim * self.vel_sign);
        } else {
            self.phidp_offset_alt = Complex64::new(self.vel_sign, 0.0);
            self.phidp_offset_sim = Complex64::new(self.vel_sign, 0.0);
        }
    }

    fn set_estimated_noise_dbm(&mut self, channel: Channel, noise_dbm: f64) {
        self.est_noise
            .set(channel, ComplexFieldDecoder::power(noise_dbm));
    }

    fn single_pol_h(&self, gate: usize, inputs: &SinglePolInputs, fields: &mut PerGateFields) {
        self.single_pol(gate, Channel::Hc, inputs, fields);
    }

    fn single_pol_v(&self, gate: usize, inputs: &SinglePolInputs, fields: &mut PerGateFields) {
        self.single_pol(gate, Channel::Vc, inputs, fields);
    }

    fn alt_hv_co_only(&self, gate: usize, inputs: &AltHvInputs, fields: &mut PerGateFields) {
        let h = self.power(Channel::Hc, inputs.lag0_hc);
        let v = self.power(Channel::Vc, inputs.lag0_vc);
        self.dual_co_powers(gate, &h, &v, fields);
        self.alt_phase_moments(inputs, fields);
        self.alt_correlation_moments(inputs, &h, &v, fields);
    }

    fn alt_hv_co_cross(&self, gate: usize, inputs: &AltHvInputs, fields: &mut PerGateFields) {
        let hc = self.power(Channel::Hc, inputs.lag0_hc);
        let vc = self.power(Channel::Vc, inputs.lag0_vc);
        let hx = self.power(Channel::Hx, inputs.lag0_hx);
        let vx = self.power(Channel::Vx, inputs.lag0_vx);
        self.dual_co_powers(gate, &hc, &vc, fields);
        Self::set_channel_power(fields, Channel::Hx, &hx);
        Self::set_channel_power(fields, Channel::Vx, &vx);
        self.set_channel_dbz(fields, gate, Channel::Hx, &hx);
        self.set_channel_dbz(fields, gate, Channel::Vx, &vx);

        let (ldrhm, ldrh) = self.ldr(&hc, &vx, self.ldr_correction_db_h);
        let (ldrvm, ldrv) = self.ldr(&vc, &hx, self.ldr_correction_db_v);
        fields.ldrhm = ldrhm;
        fields.ldrh = ldrh;
        fields.ldrvm = ldrvm;
        fields.ldrv = ldrv;
        fields.ldr_diff = None;
        fields.ldr_mean = None;
        fields.zdr_bias = None;
        match (ldrh, ldrv) {
            (Some(ldrh), Some(ldrv)) => {
                let diff = ldrv - ldrh;
                fields.ldr_diff = Some(diff);
                if let Some(zdr) = fields.zdr {
                    fields.ldr_mean = Some((ldrh + ldrv - zdr) / 2.0);
                    fields.zdr_bias = Some(zdr - diff);
                }
            }
            (Some(ldr), None) | (None, Some(ldr)) => fields.ldr_mean = Some(ldr),
            (None, None) => {}
        }

        self.alt_phase_moments(inputs, fields);
        self.alt_correlation_moments(inputs, &hc, &vc, fields);

        fields.rho_vchx = Some(clamp_unit(inputs.lag0_vchx.norm() / (vc.lag0 * hx.lag0).sqrt()));
        fields.rho_hcvx = Some(clamp_unit(inputs.lag0_hcvx.norm() / (hc.lag0 * vx.lag0).sqrt()));
        fields.rho_vxhx = Some(clamp_unit(inputs.lag1_vxhx.norm() / (vx.lag0 * hx.lag0).sqrt()));
    }

    fn sim_hv(&self, gate: usize, inputs: &SimHvInputs, fields: &mut PerGateFields) {
        let h = self.power(Channel::Hc, inputs.lag0_hc);
        let v = self.power(Channel::Vc, inputs.lag0_vc);
        self.dual_co_powers(gate, &h, &v, fields);

        let phidp = conjugate_product(inputs.rvvhh0, self.phidp_offset_sim).arg();
        fields.phidp = Some(phidp.to_degrees() * self.vel_sign);
        fields.phidp0 = Some(inputs.rvvhh0.arg().to_degrees() * self.vel_sign);

        let rvvhh0_mag = inputs.rvvhh0.norm();
        if h.snr.is_some() && v.snr.is_some() {
            fields.rhohv = Some(clamp_unit(rvvhh0_mag / (h.ns * v.ns).sqrt()));
        }
        fields.rhohv_nnc = Some(clamp_unit(rvvhh0_mag / (h.lag0 * v.lag0).sqrt()));

        let lag1_sum = inputs.lag1_hc + inputs.lag1_vc;
        fields.vel = Some(self.velocity(lag1_sum.arg(), self.nyquist));
        fields.vel_h_only = Some(self.velocity(inputs.lag1_hc.arg(), self.nyquist));
        fields.vel_v_only = Some(self.velocity(inputs.lag1_vc.arg(), self.nyquist));
        fields.phase_for_noise = Some(lag1_sum);
        fields.ncp = Some(clamp_unit(lag1_sum.norm() / (h.lag0 + v.lag0)));

        let r1_hc = inputs.lag1_hc.norm();
        let r1_vc = inputs.lag1_vc.norm();
        let r1r2 = (width_r1r2(r1_hc, inputs.lag2_hc.norm(), self.nyquist)
            + width_r1r2(r1_vc, inputs.lag2_vc.norm(), self.nyquist))
            / 2.0;
        fields.width = Some(clamp_width(r1r2, self.nyquist));
        if h.snr.is_some() && v.snr.is_some() {
            let r0r1 = (width_r0r1(h.ns, r1_hc, self.nyquist) + width_r0r1(v.ns, r1_vc, self.nyquist)) / 2.0;
            fields.width = Some(clamp_width(r0r1, self.nyquist));
        }
    }

    fn h_only(&self, gate: usize, inputs: &DpSingleTxInputs, fields: &mut PerGateFields) {
        self.single_tx(gate, inputs, Channel::Hc, Channel::Vx, fields);
    }

    fn v_only(&self, gate: usize, inputs: &DpSingleTxInputs, fields: &mut PerGateFields) {
        self.single_tx(gate, inputs, Channel::Vc, Channel::Hx, fields);
    }

    fn single_pol_h_noise_prep(&self, inputs: &SinglePolInputs, fields: &mut PerGateFields) {
        Self::single_channel_noise_prep(fields, (Channel::Hc, inputs.lag0), None, inputs.lag1);
    }

    fn single_pol_v_noise_prep(&self, inputs: &SinglePolInputs, fields: &mut PerGateFields) {
        Self::single_channel_noise_prep(fields, (Channel::Vc, inputs.lag0), None, inputs.lag1);
    }

    fn alt_hv_noise_prep(&self, inputs: &AltHvInputs, fields: &mut PerGateFields) {
        let hc_db = ComplexFieldDecoder::power_to_db(inputs.lag0_hc);
        let vc_db = ComplexFieldDecoder::power_to_db(inputs.lag0_vc);
        fields.lag0_hc_db = Some(hc_db);
        fields.lag0_vc_db = Some(vc_db);
        if inputs.lag0_hx > 0.0 && inputs.lag0_vx > 0.0 {
            fields.lag0_hx_db = Some(ComplexFieldDecoder::power_to_db(inputs.lag0_hx));
            fields.lag0_vx_db = Some(ComplexFieldDecoder::power_to_db(inputs.lag0_vx));
        }
        fields.dbm_for_noise = Some((hc_db + vc_db) / 2.0);
        fields.phase_for_noise = Some((inputs.lag2_hc + inputs.lag2_vc) / 2.0);
        let ncp = ((inputs.lag2_hc.norm() + inputs.lag2_vc.norm()) / 2.0)
            / (inputs.lag0_hc * inputs.lag0_vc).sqrt();
        fields.ncp = Some(clamp_unit(ncp));
    }

    fn sim_hv_noise_prep(&self, inputs: &SimHvInputs, fields: &mut PerGateFields) {
        let hc_db = ComplexFieldDecoder::power_to_db(inputs.lag0_hc);
        let vc_db = ComplexFieldDecoder::power_to_db(inputs.lag0_vc);
        fields.lag0_hc_db = Some(hc_db);
        fields.lag0_vc_db = Some(vc_db);
        fields.dbm_for_noise = Some((hc_db + vc_db) / 2.0);
        let lag1_sum = inputs.lag1_hc + inputs.lag1_vc;
        fields.vel = Some(self.velocity(lag1_sum.arg(), self.nyquist));
        fields.phase_for_noise = Some(lag1_sum);
        fields.ncp = Some(clamp_unit(lag1_sum.norm() / (inputs.lag0_hc + inputs.lag0_vc)));
    }

    fn h_only_noise_prep(&self, inputs: &DpSingleTxInputs, fields: &mut PerGateFields) {
        Self::single_channel_noise_prep(
            fields,
            (Channel::Hc, inputs.lag0_co),
            Some((Channel::Vx, inputs.lag0_cross)),
            inputs.lag1,
        );
    }

    fn v_only_noise_prep(&self, inputs: &DpSingleTxInputs, fields: &mut PerGateFields) {
        Self::single_channel_noise_prep(
            fields,
            (Channel::Vc, inputs.lag0_co),
            Some((Channel::Hx, inputs.lag0_cross)),
            inputs.lag1,
        );
    }
}

fn set_lag0_db(fields: &mut PerGateFields, channel: Channel, db: f64) {
    match channel {
        Channel::Hc => fields.lag0_hc_db = Some(db),
        Channel::Hx => fields.lag0_hx_db = Some(db),
        Channel::Vc => fields.lag0_vc_db = Some(db),
        Channel::Vx => fields.lag0_vx_db = Some(db),
    }
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn clamp_width(width: f64, nyquist: f64) -> f64 {
    width.clamp(MIN_WIDTH, nyquist.max(MIN_WIDTH))
}

fn wrap_pi(angle: f64) -> f64 {
    if angle < -PI {
        angle + 2.0 * PI
    } else if angle > PI {
        angle - 2.0 * PI
    } else {
        angle
    }
}

/// Mean of two angles taken on the unit circle.
fn mean_angle(a: f64, b: f64) -> f64 {
    (Complex64::from_polar(1.0, a) + Complex64::from_polar(1.0, b)).arg()
}

/// Spectrum width from the lag-0 to lag-1 ratio.
fn width_r0r1(r0: f64, r1: f64, nyquist: f64) -> f64 {
    let mut normalized = 0.0;
    if r0 > r1 {
        normalized = ((r0 / r1).ln() * 2.0).sqrt() / PI;
    }
    normalized.clamp(0.0, 1.0) * nyquist
}

/// Spectrum width from the lag-1 to lag-2 ratio.
fn width_r1r2(r1: f64, r2: f64, nyquist: f64) -> f64 {
    let mut normalized = 0.0;
    if r1 > r2 {
        normalized = ((r1 / r2).ln() * 0.6667).sqrt() / PI;
    }
    normalized.clamp(0.0, 1.0) * nyquist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{calibration, context};

    fn estimator(config: EstimatorConfig) -> PulsePairEstimator {
        let mut estimator = PulsePairEstimator::new(config);
        estimator.init_ray(&context(10), &calibration(1.0));
        estimator
    }

    fn strong_single(phase_rad: f64) -> SinglePolInputs {
        // about 40 dB above a -77 dBm noise floor
        let lag0 = ComplexFieldDecoder::power(-37.0);
        SinglePolInputs {
            lag0,
            lag1: Complex64::from_polar(lag0 * 0.95, phase_rad),
            lag2: Complex64::from_polar(lag0 * 0.85, 2.0 * phase_rad),
            lag3: Complex64::from_polar(lag0 * 0.7, 3.0 * phase_rad),
        }
    }

    #[test]
    fn single_pol_velocity_follows_lag1_phase() {
        let est = estimator(EstimatorConfig::default());
        let mut fields = PerGateFields::default();
        est.single_pol_h(3, &strong_single(PI / 4.0), &mut fields);
        let nyquist = context(10).nyquist_mps;
        assert!((fields.vel.unwrap() + nyquist / 4.0).abs() < 1e-9);
        assert!((fields.ncp.unwrap() - 0.95).abs() < 1e-9);
        assert!(fields.width.unwrap() > MIN_WIDTH);
        assert!(fields.dbz.is_some());
        assert_eq!(fields.dbz, fields.dbzhc);
    }

    #[test]
    fn alternating_width_stays_finite_when_lag2_exceeds_signal_power() {
        let est = estimator(EstimatorConfig::default());
        let lag0 = ComplexFieldDecoder::power(-40.0);
        let full = Complex64::new(lag0, 0.0);
        let inputs = AltHvInputs {
            lag0_hc: lag0,
            lag0_hx: 0.0,
            lag0_vc: lag0,
            lag0_vx: 0.0,
            lag0_vchx: Complex64::new(0.0, 0.0),
            lag0_hcvx: Complex64::new(0.0, 0.0),
            lag1_vxhx: Complex64::new(0.0, 0.0),
            lag1_vchc: full,
            lag1_hcvc: full,
            lag2_hc: full,
            lag2_vc: full,
        };
        let mut fields = PerGateFields::default();
        est.alt_hv_co_only(2, &inputs, &mut fields);
        assert_eq!(fields.width, Some(MIN_WIDTH));
        assert!(fields.rhohv.unwrap().is_finite());
    }

    fn xmit_adjusted_dbz(config: EstimatorConfig, measured_h: f64, measured_v: f64) -> f64 {
        let mut est = PulsePairEstimator::new(EstimatorConfig {
            adjust_for_measured_xmit_power: true,
            ..config
        });
        let mut ray_context = context(10);
        ray_context.meas_xmit_power_dbm_h = Some(measured_h);
        ray_context.meas_xmit_power_dbm_v = Some(measured_v);
        let mut cal = calibration(1.0);
        cal.xmit_power_dbm_h = Some(80.0);
        cal.xmit_power_dbm_v = Some(80.0);
        est.init_ray(&ray_context, &cal);
        let mut fields = PerGateFields::default();
        est.single_pol_h(3, &strong_single(0.0), &mut fields);
        fields.dbz.unwrap()
    }

    #[test]
    fn measured_xmit_power_is_screened_corrected_and_swapped() {
        let baseline = xmit_adjusted_dbz(EstimatorConfig::default(), 80.0, 80.0);
        // one dB more measured power lowers dBZ by one dB
        let hot = xmit_adjusted_dbz(EstimatorConfig::default(), 81.0, 80.0);
        assert!((baseline - hot - 1.0).abs() < 1e-9);

        let out_of_window = xmit_adjusted_dbz(EstimatorConfig::default(), 150.0, 80.0);
        assert!((out_of_window - baseline).abs() < 1e-12);

        let mut corrected = EstimatorConfig::default();
        corrected.measured_xmit_power.correction_db = 2.0;
        let with_correction = xmit_adjusted_dbz(corrected, 80.0, 80.0);
        assert!((baseline - with_correction - 2.0).abs() < 1e-9);

        let mut swapped = EstimatorConfig::default();
        swapped.measured_xmit_power.swap_channels = true;
        let from_v = xmit_adjusted_dbz(swapped, 80.0, 83.0);
        assert!((baseline - from_v - 3.0).abs() < 1e-9);
    }

    #[test]
    fn velocity_sign_can_be_flipped() {
        let est = estimator(EstimatorConfig {
            change_velocity_sign: true,
            ..Default::default()
        });
        let mut fields = PerGateFields::default();
        est.single_pol_h(3, &strong_single(PI / 4.0), &mut fields);
        assert!(fields.vel.unwrap() > 0.0);
    }

    #[test]
    fn undetectable_signal_leaves_snr_and_dbz_missing() {
        let est = estimator(EstimatorConfig::default());
        let lag0 = ComplexFieldDecoder::power(-77.0);
        let inputs = SinglePolInputs {
            lag0,
            lag1: Complex64::new(lag0 * 0.01, 0.0),
            lag2: Complex64::new(lag0 * 0.005, 0.0),
            lag3: Complex64::new(lag0 * 0.001, 0.0),
        };
        let mut fields = PerGateFields::default();
        est.single_pol_h(0, &inputs, &mut fields);
        assert!(fields.snr.is_none());
        assert!(fields.dbz.is_none());
        assert!(fields.dbm.is_some());
        assert!(fields.vel.is_some());
    }

    #[test]
    fn estimated_noise_changes_subtraction_only() {
        let mut est = estimator(EstimatorConfig::default());
        let inputs = strong_single(0.1);
        let mut before = PerGateFields::default();
        est.single_pol_h(5, &inputs, &mut before);
        est.set_estimated_noise_dbm(Channel::Hc, -40.0);
        let mut after = PerGateFields::default();
        est.single_pol_h(5, &inputs, &mut after);
        assert!(after.snr.unwrap() < before.snr.unwrap());
        assert_eq!(after.dbm, before.dbm);
    }

    #[test]
    fn reflectivity_grows_with_range_for_constant_snr() {
        let est = estimator(EstimatorConfig::default());
        let inputs = strong_single(0.0);
        let mut near = PerGateFields::default();
        let mut far = PerGateFields::default();
        est.single_pol_h(1, &inputs, &mut near);
        est.single_pol_h(9, &inputs, &mut far);
        let ctx = context(10);
        let expected = 20.0 * (ctx.range_km(9) / ctx.range_km(1)).log10();
        assert!((far.dbz.unwrap() - near.dbz.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn alt_mode_recovers_zero_phidp_and_equal_channels() {
        let est = estimator(EstimatorConfig {
            correct_for_system_phidp: false,
            ..Default::default()
        });
        let lag0 = ComplexFieldDecoder::power(-40.0);
        let inputs = AltHvInputs {
            lag0_hc: lag0,
            lag0_hx: 0.0,
            lag0_vc: lag0,
            lag0_vx: 0.0,
            lag0_vchx: Complex64::default(),
            lag0_hcvx: Complex64::default(),
            lag1_vxhx: Complex64::default(),
            lag1_vchc: Complex64::from_polar(lag0 * 0.9, 0.2),
            lag1_hcvc: Complex64::from_polar(lag0 * 0.9, 0.2),
            lag2_hc: Complex64::from_polar(lag0 * 0.8, 0.4),
            lag2_vc: Complex64::from_polar(lag0 * 0.8, 0.4),
        };
        let mut fields = PerGateFields::default();
        est.alt_hv_co_only(4, &inputs, &mut fields);
        assert!(fields.phidp.unwrap().abs() < 1e-9);
        assert!(fields.zdrm.unwrap().abs() < 1e-9);
        assert_eq!(fields.vel, fields.vel_alt);
        let rhohv = fields.rhohv.unwrap();
        assert!(rhohv > 0.9 && rhohv <= 1.0);
        assert!((fields.ncp_h_minus_v.unwrap()).abs() < 1e-12);
        assert!(fields.phase_for_noise.is_some());
    }

    #[test]
    fn sim_hv_phidp_is_rvvhh0_phase_without_correction() {
        let est = estimator(EstimatorConfig {
            correct_for_system_phidp: false,
            ..Default::default()
        });
        let lag0 = ComplexFieldDecoder::power(-45.0);
        let inputs = SimHvInputs {
            lag0_hc: lag0,
            lag0_vc: lag0,
            rvvhh0: Complex64::from_polar(lag0 * 0.98, 30f64.to_radians()),
            lag1_hc: Complex64::from_polar(lag0 * 0.9, 0.3),
            lag1_vc: Complex64::from_polar(lag0 * 0.9, 0.3),
            lag2_hc: Complex64::from_polar(lag0 * 0.7, 0.6),
            lag2_vc: Complex64::from_polar(lag0 * 0.7, 0.6),
            lag3_hc: Complex64::from_polar(lag0 * 0.5, 0.9),
            lag3_vc: Complex64::from_polar(lag0 * 0.5, 0.9),
        };
        let mut fields = PerGateFields::default();
        est.sim_hv(2, &inputs, &mut fields);
        assert!((fields.phidp.unwrap() - 30.0).abs() < 1e-9);
        assert!((fields.phidp0.unwrap() - 30.0).abs() < 1e-9);
        assert!(fields.rhohv.unwrap() > 0.97);
        assert_eq!(fields.vel_h_only, fields.vel_v_only);
    }

    #[test]
    fn h_only_reports_zdrm_and_ldrh_but_no_zdr() {
        let est = estimator(EstimatorConfig::default());
        let co = ComplexFieldDecoder::power(-40.0);
        let cross = ComplexFieldDecoder::power(-60.0);
        let inputs = DpSingleTxInputs {
            lag0_co: co,
            lag0_cross: cross,
            lag1: Complex64::from_polar(co * 0.9, 0.0),
            lag2: Complex64::from_polar(co * 0.8, 0.0),
            lag3: Complex64::from_polar(co * 0.7, 0.0),
        };
        let mut fields = PerGateFields::default();
        est.h_only(2, &inputs, &mut fields);
        assert!(fields.zdr.is_none());
        assert!(fields.zdrm.unwrap() > 19.0);
        assert!(fields.ldrh.unwrap() < -19.0);
        assert!(fields.ldrv.is_none());
        assert!(fields.snrvx.is_some());
    }

    #[test]
    fn noise_prep_records_power_in_db() {
        let est = estimator(EstimatorConfig::default());
        let inputs = strong_single(0.3);
        let mut fields = PerGateFields::default();
        est.single_pol_h_noise_prep(&inputs, &mut fields);
        assert!((fields.lag0_hc_db.unwrap() + 37.0).abs() < 1e-9);
        assert_eq!(fields.dbm_for_noise, fields.lag0_hc_db);
        assert_eq!(fields.phase_for_noise, Some(inputs.lag1));
    }

    #[test]
    fn width_estimators_are_zero_for_flat_correlation() {
        assert_eq!(width_r0r1(1.0, 1.0, 25.0), 0.0);
        assert_eq!(width_r1r2(0.5, 0.6, 25.0), 0.0);
        assert!(width_r0r1(1.0, 0.5, 25.0) > 0.0);
    }
}
