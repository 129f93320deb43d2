use num_complex::Complex64;

use crate::prelude::Channel;

/// Replaces non-finite members with `None`.
macro_rules! discard_non_finite {
    ($record:expr, $($member:ident),+ $(,)?) => {
        $(
            if $record.$member.map_or(false, |value| !value.is_finite()) {
                $record.$member = None;
            }
        )+
    };
}

/// Every quantity derived for one gate. `None` means missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerGateFields {
    pub snr: Option<f64>,
    pub dbm: Option<f64>,
    pub dbz: Option<f64>,
    pub dbzhc: Option<f64>,
    pub dbzvc: Option<f64>,
    pub dbzhx: Option<f64>,
    pub dbzvx: Option<f64>,
    pub dbz_no_atmos_atten: Option<f64>,

    pub vel: Option<f64>,
    pub vel_alt: Option<f64>,
    pub vel_hv: Option<f64>,
    pub vel_alt_fold_interval: Option<f64>,
    pub vel_alt_fold_confidence: Option<f64>,
    pub vel_diff: Option<f64>,
    pub vel_unfold_interval: Option<f64>,
    pub vel_h_only: Option<f64>,
    pub vel_v_only: Option<f64>,

    pub width: Option<f64>,
    pub width_h_only: Option<f64>,
    pub width_v_only: Option<f64>,

    pub ncp: Option<f64>,
    pub ncp_h_only: Option<f64>,
    pub ncp_v_only: Option<f64>,
    pub ncp_h_minus_v: Option<f64>,

    pub zdrm: Option<f64>,
    pub zdr: Option<f64>,
    pub zdr_bias: Option<f64>,

    pub ldrhm: Option<f64>,
    pub ldrh: Option<f64>,
    pub ldrvm: Option<f64>,
    pub ldrv: Option<f64>,
    pub ldr_diff: Option<f64>,
    pub ldr_mean: Option<f64>,

    pub rhohv: Option<f64>,
    pub rhohv_nnc: Option<f64>,
    pub rho_hcvx: Option<f64>,
    pub rho_vchx: Option<f64>,
    pub rho_vxhx: Option<f64>,

    pub phidp0: Option<f64>,
    pub phidp: Option<f64>,
    pub phidp_cond: Option<f64>,
    pub phidp_filt: Option<f64>,
    pub kdp: Option<f64>,
    pub psob: Option<f64>,

    pub snrhc: Option<f64>,
    pub snrhx: Option<f64>,
    pub snrvc: Option<f64>,
    pub snrvx: Option<f64>,
    pub dbmhc: Option<f64>,
    pub dbmhx: Option<f64>,
    pub dbmvc: Option<f64>,
    pub dbmvx: Option<f64>,

    // noise preparation
    pub lag0_hc_db: Option<f64>,
    pub lag0_hx_db: Option<f64>,
    pub lag0_vc_db: Option<f64>,
    pub lag0_vx_db: Option<f64>,
    pub dbm_for_noise: Option<f64>,
    pub phase_for_noise: Option<Complex64>,

    // noise location
    pub accum_phase_change: Option<f64>,
    pub phase_change_error: Option<f64>,
    pub dbm_sdev: Option<f64>,
    pub ncp_mean: Option<f64>,
    pub noise_flag: Option<bool>,
    pub signal_flag: Option<bool>,
    pub noise_bias_db_hc: Option<f64>,
    pub noise_bias_db_hx: Option<f64>,
    pub noise_bias_db_vc: Option<f64>,
    pub noise_bias_db_vx: Option<f64>,

    // kdp
    pub phidp_sdev_4kdp: Option<f64>,
    pub phidp_jitter_4kdp: Option<f64>,
    pub zdr_sdev_4kdp: Option<f64>,
    pub dbz_atten_correction: Option<f64>,
    pub zdr_atten_correction: Option<f64>,
    pub dbz_atten_corrected: Option<f64>,
    pub zdr_atten_corrected: Option<f64>,
}

impl PerGateFields {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Keeps every member numerically valid or missing.
    pub fn discard_non_finite(&mut self) {
        discard_non_finite!(
            self,
            snr,
            dbm,
            dbz,
            dbzhc,
            dbzvc,
            dbzhx,
            dbzvx,
            dbz_no_atmos_atten,
            vel,
            vel_alt,
            vel_hv,
            vel_alt_fold_interval,
            vel_alt_fold_confidence,
            vel_diff,
            vel_unfold_interval,
            vel_h_only,
            vel_v_only,
            width,
            width_h_only,
            width_v_only,
            ncp,
            ncp_h_only,
            ncp_v_only,
            ncp_h_minus_v,
            zdrm,
            zdr,
            zdr_bias,
            ldrhm,
            ldrh,
            ldrvm,
            ldrv,
            ldr_diff,
            ldr_mean,
            rhohv,
            rhohv_nnc,
            rho_hcvx,
            rho_vchx,
            rho_vxhx,
            phidp0,
            phidp,
            phidp_cond,
            phidp_filt,
            kdp,
            psob,
            snrhc,
            snrhx,
            snrvc,
            snrvx,
            dbmhc,
            dbmhx,
            dbmvc,
            dbmvx,
            lag0_hc_db,
            lag0_hx_db,
            lag0_vc_db,
            lag0_vx_db,
            dbm_for_noise,
            accum_phase_change,
            phase_change_error,
            dbm_sdev,
            ncp_mean,
            noise_bias_db_hc,
            noise_bias_db_hx,
            noise_bias_db_vc,
            noise_bias_db_vx,
            phidp_sdev_4kdp,
            phidp_jitter_4kdp,
            zdr_sdev_4kdp,
            dbz_atten_correction,
            zdr_atten_correction,
            dbz_atten_corrected,
            zdr_atten_corrected,
        );
        if self
            .phase_for_noise
            .map_or(false, |phase| !phase.re.is_finite() || !phase.im.is_finite())
        {
            self.phase_for_noise = None;
        }
    }

    /// Zero-lag power in dB recorded during noise preparation.
    pub fn lag0_db(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Hc => self.lag0_hc_db,
            Channel::Hx => self.lag0_hx_db,
            Channel::Vc => self.lag0_vc_db,
            Channel::Vx => self.lag0_vx_db,
        }
    }

    pub fn set_noise_bias_db(&mut self, channel: Channel, value: Option<f64>) {
        match channel {
            Channel::Hc => self.noise_bias_db_hc = value,
            Channel::Hx => self.noise_bias_db_hx = value,
            Channel::Vc => self.noise_bias_db_vc = value,
            Channel::Vx => self.noise_bias_db_vx = value,
        }
    }

    pub fn is_noise(&self) -> bool {
        self.noise_flag == Some(true)
    }

    pub fn is_signal(&self) -> bool {
        self.signal_flag == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_every_member() {
        let mut fields = PerGateFields {
            dbz: Some(31.5),
            noise_flag: Some(true),
            phase_for_noise: Some(Complex64::new(1.0, 0.5)),
            zdr_atten_corrected: Some(0.2),
            ..Default::default()
        };
        fields.reset();
        assert_eq!(fields, PerGateFields::default());
    }

    #[test]
    fn non_finite_members_become_missing() {
        let mut fields = PerGateFields {
            dbz: Some(f64::NAN),
            width: Some(f64::INFINITY),
            vel: Some(-3.5),
            phase_for_noise: Some(Complex64::new(f64::NAN, 0.0)),
            noise_flag: Some(false),
            ..Default::default()
        };
        fields.discard_non_finite();
        assert_eq!(fields.dbz, None);
        assert_eq!(fields.width, None);
        assert_eq!(fields.vel, Some(-3.5));
        assert_eq!(fields.phase_for_noise, None);
        assert_eq!(fields.noise_flag, Some(false));
    }

    #[test]
    fn lag0_db_follows_channel() {
        let fields = PerGateFields {
            lag0_vx_db: Some(-80.0),
            ..Default::default()
        };
        assert_eq!(fields.lag0_db(Channel::Vx), Some(-80.0));
        assert_eq!(fields.lag0_db(Channel::Hc), None);
    }
}
