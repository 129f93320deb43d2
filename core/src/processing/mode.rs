//! Per-polarization-mode behaviour: which covariances a mode reads, which
//! channels it estimates noise on, and which estimator entry points it
//! drives.

use super::covariance::{ComplexBinding, ComplexTerm, Covariance, FieldBindings};
use super::PerGateFields;
use crate::config::PolarizationMode;
use crate::estimators::{
    AltHvInputs, DpSingleTxInputs, MomentEstimator, SimHvInputs, SinglePolInputs,
};
use crate::prelude::Channel;
use crate::ray_interface::CovarianceFieldId as Id;

pub trait ModeStrategy: Send + Sync {
    fn mode(&self) -> PolarizationMode;

    fn bindings(&self) -> &'static FieldBindings;

    /// Channels the noise locator estimates noise for.
    fn noise_channels(&self) -> &'static [Channel];

    /// Cross channels whose noise follows a co channel's bias, as
    /// `(cross, co)`.
    fn cross_noise_sources(&self) -> &'static [(Channel, Channel)] {
        &[]
    }

    fn noise_prep(
        &self,
        estimator: &dyn MomentEstimator,
        covar: &Covariance,
        fields: &mut PerGateFields,
    );

    fn compute(
        &self,
        estimator: &dyn MomentEstimator,
        gate: usize,
        covar: &Covariance,
        fields: &mut PerGateFields,
    );

    /// Fold limit of the phidp outputs.
    fn phidp_fold_deg(&self) -> f64 {
        180.0
    }
}

impl PolarizationMode {
    pub fn strategy(self) -> &'static dyn ModeStrategy {
        match self {
            PolarizationMode::SinglePolH => &SinglePolH,
            PolarizationMode::SinglePolV => &SinglePolV,
            PolarizationMode::DpAltHvCoOnly => &AltHvCoOnly,
            PolarizationMode::DpAltHvCoCross => &AltHvCoCross,
            PolarizationMode::DpSimHv => &SimHv,
            PolarizationMode::DpHOnly => &HOnly,
            PolarizationMode::DpVOnly => &VOnly,
        }
    }
}

const fn pair(term: ComplexTerm, db: Id, phase: Id) -> ComplexBinding {
    ComplexBinding::required(term, db, phase)
}

static SINGLE_POL_H: FieldBindings = FieldBindings {
    powers: &[(Channel::Hc, Id::Lag0HcDb)],
    complexes: &[
        pair(ComplexTerm::Lag1Hc, Id::Lag1HcDb, Id::Lag1HcPhase),
        pair(ComplexTerm::Lag2Hc, Id::Lag2HcDb, Id::Lag2HcPhase),
        pair(ComplexTerm::Lag3Hc, Id::Lag3HcDb, Id::Lag3HcPhase),
    ],
};

static SINGLE_POL_V: FieldBindings = FieldBindings {
    powers: &[(Channel::Vc, Id::Lag0VcDb)],
    complexes: &[
        pair(ComplexTerm::Lag1Vc, Id::Lag1VcDb, Id::Lag1VcPhase),
        pair(ComplexTerm::Lag2Vc, Id::Lag2VcDb, Id::Lag2VcPhase),
        pair(ComplexTerm::Lag3Vc, Id::Lag3VcDb, Id::Lag3VcPhase),
    ],
};

static ALT_HV_CO_ONLY: FieldBindings = FieldBindings {
    powers: &[(Channel::Hc, Id::Lag0HcDb), (Channel::Vc, Id::Lag0VcDb)],
    complexes: &[
        pair(ComplexTerm::Lag1Vchc, Id::Lag1VchcDb, Id::Lag1VchcPhase),
        pair(ComplexTerm::Lag1Hcvc, Id::Lag1HcvcDb, Id::Lag1HcvcPhase),
        pair(ComplexTerm::Lag2Hc, Id::Lag2HcDb, Id::Lag2HcPhase),
        pair(ComplexTerm::Lag2Vc, Id::Lag2VcDb, Id::Lag2VcPhase),
    ],
};

static ALT_HV_CO_CROSS: FieldBindings = FieldBindings {
    powers: &[
        (Channel::Hc, Id::Lag0HcDb),
        (Channel::Hx, Id::Lag0HxDb),
        (Channel::Vc, Id::Lag0VcDb),
        (Channel::Vx, Id::Lag0VxDb),
    ],
    complexes: &[
        pair(ComplexTerm::Lag0Vchx, Id::Lag0VchxDb, Id::Lag0VchxPhase),
        pair(ComplexTerm::Lag0Hcvx, Id::Lag0HcvxDb, Id::Lag0HcvxPhase),
        pair(ComplexTerm::Lag1Vchc, Id::Lag1VchcDb, Id::Lag1VchcPhase),
        pair(ComplexTerm::Lag1Hcvc, Id::Lag1HcvcDb, Id::Lag1HcvcPhase),
        pair(ComplexTerm::Lag2Hc, Id::Lag2HcDb, Id::Lag2HcPhase),
        pair(ComplexTerm::Lag2Vc, Id::Lag2VcDb, Id::Lag2VcPhase),
        ComplexBinding::optional(ComplexTerm::Lag1Vxhx, Id::Lag1VxhxDb, Id::Lag1VxhxPhase),
    ],
};

static SIM_HV: FieldBindings = FieldBindings {
    powers: &[(Channel::Hc, Id::Lag0HcDb), (Channel::Vc, Id::Lag0VcDb)],
    complexes: &[
        pair(ComplexTerm::Rvvhh0, Id::Rvvhh0Db, Id::Rvvhh0Phase),
        pair(ComplexTerm::Lag1Hc, Id::Lag1HcDb, Id::Lag1HcPhase),
        pair(ComplexTerm::Lag1Vc, Id::Lag1VcDb, Id::Lag1VcPhase),
        pair(ComplexTerm::Lag2Hc, Id::Lag2HcDb, Id::Lag2HcPhase),
        pair(ComplexTerm::Lag2Vc, Id::Lag2VcDb, Id::Lag2VcPhase),
        pair(ComplexTerm::Lag3Hc, Id::Lag3HcDb, Id::Lag3HcPhase),
        pair(ComplexTerm::Lag3Vc, Id::Lag3VcDb, Id::Lag3VcPhase),
    ],
};

static H_ONLY: FieldBindings = FieldBindings {
    powers: &[(Channel::Hc, Id::Lag0HcDb), (Channel::Vx, Id::Lag0VxDb)],
    complexes: &[
        pair(ComplexTerm::Lag1Hc, Id::Lag1HcDb, Id::Lag1HcPhase),
        pair(ComplexTerm::Lag2Hc, Id::Lag2HcDb, Id::Lag2HcPhase),
        pair(ComplexTerm::Lag3Hc, Id::Lag3HcDb, Id::Lag3HcPhase),
    ],
};

static V_ONLY: FieldBindings = FieldBindings {
    powers: &[(Channel::Vc, Id::Lag0VcDb), (Channel::Hx, Id::Lag0HxDb)],
    complexes: &[
        pair(ComplexTerm::Lag1Vc, Id::Lag1VcDb, Id::Lag1VcPhase),
        pair(ComplexTerm::Lag2Vc, Id::Lag2VcDb, Id::Lag2VcPhase),
        pair(ComplexTerm::Lag3Vc, Id::Lag3VcDb, Id::Lag3VcPhase),
    ],
};

fn single_pol_h(covar: &Covariance) -> SinglePolInputs {
    SinglePolInputs {
        lag0: covar.lag0.hc,
        lag1: covar.lag1_hc,
        lag2: covar.lag2_hc,
        lag3: covar.lag3_hc,
    }
}

fn single_pol_v(covar: &Covariance) -> SinglePolInputs {
    SinglePolInputs {
        lag0: covar.lag0.vc,
        lag1: covar.lag1_vc,
        lag2: covar.lag2_vc,
        lag3: covar.lag3_vc,
    }
}

fn alt_hv(covar: &Covariance) -> AltHvInputs {
    AltHvInputs {
        lag0_hc: covar.lag0.hc,
        lag0_hx: covar.lag0.hx,
        lag0_vc: covar.lag0.vc,
        lag0_vx: covar.lag0.vx,
        lag0_vchx: covar.lag0_vchx,
        lag0_hcvx: covar.lag0_hcvx,
        lag1_vxhx: covar.lag1_vxhx,
        lag1_vchc: covar.lag1_vchc,
        lag1_hcvc: covar.lag1_hcvc,
        lag2_hc: covar.lag2_hc,
        lag2_vc: covar.lag2_vc,
    }
}

fn sim_hv(covar: &Covariance) -> SimHvInputs {
    SimHvInputs {
        lag0_hc: covar.lag0.hc,
        lag0_vc: covar.lag0.vc,
        rvvhh0: covar.rvvhh0,
        lag1_hc: covar.lag1_hc,
        lag1_vc: covar.lag1_vc,
        lag2_hc: covar.lag2_hc,
        lag2_vc: covar.lag2_vc,
        lag3_hc: covar.lag3_hc,
        lag3_vc: covar.lag3_vc,
    }
}

fn h_only(covar: &Covariance) -> DpSingleTxInputs {
    DpSingleTxInputs {
        lag0_co: covar.lag0.hc,
        lag0_cross: covar.lag0.vx,
        lag1: covar.lag1_hc,
        lag2: covar.lag2_hc,
        lag3: covar.lag3_hc,
    }
}

fn v_only(covar: &Covariance) -> DpSingleTxInputs {
    DpSingleTxInputs {
        lag0_co: covar.lag0.vc,
        lag0_cross: covar.lag0.hx,
        lag1: covar.lag1_vc,
        lag2: covar.lag2_vc,
        lag3: covar.lag3_vc,
    }
}

pub struct SinglePolH;
pub struct SinglePolV;
pub struct AltHvCoOnly;
pub struct AltHvCoCross;
pub struct SimHv;
pub struct HOnly;
pub struct VOnly;

impl ModeStrategy for SinglePolH {
    fn mode(&self) -> PolarizationMode {
        PolarizationMode::SinglePolH
    }

    fn bindings(&self) -> &'static FieldBindings {
        &SINGLE_POL_H
    }

    fn noise_channels(&self) -> &'static [Channel] {
        &[Channel::Hc]
    }

    fn noise_prep(&self, estimator: &dyn MomentEstimator, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.single_pol_h_noise_prep(&single_pol_h(covar), fields);
    }

    fn compute(&self, estimator: &dyn MomentEstimator, gate: usize, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.single_pol_h(gate, &single_pol_h(covar), fields);
    }
}

impl ModeStrategy for SinglePolV {
    fn mode(&self) -> PolarizationMode {
        PolarizationMode::SinglePolV
    }

    fn bindings(&self) -> &'static FieldBindings {
        &SINGLE_POL_V
    }

    fn noise_channels(&self) -> &'static [Channel] {
        &[Channel::Vc]
    }

    fn noise_prep(&self, estimator: &dyn MomentEstimator, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.single_pol_v_noise_prep(&single_pol_v(covar), fields);
    }

    fn compute(&self, estimator: &dyn MomentEstimator, gate: usize, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.single_pol_v(gate, &single_pol_v(covar), fields);
    }
}

impl ModeStrategy for AltHvCoOnly {
    fn mode(&self) -> PolarizationMode {
        PolarizationMode::DpAltHvCoOnly
    }

    fn bindings(&self) -> &'static FieldBindings {
        &ALT_HV_CO_ONLY
    }

    fn noise_channels(&self) -> &'static [Channel] {
        &[Channel::Hc, Channel::Vc]
    }

    fn noise_prep(&self, estimator: &dyn MomentEstimator, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.alt_hv_noise_prep(&alt_hv(covar), fields);
    }

    fn compute(&self, estimator: &dyn MomentEstimator, gate: usize, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.alt_hv_co_only(gate, &alt_hv(covar), fields);
    }

    fn phidp_fold_deg(&self) -> f64 {
        90.0
    }
}

impl ModeStrategy for AltHvCoCross {
    fn mode(&self) -> PolarizationMode {
        PolarizationMode::DpAltHvCoCross
    }

    fn bindings(&self) -> &'static FieldBindings {
        &ALT_HV_CO_CROSS
    }

    fn noise_channels(&self) -> &'static [Channel] {
        &[Channel::Hc, Channel::Hx, Channel::Vc, Channel::Vx]
    }

    fn cross_noise_sources(&self) -> &'static [(Channel, Channel)] {
        &[(Channel::Hx, Channel::Hc), (Channel::Vx, Channel::Vc)]
    }

    fn noise_prep(&self, estimator: &dyn MomentEstimator, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.alt_hv_noise_prep(&alt_hv(covar), fields);
    }

    fn compute(&self, estimator: &dyn MomentEstimator, gate: usize, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.alt_hv_co_cross(gate, &alt_hv(covar), fields);
    }

    fn phidp_fold_deg(&self) -> f64 {
        90.0
    }
}

impl ModeStrategy for SimHv {
    fn mode(&self) -> PolarizationMode {
        PolarizationMode::DpSimHv
    }

    fn bindings(&self) -> &'static FieldBindings {
        &SIM_HV
    }

    fn noise_channels(&self) -> &'static [Channel] {
        &[Channel::Hc, Channel::Vc]
    }

    fn noise_prep(&self, estimator: &dyn MomentEstimator, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.sim_hv_noise_prep(&sim_hv(covar), fields);
    }

    fn compute(&self, estimator: &dyn MomentEstimator, gate: usize, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.sim_hv(gate, &sim_hv(covar), fields);
    }
}

impl ModeStrategy for HOnly {
    fn mode(&self) -> PolarizationMode {
        PolarizationMode::DpHOnly
    }

    fn bindings(&self) -> &'static FieldBindings {
        &H_ONLY
    }

    fn noise_channels(&self) -> &'static [Channel] {
        &[Channel::Hc, Channel::Vx]
    }

    fn cross_noise_sources(&self) -> &'static [(Channel, Channel)] {
        &[(Channel::Vx, Channel::Hc)]
    }

    fn noise_prep(&self, estimator: &dyn MomentEstimator, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.h_only_noise_prep(&h_only(covar), fields);
    }

    fn compute(&self, estimator: &dyn MomentEstimator, gate: usize, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.h_only(gate, &h_only(covar), fields);
    }
}

impl ModeStrategy for VOnly {
    fn mode(&self) -> PolarizationMode {
        PolarizationMode::DpVOnly
    }

    fn bindings(&self) -> &'static FieldBindings {
        &V_ONLY
    }

    fn noise_channels(&self) -> &'static [Channel] {
        &[Channel::Hx, Channel::Vc]
    }

    fn cross_noise_sources(&self) -> &'static [(Channel, Channel)] {
        &[(Channel::Hx, Channel::Vc)]
    }

    fn noise_prep(&self, estimator: &dyn MomentEstimator, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.v_only_noise_prep(&v_only(covar), fields);
    }

    fn compute(&self, estimator: &dyn MomentEstimator, gate: usize, covar: &Covariance, fields: &mut PerGateFields) {
        estimator.v_only(gate, &v_only(covar), fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_maps_to_its_own_strategy() {
        for mode in PolarizationMode::ALL {
            assert_eq!(mode.strategy().mode(), mode);
        }
    }

    #[test]
    fn only_co_cross_has_optional_fields() {
        for mode in PolarizationMode::ALL {
            let optional = mode
                .strategy()
                .bindings()
                .complexes
                .iter()
                .filter(|b| b.optional)
                .count();
            let expected = usize::from(mode == PolarizationMode::DpAltHvCoCross);
            assert_eq!(optional, expected, "{mode:?}");
        }
    }

    #[test]
    fn required_ids_follow_the_mode_table() {
        let ids = PolarizationMode::DpHOnly.strategy().bindings().required_ids();
        assert_eq!(
            ids,
            vec![
                Id::Lag0HcDb,
                Id::Lag0VxDb,
                Id::Lag1HcDb,
                Id::Lag1HcPhase,
                Id::Lag2HcDb,
                Id::Lag2HcPhase,
                Id::Lag3HcDb,
                Id::Lag3HcPhase,
            ]
        );
        let alt = PolarizationMode::DpAltHvCoCross.strategy().bindings().required_ids();
        assert!(!alt.contains(&Id::Lag1VxhxDb));
        assert_eq!(alt.len(), 16);
    }

    #[test]
    fn alternating_modes_fold_phidp_at_90() {
        for mode in PolarizationMode::ALL {
            let expected = if mode.is_alternating() { 90.0 } else { 180.0 };
            assert_eq!(mode.strategy().phidp_fold_deg(), expected);
        }
    }
}
