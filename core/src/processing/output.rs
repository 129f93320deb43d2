use ndarray::Array1;

use super::kdp::DerivedArrays;
use super::mode::ModeStrategy;
use super::PerGateFields;
use crate::config::{MomentsConfig, OutputFieldSpec};
use crate::estimators::finite;
use crate::math::complex::arg_deg;
use crate::ray_interface::{
    CensorField, FoldLimits, OutputField, OutputFieldId, RayContext, CENSOR_FLAG_NAME,
    MISSING_VALUE,
};

fn flag(value: Option<bool>) -> Option<f64> {
    value.map(|set| if set { 1.0 } else { 0.0 })
}

/// Reads one derived array gate, if the arrays were built for this ray.
fn derived(
    arrays: Option<&DerivedArrays>,
    gate: usize,
    pick: fn(&DerivedArrays) -> &Array1<f64>,
) -> Option<f64> {
    let array = pick(arrays?);
    array.get(gate).copied().and_then(finite)
}

/// Value of output field `id` at one gate.
fn gate_value(
    id: OutputFieldId,
    gate: usize,
    f: &PerGateFields,
    arrays: Option<&DerivedArrays>,
) -> Option<f64> {
    use OutputFieldId::*;
    match id {
        Snr => f.snr,
        Dbm => f.dbm,
        Dbz => f.dbz,
        Dbzhc => f.dbzhc,
        Dbzvc => f.dbzvc,
        Dbzhx => f.dbzhx,
        Dbzvx => f.dbzvx,
        DbzNoAtmosAtten => f.dbz_no_atmos_atten,
        Vel => f.vel,
        VelAlt => f.vel_alt,
        VelHv => f.vel_hv,
        VelAltFoldInterval => f.vel_alt_fold_interval,
        VelAltFoldConfidence => f.vel_alt_fold_confidence,
        VelDiff => f.vel_diff,
        VelUnfoldInterval => f.vel_unfold_interval,
        VelHOnly => f.vel_h_only,
        VelVOnly => f.vel_v_only,
        Width => f.width,
        WidthHOnly => f.width_h_only,
        WidthVOnly => f.width_v_only,
        Ncp => f.ncp,
        NcpHOnly => f.ncp_h_only,
        NcpVOnly => f.ncp_v_only,
        NcpHMinusV => f.ncp_h_minus_v,
        Zdrm => f.zdrm,
        Zdr => f.zdr,
        ZdrBias => f.zdr_bias,
        Ldrhm => f.ldrhm,
        Ldrh => f.ldrh,
        Ldrvm => f.ldrvm,
        Ldrv => f.ldrv,
        LdrDiff => f.ldr_diff,
        LdrMean => f.ldr_mean,
        Rhohv => f.rhohv,
        RhohvNnc => f.rhohv_nnc,
        RhoHcvx => f.rho_hcvx,
        RhoVchx => f.rho_vchx,
        RhoVxhx => f.rho_vxhx,
        Phidp0 => f.phidp0,
        Phidp => f.phidp,
        PhidpCond => f.phidp_cond,
        PhidpFilt => f.phidp_filt,
        Kdp => f.kdp,
        Psob => f.psob,
        Snrhc => f.snrhc,
        Snrhx => f.snrhx,
        Snrvc => f.snrvc,
        Snrvx => f.snrvx,
        Dbmhc => f.dbmhc,
        Dbmhx => f.dbmhx,
        Dbmvc => f.dbmvc,
        Dbmvx => f.dbmvx,
        PhaseForNoise => f.phase_for_noise.map(arg_deg),
        AccumPhaseChange => f.accum_phase_change.map(|accum| accum % 180.0),
        PhaseChangeError => f.phase_change_error,
        DbmSdev => f.dbm_sdev,
        NcpMean => f.ncp_mean,
        NoiseFlag => flag(f.noise_flag),
        SignalFlag => flag(f.signal_flag),
        NoiseBiasDbHc => f.noise_bias_db_hc,
        NoiseBiasDbHx => f.noise_bias_db_hx,
        NoiseBiasDbVc => f.noise_bias_db_vc,
        NoiseBiasDbVx => f.noise_bias_db_vx,
        DbzForKdp => derived(arrays, gate, |a| &a.kdp_inputs.dbz),
        ZdrForKdp => derived(arrays, gate, |a| &a.kdp_inputs.zdr),
        RhohvForKdp => derived(arrays, gate, |a| &a.kdp_inputs.rhohv),
        SnrForKdp => derived(arrays, gate, |a| &a.kdp_inputs.snr),
        PhidpSdevForKdp => f.phidp_sdev_4kdp,
        PhidpJitterForKdp => f.phidp_jitter_4kdp,
        ZdrSdevForKdp => f.zdr_sdev_4kdp,
        DbzAttenCorrection => f.dbz_atten_correction,
        ZdrAttenCorrection => f.zdr_atten_correction,
        DbzAttenCorrected => f.dbz_atten_corrected,
        ZdrAttenCorrected => f.zdr_atten_corrected,
    }
}

/// Interval over which field `id` wraps, if it wraps at all.
pub fn fold_limits(
    id: OutputFieldId,
    strategy: &dyn ModeStrategy,
    nyquist_mps: f64,
) -> Option<FoldLimits> {
    use OutputFieldId::*;
    match id {
        Vel | VelAlt => Some(FoldLimits::symmetric(nyquist_mps)),
        VelHv | VelHOnly | VelVOnly => Some(FoldLimits::symmetric(nyquist_mps / 2.0)),
        Phidp0 | Phidp | PhidpCond | PhidpFilt => {
            Some(FoldLimits::symmetric(strategy.phidp_fold_deg()))
        }
        PhaseForNoise => Some(FoldLimits::symmetric(180.0)),
        _ => None,
    }
}

/// Builds the configured output fields from the per-gate records.
#[derive(Debug, Clone)]
pub struct OutputAssembler {
    specs: Vec<OutputFieldSpec>,
    write_censor_flag: bool,
}

impl OutputAssembler {
    pub fn new(config: &MomentsConfig) -> Self {
        Self {
            specs: config.output_fields.clone(),
            write_censor_flag: config.censoring.write_censor_flag,
        }
    }

    pub fn fields(
        &self,
        strategy: &dyn ModeStrategy,
        context: &RayContext,
        fields: &[PerGateFields],
        arrays: Option<&DerivedArrays>,
    ) -> Vec<OutputField> {
        self.specs
            .iter()
            .map(|spec| OutputField {
                id: spec.id,
                name: spec.name.clone(),
                units: spec.units.clone(),
                long_name: spec.long_name.clone(),
                encoding: spec.encoding,
                folds: fold_limits(spec.id, strategy, context.nyquist_mps),
                is_discrete: spec.id.is_discrete(),
                missing_value: MISSING_VALUE,
                data: fields
                    .iter()
                    .enumerate()
                    .map(|(gate, record)| {
                        gate_value(spec.id, gate, record, arrays)
                            .filter(|value| value.is_finite())
                            .map_or(MISSING_VALUE, |value| value as f32)
                    })
                    .collect(),
            })
            .collect()
    }

    /// `mask` is `None` when censoring did not run for the ray.
    pub fn censor_field(&self, mask: Option<&[bool]>) -> Option<CensorField> {
        if !self.write_censor_flag {
            return None;
        }
        mask.map(|mask| CensorField {
            name: CENSOR_FLAG_NAME.to_string(),
            long_name: "flag_to_indicate_censoring_has_been_applied".to_string(),
            data: mask.iter().map(|censored| i8::from(*censored)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolarizationMode;
    use crate::test_support::{context, output as spec};
    use num_complex::Complex64;

    fn assembler(specs: Vec<OutputFieldSpec>) -> OutputAssembler {
        let mut config = MomentsConfig::new(PolarizationMode::DpAltHvCoOnly, specs);
        config.censoring.write_censor_flag = true;
        OutputAssembler::new(&config)
    }

    #[test]
    fn missing_gates_use_missing_value() {
        let assembler = assembler(vec![spec(OutputFieldId::Dbz, "DBZ")]);
        let records = vec![
            PerGateFields {
                dbz: Some(12.5),
                ..Default::default()
            },
            PerGateFields::default(),
        ];
        let ctx = context(2);
        let out = assembler.fields(PolarizationMode::SinglePolH.strategy(), &ctx, &records, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "DBZ");
        assert_eq!(out[0].data, vec![12.5, MISSING_VALUE]);
        assert_eq!(out[0].folds, None);
    }

    #[test]
    fn non_finite_values_are_written_as_missing() {
        let assembler = assembler(vec![
            spec(OutputFieldId::Width, "WIDTH"),
            spec(OutputFieldId::PhaseForNoise, "PHASE_FOR_NOISE"),
        ]);
        let records = vec![PerGateFields {
            width: Some(f64::NAN),
            phase_for_noise: Some(Complex64::new(f64::NAN, 1.0)),
            ..Default::default()
        }];
        let ctx = context(1);
        let out = assembler.fields(PolarizationMode::SinglePolH.strategy(), &ctx, &records, None);
        assert_eq!(out[0].data, vec![MISSING_VALUE]);
        assert_eq!(out[1].data, vec![MISSING_VALUE]);
    }

    #[test]
    fn transforms_phase_flags_and_accumulated_change() {
        let assembler = assembler(vec![
            spec(OutputFieldId::PhaseForNoise, "PHASE_FOR_NOISE"),
            spec(OutputFieldId::AccumPhaseChange, "ACCUM_PHASE_CHANGE"),
            spec(OutputFieldId::NoiseFlag, "NOISE_FLAG"),
        ]);
        let records = vec![PerGateFields {
            phase_for_noise: Some(Complex64::new(0.0, 2.0)),
            accum_phase_change: Some(400.0),
            noise_flag: Some(true),
            ..Default::default()
        }];
        let ctx = context(1);
        let out = assembler.fields(PolarizationMode::SinglePolH.strategy(), &ctx, &records, None);
        assert!((out[0].data[0] - 90.0).abs() < 1e-4);
        assert_eq!(out[0].folds, Some(FoldLimits::symmetric(180.0)));
        assert!((out[1].data[0] - 40.0).abs() < 1e-4);
        assert_eq!(out[2].data[0], 1.0);
        assert!(out[2].is_discrete);
    }

    #[test]
    fn fold_limits_follow_mode_and_nyquist() {
        let alt = PolarizationMode::DpAltHvCoOnly.strategy();
        let sim = PolarizationMode::DpSimHv.strategy();
        assert_eq!(fold_limits(OutputFieldId::Vel, alt, 25.0), Some(FoldLimits::symmetric(25.0)));
        assert_eq!(fold_limits(OutputFieldId::VelHv, alt, 25.0), Some(FoldLimits::symmetric(12.5)));
        assert_eq!(fold_limits(OutputFieldId::Phidp, alt, 25.0), Some(FoldLimits::symmetric(90.0)));
        assert_eq!(fold_limits(OutputFieldId::PhidpFilt, sim, 25.0), Some(FoldLimits::symmetric(180.0)));
        assert_eq!(fold_limits(OutputFieldId::Zdr, sim, 25.0), None);
    }

    #[test]
    fn derived_fields_are_missing_without_arrays() {
        let assembler = assembler(vec![spec(OutputFieldId::DbzForKdp, "DBZ_FOR_KDP")]);
        let records = vec![PerGateFields {
            dbz: Some(30.0),
            ..Default::default()
        }];
        let ctx = context(1);
        let strategy = PolarizationMode::DpSimHv.strategy();
        let out = assembler.fields(strategy, &ctx, &records, None);
        assert_eq!(out[0].data, vec![MISSING_VALUE]);

        let mut arrays = DerivedArrays::default();
        arrays.load(&records);
        let out = assembler.fields(strategy, &ctx, &records, Some(&arrays));
        assert_eq!(out[0].data, vec![30.0]);
    }

    #[test]
    fn censor_field_carries_mask() {
        let assembler = assembler(Vec::new());
        let field = assembler.censor_field(Some(&[true, false, true]));
        let field = field.expect("censor field");
        assert_eq!(field.name, CENSOR_FLAG_NAME);
        assert_eq!(field.data, vec![1, 0, 1]);
        assert_eq!(assembler.censor_field(None), None);

        let mut config = MomentsConfig::new(PolarizationMode::SinglePolH, Vec::new());
        config.censoring.write_censor_flag = false;
        assert_eq!(OutputAssembler::new(&config).censor_field(Some(&[true])), None);
    }
}
