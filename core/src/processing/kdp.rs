use ndarray::Array1;

use super::PerGateFields;
use crate::estimators::{finite, KdpFilter, KdpInputs, KdpOutput};
use crate::ray_interface::RayContext;

fn to_nan(value: Option<f64>) -> f64 {
    value.unwrap_or(f64::NAN)
}

fn sum(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? + b?)
}

/// Flat per-gate arrays assembled from the per-gate records. `NaN` marks
/// a missing gate.
#[derive(Debug, Clone, Default)]
pub struct DerivedArrays {
    /// SNR (Hc), dBZ, ZDR, rhohv and phidp as handed to the KDP filter.
    pub kdp_inputs: KdpInputs,
    pub ldr: Array1<f64>,
    pub kdp: Array1<f64>,
}

impl DerivedArrays {
    pub fn load(&mut self, fields: &[PerGateFields]) {
        let column = |value: fn(&PerGateFields) -> Option<f64>| -> Array1<f64> {
            fields.iter().map(|f| to_nan(value(f))).collect()
        };
        self.kdp_inputs = KdpInputs {
            snr: column(|f| f.snrhc),
            dbz: column(|f| f.dbz),
            zdr: column(|f| f.zdr),
            rhohv: column(|f| f.rhohv),
            phidp: column(|f| f.phidp),
        };
        self.ldr = column(|f| f.ldrh);
        self.kdp = column(|f| f.kdp);
    }

    pub fn len(&self) -> usize {
        self.kdp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kdp.is_empty()
    }
}

/// Runs the KDP filter over the derived arrays and merges its results
/// back into the per-gate records.
pub struct KdpIntegrator {
    filter: Box<dyn KdpFilter>,
}

impl KdpIntegrator {
    pub fn new(filter: Box<dyn KdpFilter>) -> Self {
        Self { filter }
    }

    pub fn run(&mut self, context: &RayContext, arrays: &mut DerivedArrays, fields: &mut [PerGateFields]) {
        let output = self.filter.compute(context, &arrays.kdp_inputs);
        merge(output, arrays, fields);
    }
}

/// Copies KDP filter output into the records. PSOB is kept only on
/// signal gates; corrected dBZ and ZDR need both operands.
pub fn merge(output: &KdpOutput, arrays: &mut DerivedArrays, fields: &mut [PerGateFields]) {
    for (gate, record) in fields.iter_mut().enumerate() {
        if let Some(kdp) = finite(output.kdp[gate]) {
            record.kdp = Some(kdp);
            arrays.kdp[gate] = kdp;
        }
        record.phidp_cond = finite(output.phidp_cond[gate]);
        record.phidp_filt = finite(output.phidp_filt[gate]);
        record.phidp_sdev_4kdp = finite(output.phidp_sdev[gate]);
        record.phidp_jitter_4kdp = finite(output.phidp_jitter[gate]);
        record.zdr_sdev_4kdp = finite(output.zdr_sdev[gate]);
        if record.is_signal() {
            record.psob = finite(output.psob[gate]);
        }
        record.dbz_atten_correction = finite(output.dbz_atten_correction[gate]);
        record.zdr_atten_correction = finite(output.zdr_atten_correction[gate]);
        record.dbz_atten_corrected = sum(record.dbz, record.dbz_atten_correction);
        record.zdr_atten_corrected = sum(record.zdr, record.zdr_atten_correction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(n: usize) -> KdpOutput {
        let filled = |v: f64| Array1::from_elem(n, v);
        KdpOutput {
            kdp: filled(0.5),
            phidp_cond: filled(30.0),
            phidp_filt: filled(31.0),
            phidp_sdev: filled(2.0),
            phidp_jitter: filled(1.0),
            zdr_sdev: filled(0.3),
            psob: filled(1.5),
            dbz_atten_correction: filled(0.2),
            zdr_atten_correction: filled(f64::NAN),
        }
    }

    #[test]
    fn load_marks_missing_as_nan() {
        let fields = vec![
            PerGateFields {
                snrhc: Some(10.0),
                phidp: Some(20.0),
                ..Default::default()
            },
            PerGateFields::default(),
        ];
        let mut arrays = DerivedArrays::default();
        arrays.load(&fields);
        assert_eq!(arrays.len(), 2);
        assert_eq!(arrays.kdp_inputs.snr[0], 10.0);
        assert!(arrays.kdp_inputs.snr[1].is_nan());
        assert!(arrays.kdp_inputs.dbz[0].is_nan());
    }

    #[test]
    fn psob_only_on_signal_gates() {
        let mut fields = vec![
            PerGateFields {
                signal_flag: Some(true),
                ..Default::default()
            },
            PerGateFields {
                signal_flag: Some(false),
                ..Default::default()
            },
            PerGateFields::default(),
        ];
        let mut arrays = DerivedArrays::default();
        arrays.load(&fields);
        merge(&output(3), &mut arrays, &mut fields);
        assert_eq!(fields[0].psob, Some(1.5));
        assert_eq!(fields[1].psob, None);
        assert_eq!(fields[2].psob, None);
        for gate in &fields {
            assert_eq!(gate.kdp, Some(0.5));
            assert_eq!(gate.phidp_cond, Some(30.0));
        }
        assert!(arrays.kdp.iter().all(|k| *k == 0.5));
    }

    #[test]
    fn corrected_fields_need_both_operands() {
        let mut fields = vec![
            PerGateFields {
                dbz: Some(40.0),
                zdr: Some(1.0),
                ..Default::default()
            },
            PerGateFields::default(),
        ];
        let mut arrays = DerivedArrays::default();
        arrays.load(&fields);
        merge(&output(2), &mut arrays, &mut fields);
        assert!((fields[0].dbz_atten_corrected.unwrap() - 40.2).abs() < 1e-12);
        assert_eq!(fields[0].zdr_atten_corrected, None);
        assert_eq!(fields[1].dbz_atten_corrected, None);
        assert_eq!(fields[1].dbz_atten_correction, Some(0.2));
    }
}
