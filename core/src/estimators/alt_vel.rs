use super::AltVelUnfolder;
use crate::processing::PerGateFields;

/// Unfolds the half-Nyquist lag-2 velocity using the full-Nyquist
/// alternating estimate as the guide.
///
/// The lag-2 velocity `vel_hv` is the less noisy of the two but folds at
/// ±nyquist/2. The fold interval is the whole number of nyquist steps that
/// best reconciles it with `vel`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FoldIntervalUnfolder;

impl FoldIntervalUnfolder {
    pub fn new() -> Self {
        Self
    }

    fn unfold_gate(nyquist: f64, fields: &mut PerGateFields) {
        let (Some(vel), Some(vel_hv)) = (fields.vel, fields.vel_hv) else {
            return;
        };
        let diff = vel - vel_hv;
        let interval = (diff / nyquist).round();
        let residual = diff - interval * nyquist;

        fields.vel_diff = Some(diff);
        fields.vel_alt_fold_interval = Some(interval);
        fields.vel_unfold_interval = Some(interval);
        fields.vel_alt = Some(fold(vel_hv + interval * nyquist, nyquist));
        fields.vel_alt_fold_confidence =
            Some((1.0 - residual.abs() / (nyquist / 2.0)).clamp(0.0, 1.0));
    }
}

/// Folds `value` into `[-limit, limit)`.
fn fold(value: f64, limit: f64) -> f64 {
    let span = 2.0 * limit;
    (value + limit).rem_euclid(span) - limit
}

impl AltVelUnfolder for FoldIntervalUnfolder {
    fn unfold(&self, nyquist_mps: f64, fields: &mut [PerGateFields]) {
        if nyquist_mps.is_nan() || nyquist_mps <= 0.0 {
            return;
        }
        for gate in fields.iter_mut() {
            Self::unfold_gate(nyquist_mps, gate);
        }
    }
}
