use super::covariance::Covariance;
use super::mode::ModeStrategy;
use super::PerGateFields;
use crate::estimators::{AltVelUnfolder, MomentEstimator};
use crate::ray_interface::RayContext;

/// Drives the moment estimator gate by gate for the active mode.
pub struct MomentDispatcher {
    unfolder: Box<dyn AltVelUnfolder>,
}

impl MomentDispatcher {
    pub fn new(unfolder: Box<dyn AltVelUnfolder>) -> Self {
        Self { unfolder }
    }

    pub fn run(
        &self,
        strategy: &dyn ModeStrategy,
        estimator: &dyn MomentEstimator,
        context: &RayContext,
        covariances: &[Covariance],
        fields: &mut [PerGateFields],
    ) {
        for (gate, (covar, record)) in covariances.iter().zip(fields.iter_mut()).enumerate() {
            strategy.compute(estimator, gate, covar, record);
            record.discard_non_finite();
        }
        if strategy.mode().is_alternating() {
            self.unfolder.unfold(context.nyquist_mps, fields);
            fields.iter_mut().for_each(PerGateFields::discard_non_finite);
        }
    }
}
