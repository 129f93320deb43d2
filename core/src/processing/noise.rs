use super::covariance::Covariance;
use super::mode::ModeStrategy;
use super::PerGateFields;
use crate::estimators::{MomentEstimator, NoiseLocator};
use crate::prelude::{Channel, ChannelValues};
use crate::ray_interface::{Calibration, RayContext};

/// Per-channel noise resolved for one ray.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RayNoise {
    /// Median noise power from the locator, receiver gain included.
    pub median_dbm: ChannelValues<Option<f64>>,
    /// Noise handed to the estimator for subtraction, receiver gain removed.
    pub estimated_dbm: ChannelValues<Option<f64>>,
}

/// Runs the noise locator over a ray and feeds its results back into the
/// per-gate records and, optionally, into the moment estimator.
pub struct NoiseAdapter {
    locator: Box<dyn NoiseLocator>,
    use_estimated_noise: bool,
}

impl NoiseAdapter {
    pub fn new(locator: Box<dyn NoiseLocator>, use_estimated_noise: bool) -> Self {
        Self {
            locator,
            use_estimated_noise,
        }
    }

    /// The estimator must already be initialised for the ray.
    pub fn run(
        &mut self,
        strategy: &dyn ModeStrategy,
        estimator: &mut dyn MomentEstimator,
        context: &RayContext,
        calibration: &Calibration,
        covariances: &[Covariance],
        fields: &mut [PerGateFields],
    ) -> RayNoise {
        for (covar, gate) in covariances.iter().zip(fields.iter_mut()) {
            strategy.noise_prep(&*estimator, covar, gate);
            gate.discard_non_finite();
        }

        self.locator.set_ray_props(context, calibration);
        let channels = strategy.noise_channels();
        let location = self.locator.locate(channels, fields);

        for (gate, record) in fields.iter_mut().enumerate() {
            record.noise_flag = location.noise_flag[gate];
            record.signal_flag = location.signal_flag[gate];
            record.accum_phase_change = location.accum_phase_change[gate];
            record.phase_change_error = location.phase_change_error[gate];
            record.dbm_sdev = location.dbm_sdev[gate];
            record.ncp_mean = location.ncp_mean[gate];
            for &channel in channels {
                record.set_noise_bias_db(channel, location.noise_bias_db.get(channel));
            }
        }

        let mut noise = RayNoise {
            median_dbm: location.median_noise_dbm,
            estimated_dbm: ChannelValues::splat(None),
        };
        if self.use_estimated_noise {
            Self::override_noise(strategy, estimator, calibration, &mut noise);
        }
        noise
    }

    fn override_noise(
        strategy: &dyn ModeStrategy,
        estimator: &mut dyn MomentEstimator,
        calibration: &Calibration,
        noise: &mut RayNoise,
    ) {
        let cross_sources = strategy.cross_noise_sources();
        let is_cross = |channel: Channel| cross_sources.iter().any(|(cross, _)| *cross == channel);

        for &channel in strategy.noise_channels().iter().filter(|c| !is_cross(**c)) {
            if let Some(median) = noise.median_dbm.get(channel) {
                estimator.set_estimated_noise_dbm(channel, median);
                noise.estimated_dbm.set(
                    channel,
                    Some(median - calibration.receiver_gain_db.get(channel)),
                );
            }
        }

        for &(cross, co) in cross_sources {
            if let Some(co_median) = noise.median_dbm.get(co) {
                let cross_noise = calibration.noise_dbm.get(cross)
                    + (co_median - calibration.noise_dbm.get(co));
                estimator.set_estimated_noise_dbm(cross, cross_noise);
                noise.estimated_dbm.set(
                    cross,
                    Some(cross_noise - calibration.receiver_gain_db.get(cross)),
                );
            }
        }
    }
}
