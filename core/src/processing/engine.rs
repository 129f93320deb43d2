use std::sync::Arc;

use super::arena::RayArena;
use super::censor::CensoringEngine;
use super::covariance::CovarianceExtractor;
use super::kdp::{DerivedArrays, KdpIntegrator};
use super::mode::ModeStrategy;
use super::moments::MomentDispatcher;
use super::noise::{NoiseAdapter, RayNoise};
use super::output::OutputAssembler;
use crate::config::MomentsConfig;
use crate::estimators::{
    AltVelUnfolder, FirKdpFilter, FoldIntervalUnfolder, InterestNoiseLocator, KdpFilter,
    MomentEstimator, NoiseLocator, PulsePairEstimator,
};
use crate::prelude::{ChannelValues, MomentsResult};
use crate::ray_interface::{Calibration, CovarianceRay, MomentsRay};
use crate::telemetry::{LogManager, LogRecord};

/// Gate buffers larger than this are released after each ray.
const MAX_RETAINED_GATES: usize = 4096;

/// The four capabilities an engine drives.
pub struct Capabilities {
    pub estimator: Box<dyn MomentEstimator>,
    pub noise_locator: Box<dyn NoiseLocator>,
    pub unfolder: Box<dyn AltVelUnfolder>,
    pub kdp_filter: Box<dyn KdpFilter>,
}

impl Capabilities {
    /// Pulse-pair estimator, interest-map noise locator, fold-interval
    /// unfolder and FIR KDP filter, configured from `config`.
    pub fn reference(config: &MomentsConfig) -> MomentsResult<Self> {
        Ok(Self {
            estimator: Box::new(PulsePairEstimator::new(config.estimator.clone())),
            noise_locator: Box::new(InterestNoiseLocator::new(&config.noise)?),
            unfolder: Box::new(FoldIntervalUnfolder::new()),
            kdp_filter: Box::new(FirKdpFilter::new(&config.kdp)),
        })
    }
}

/// Output of one successfully processed ray.
#[derive(Debug, Clone)]
pub struct RayResult {
    pub ray: MomentsRay,
    /// Present when the noise locator ran for this ray.
    pub noise: Option<RayNoise>,
}

/// Converts covariance rays into moments rays. One instance per worker;
/// all per-gate state lives in the engine and is reused across rays.
pub struct MomentsEngine {
    config: Arc<MomentsConfig>,
    strategy: &'static dyn ModeStrategy,
    estimator: Box<dyn MomentEstimator>,
    noise: NoiseAdapter,
    dispatcher: MomentDispatcher,
    kdp: KdpIntegrator,
    censoring: CensoringEngine,
    output: OutputAssembler,
    arena: RayArena,
    arrays: DerivedArrays,
    log: LogManager,
}

impl MomentsEngine {
    pub fn new(config: Arc<MomentsConfig>) -> MomentsResult<Self> {
        let capabilities = Capabilities::reference(&config)?;
        Self::with_capabilities(config, capabilities)
    }

    pub fn with_capabilities(
        config: Arc<MomentsConfig>,
        capabilities: Capabilities,
    ) -> MomentsResult<Self> {
        config.validate()?;
        Ok(Self {
            strategy: config.mode.strategy(),
            estimator: capabilities.estimator,
            noise: NoiseAdapter::new(
                capabilities.noise_locator,
                config.use_estimated_noise_for_noise_subtraction,
            ),
            dispatcher: MomentDispatcher::new(capabilities.unfolder),
            kdp: KdpIntegrator::new(capabilities.kdp_filter),
            censoring: CensoringEngine::new(&config.censoring),
            output: OutputAssembler::new(&config),
            arena: RayArena::with_capacity(MAX_RETAINED_GATES),
            arrays: DerivedArrays::default(),
            log: LogManager::new(),
            config,
        })
    }

    pub fn config(&self) -> &MomentsConfig {
        &self.config
    }

    /// Hands over log records buffered since the last call.
    pub fn take_logs(&mut self) -> Vec<LogRecord> {
        self.log.take()
    }

    /// Processes one ray. A missing or malformed required field fails the
    /// ray and leaves the engine ready for the next one.
    pub fn compute(
        &mut self,
        ray: &CovarianceRay,
        calibration: &Calibration,
    ) -> MomentsResult<RayResult> {
        let context = &ray.context;
        self.arena.checkout(context.gate_count);

        if let Err(err) = CovarianceExtractor::extract(
            ray,
            &self.config,
            self.strategy.bindings(),
            &mut self.arena.covariances,
            &mut self.log,
        ) {
            self.log.error(format!(
                "dropping ray el {:.2} az {:.2}: {err}",
                context.elevation_deg, context.azimuth_deg
            ));
            self.arena.release();
            return Err(err);
        }

        let working = self.config.calibration_overrides.working(calibration);
        let calibration = working.as_ref();
        self.estimator.init_ray(context, calibration);

        let noise = if self.config.locates_noise(context.elevation_deg) {
            Some(self.noise.run(
                self.strategy,
                self.estimator.as_mut(),
                context,
                calibration,
                &self.arena.covariances,
                &mut self.arena.fields,
            ))
        } else {
            None
        };

        self.dispatcher.run(
            self.strategy,
            self.estimator.as_ref(),
            context,
            &self.arena.covariances,
            &mut self.arena.fields,
        );

        let computes_kdp = self.config.mode.computes_kdp();
        if computes_kdp {
            self.arrays.load(&self.arena.fields);
            self.kdp.run(context, &mut self.arrays, &mut self.arena.fields);
        }

        let censored = self.censoring.run(&mut self.arena.fields, &mut self.arena.censor);

        let arrays = computes_kdp.then_some(&self.arrays);
        let mask = censored.then_some(self.arena.censor.as_slice());
        let moments = MomentsRay {
            context: context.clone(),
            fields: self.output.fields(self.strategy, context, &self.arena.fields, arrays),
            censor_flag: self.output.censor_field(mask),
            estimated_noise_dbm: noise
                .map_or_else(|| ChannelValues::splat(None), |noise| noise.estimated_dbm),
        };

        self.log.debug(format!(
            "ray el {:.2} az {:.2}: {} gates, {} fields",
            context.elevation_deg,
            context.azimuth_deg,
            context.gate_count,
            moments.fields.len()
        ));
        self.arena.release();
        Ok(RayResult { ray: moments, noise })
    }
}
