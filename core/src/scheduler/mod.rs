//! Fixed-size worker pool that processes rays in parallel and returns them
//! in dispatch order.

pub mod noise_stats;
mod worker;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::MomentsConfig;
use crate::prelude::{ChannelValues, MomentsError, MomentsResult};
use crate::processing::MomentsEngine;
use crate::ray_interface::{Calibration, CovarianceRay, MomentsRay};
use crate::telemetry::{LogManager, Metrics, MetricsRecorder};

pub use noise_stats::{ChannelNoiseMean, VolumeNoiseStats};
use worker::{WorkItem, WorkReply, Worker};

/// Builds the engine for a new worker.
pub type EngineFactory = Arc<dyn Fn() -> MomentsResult<MomentsEngine> + Send + Sync>;

/// A ray that produced no output.
#[derive(Debug, Clone, PartialEq)]
pub struct RayError {
    /// Position of the ray in dispatch order.
    pub index: usize,
    pub error: MomentsError,
}

/// Everything collected from one volume.
#[derive(Debug, Clone)]
pub struct VolumeOutput {
    /// Output rays in dispatch order. Dropped rays are absent.
    pub rays: Vec<MomentsRay>,
    pub errors: Vec<RayError>,
    pub noise_means: ChannelValues<Option<ChannelNoiseMean>>,
    pub metrics: Metrics,
}

/// Dispatcher over idle and busy worker queues.
///
/// A ray goes to the first idle worker. With none idle, the oldest busy
/// worker is collected first, so results leave in the order rays came in
/// and at most `n_workers` rays are ever in flight.
pub struct RayScheduler {
    factory: EngineFactory,
    idle: VecDeque<Worker>,
    busy: VecDeque<Worker>,
    next_worker_id: usize,
    next_index: usize,
    noise_stats: VolumeNoiseStats,
    rays: Vec<MomentsRay>,
    errors: Vec<RayError>,
    metrics: MetricsRecorder,
}

impl RayScheduler {
    /// Pool of `n_workers` reference engines sharing `config`.
    pub fn new(config: Arc<MomentsConfig>, n_workers: usize) -> MomentsResult<Self> {
        config.validate()?;
        let noise_stats = VolumeNoiseStats::new(&config.vol_noise_stats);
        let factory: EngineFactory = Arc::new(move || MomentsEngine::new(Arc::clone(&config)));
        Self::with_factory(factory, n_workers, noise_stats)
    }

    pub fn with_factory(
        factory: EngineFactory,
        n_workers: usize,
        noise_stats: VolumeNoiseStats,
    ) -> MomentsResult<Self> {
        if n_workers == 0 {
            return Err(MomentsError::Configuration(
                "worker pool needs at least one worker".into(),
            ));
        }
        let mut scheduler = Self {
            factory,
            idle: VecDeque::with_capacity(n_workers),
            busy: VecDeque::with_capacity(n_workers),
            next_worker_id: 0,
            next_index: 0,
            noise_stats,
            rays: Vec::new(),
            errors: Vec::new(),
            metrics: MetricsRecorder::new(),
        };
        for _ in 0..n_workers {
            let worker = scheduler.spawn_worker()?;
            scheduler.idle.push_back(worker);
        }
        log::info!("started {n_workers} moments workers");
        Ok(scheduler)
    }

    pub fn n_workers(&self) -> usize {
        self.idle.len() + self.busy.len()
    }

    pub fn in_flight(&self) -> usize {
        self.busy.len()
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.snapshot()
    }

    fn spawn_worker(&mut self) -> MomentsResult<Worker> {
        let id = self.next_worker_id;
        self.next_worker_id += 1;
        Worker::spawn(id, (self.factory)()?)
    }

    /// Hands `ray` to a worker, first collecting the oldest busy worker if
    /// none is idle.
    pub fn dispatch(
        &mut self,
        ray: CovarianceRay,
        calibration: Arc<Calibration>,
    ) -> MomentsResult<()> {
        if self.idle.is_empty() {
            self.collect_oldest()?;
        }
        let Some(mut worker) = self.idle.pop_front() else {
            return Err(MomentsError::Configuration("worker pool is empty".into()));
        };

        let index = self.next_index;
        self.next_index += 1;
        match worker.submit(WorkItem {
            index,
            ray,
            calibration,
        }) {
            Ok(()) => {
                self.busy.push_back(worker);
                self.metrics.record_in_flight(self.busy.len());
            }
            Err(error) => {
                log::error!("ray {index} lost: {error}");
                self.errors.push(RayError { index, error });
                self.metrics.record_dropped();
                let replacement = self.spawn_worker()?;
                self.idle.push_back(replacement);
            }
        }
        Ok(())
    }

    /// Collects the oldest busy worker and returns it to the idle queue.
    fn collect_oldest(&mut self) -> MomentsResult<()> {
        let Some(mut worker) = self.busy.pop_front() else {
            return Ok(());
        };
        let index = worker.in_flight;
        match worker.collect() {
            Some(reply) => {
                self.absorb(reply);
                self.idle.push_back(worker);
            }
            None => {
                let error = MomentsError::WorkerLost(worker.id);
                log::error!("{error}");
                if let Some(index) = index {
                    self.errors.push(RayError { index, error });
                }
                self.metrics.record_dropped();
                drop(worker);
                let replacement = self.spawn_worker()?;
                self.idle.push_back(replacement);
            }
        }
        Ok(())
    }

    fn absorb(&mut self, reply: WorkReply) {
        LogManager::flush(reply.logs);
        match reply.result {
            Ok(result) => {
                if let Some(noise) = &result.noise {
                    self.noise_stats.add(reply.elevation_deg, noise);
                }
                self.rays.push(result.ray);
                self.metrics.record_processed();
            }
            Err(error) => {
                self.errors.push(RayError {
                    index: reply.index,
                    error,
                });
                self.metrics.record_dropped();
            }
        }
    }

    fn drain(&mut self) -> MomentsResult<()> {
        while !self.busy.is_empty() {
            self.collect_oldest()?;
        }
        Ok(())
    }

    /// Collects every in-flight ray and hands over the volume. The pool
    /// stays usable for the next volume, with metrics counted afresh.
    pub fn finish_volume(&mut self) -> MomentsResult<VolumeOutput> {
        self.drain()?;
        let output = VolumeOutput {
            rays: std::mem::take(&mut self.rays),
            errors: std::mem::take(&mut self.errors),
            noise_means: self.noise_stats.means(),
            metrics: self.metrics.take(),
        };
        self.noise_stats.reset();
        self.next_index = 0;
        Ok(output)
    }
}

impl Drop for RayScheduler {
    fn drop(&mut self) {
        // replies of in-flight rays are discarded; workers join as they drop
        for mut worker in self.busy.drain(..) {
            if let Some(reply) = worker.collect() {
                LogManager::flush(reply.logs);
            }
        }
        self.idle.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolarizationMode;
    use crate::estimators::{
        AltHvInputs, DpSingleTxInputs, MomentEstimator, PulsePairEstimator, SimHvInputs,
        SinglePolInputs,
    };
    use crate::prelude::Channel;
    use crate::processing::{Capabilities, PerGateFields};
    use crate::ray_interface::RayContext;
    use crate::test_support::{calibration, dbz_outputs, single_pol_h_ray};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Pulse-pair estimator that sleeps a random time before every ray.
    struct JitterEstimator {
        inner: PulsePairEstimator,
        rng: StdRng,
    }

    impl MomentEstimator for JitterEstimator {
        fn init_ray(&mut self, context: &RayContext, calibration: &Calibration) {
            std::thread::sleep(Duration::from_micros(self.rng.gen_range(0..3000)));
            self.inner.init_ray(context, calibration);
        }
        fn set_estimated_noise_dbm(&mut self, channel: Channel, noise_dbm: f64) {
            self.inner.set_estimated_noise_dbm(channel, noise_dbm);
        }
        fn single_pol_h(&self, gate: usize, inputs: &SinglePolInputs, fields: &mut PerGateFields) {
            self.inner.single_pol_h(gate, inputs, fields);
        }
        fn single_pol_v(&self, gate: usize, inputs: &SinglePolInputs, fields: &mut PerGateFields) {
            self.inner.single_pol_v(gate, inputs, fields);
        }
        fn alt_hv_co_only(&self, gate: usize, inputs: &AltHvInputs, fields: &mut PerGateFields) {
            self.inner.alt_hv_co_only(gate, inputs, fields);
        }
        fn alt_hv_co_cross(&self, gate: usize, inputs: &AltHvInputs, fields: &mut PerGateFields) {
            self.inner.alt_hv_co_cross(gate, inputs, fields);
        }
        fn sim_hv(&self, gate: usize, inputs: &SimHvInputs, fields: &mut PerGateFields) {
            self.inner.sim_hv(gate, inputs, fields);
        }
        fn h_only(&self, gate: usize, inputs: &DpSingleTxInputs, fields: &mut PerGateFields) {
            self.inner.h_only(gate, inputs, fields);
        }
        fn v_only(&self, gate: usize, inputs: &DpSingleTxInputs, fields: &mut PerGateFields) {
            self.inner.v_only(gate, inputs, fields);
        }
        fn single_pol_h_noise_prep(&self, inputs: &SinglePolInputs, fields: &mut PerGateFields) {
            self.inner.single_pol_h_noise_prep(inputs, fields);
        }
        fn single_pol_v_noise_prep(&self, inputs: &SinglePolInputs, fields: &mut PerGateFields) {
            self.inner.single_pol_v_noise_prep(inputs, fields);
        }
        fn alt_hv_noise_prep(&self, inputs: &AltHvInputs, fields: &mut PerGateFields) {
            self.inner.alt_hv_noise_prep(inputs, fields);
        }
        fn sim_hv_noise_prep(&self, inputs: &SimHvInputs, fields: &mut PerGateFields) {
            self.inner.sim_hv_noise_prep(inputs, fields);
        }
        fn h_only_noise_prep(&self, inputs: &DpSingleTxInputs, fields: &mut PerGateFields) {
            self.inner.h_only_noise_prep(inputs, fields);
        }
        fn v_only_noise_prep(&self, inputs: &DpSingleTxInputs, fields: &mut PerGateFields) {
            self.inner.v_only_noise_prep(inputs, fields);
        }
    }

    fn config() -> Arc<MomentsConfig> {
        Arc::new(MomentsConfig::new(PolarizationMode::SinglePolH, dbz_outputs()))
    }

    fn jitter_scheduler(n_workers: usize) -> RayScheduler {
        let config = config();
        let seeds = Arc::new(AtomicU64::new(1));
        let stats = VolumeNoiseStats::new(&config.vol_noise_stats);
        let factory: EngineFactory = Arc::new(move || {
            let mut capabilities = Capabilities::reference(&config)?;
            capabilities.estimator = Box::new(JitterEstimator {
                inner: PulsePairEstimator::new(config.estimator.clone()),
                rng: StdRng::seed_from_u64(seeds.fetch_add(1, Ordering::SeqCst)),
            });
            MomentsEngine::with_capabilities(Arc::clone(&config), capabilities)
        });
        RayScheduler::with_factory(factory, n_workers, stats).unwrap()
    }

    fn ray(index: usize) -> CovarianceRay {
        let mut ray = single_pol_h_ray(12);
        ray.context.ray_index = index;
        ray.context.azimuth_deg = index as f64;
        ray
    }

    #[test]
    fn output_order_matches_dispatch_order_under_jitter() {
        for n_workers in [1, 2, 5] {
            let mut scheduler = jitter_scheduler(n_workers);
            let cal = Arc::new(calibration(1.0));
            for index in 0..40 {
                scheduler.dispatch(ray(index), Arc::clone(&cal)).unwrap();
                assert!(scheduler.in_flight() <= n_workers);
            }
            let output = scheduler.finish_volume().unwrap();
            assert!(output.errors.is_empty());
            let order: Vec<usize> = output.rays.iter().map(|r| r.context.ray_index).collect();
            assert_eq!(order, (0..40).collect::<Vec<_>>());
            assert_eq!(output.metrics.processed, 40);
            assert!(output.metrics.peak_in_flight <= n_workers);
            assert_eq!(output.metrics.peak_in_flight, n_workers);
        }
    }

    #[test]
    fn missing_field_drops_only_that_ray() {
        let mut scheduler = RayScheduler::new(config(), 3).unwrap();
        let cal = Arc::new(calibration(1.0));
        for index in 0..10 {
            let mut ray = ray(index);
            if index == 4 {
                ray.remove_field("LAG0_HC_DB");
            }
            scheduler.dispatch(ray, Arc::clone(&cal)).unwrap();
        }
        let output = scheduler.finish_volume().unwrap();
        assert_eq!(output.rays.len(), 9);
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].index, 4);
        assert!(matches!(output.errors[0].error, MomentsError::MissingField { .. }));
        assert!(output.rays.iter().all(|r| r.context.ray_index != 4));
        assert_eq!(output.metrics.dropped, 1);
    }

    #[test]
    fn metrics_count_each_volume_separately() {
        let mut scheduler = RayScheduler::new(config(), 2).unwrap();
        let cal = Arc::new(calibration(1.0));
        for index in 0..6 {
            scheduler.dispatch(ray(index), Arc::clone(&cal)).unwrap();
        }
        let first = scheduler.finish_volume().unwrap();
        assert_eq!(first.metrics.processed, 6);

        for index in 0..4 {
            let mut ray = ray(index);
            if index == 1 {
                ray.remove_field("LAG0_HC_DB");
            }
            scheduler.dispatch(ray, Arc::clone(&cal)).unwrap();
        }
        let second = scheduler.finish_volume().unwrap();
        assert_eq!(second.metrics.processed, 3);
        assert_eq!(second.metrics.dropped, 1);
        assert_eq!(second.rays.len(), 3);
    }

    #[test]
    fn zero_workers_is_a_configuration_error() {
        let err = RayScheduler::new(config(), 0).err();
        assert!(matches!(err, Some(MomentsError::Configuration(_))));
    }

    #[test]
    fn dropping_with_rays_in_flight_joins_cleanly() {
        let mut scheduler = jitter_scheduler(2);
        let cal = Arc::new(calibration(1.0));
        for index in 0..3 {
            scheduler.dispatch(ray(index), Arc::clone(&cal)).unwrap();
        }
        assert_eq!(scheduler.n_workers(), 2);
        drop(scheduler);
    }
}
