use super::{NoiseLocation, NoiseLocator};
use crate::config::{NoiseConfig, NoiseMethod};
use crate::math::complex::{arg_deg, conjugate_product};
use crate::math::{InterestMap, StatsHelper};
use crate::prelude::{Channel, ChannelValues, MomentsResult};
use crate::processing::PerGateFields;
use crate::ray_interface::{Calibration, RayContext};

/// Median over a fixed number of noise gates, carried across rays.
#[derive(Debug, Clone, Default)]
struct RunningMedian {
    values: Vec<f64>,
    capacity: usize,
    latest: Option<f64>,
}

impl RunningMedian {
    fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
            latest: None,
        }
    }

    fn push(&mut self, value: f64) {
        self.values.push(value);
        if self.values.len() >= self.capacity {
            self.latest = StatsHelper::median(&self.values);
            self.values.clear();
        }
    }
}

fn channel_index(channel: Channel) -> usize {
    match channel {
        Channel::Hc => 0,
        Channel::Hx => 1,
        Channel::Vc => 2,
        Channel::Vx => 3,
    }
}

/// Noise locator driven by fuzzy interest maps on phase-change error,
/// power standard deviation and NCP.
pub struct InterestNoiseLocator {
    config: NoiseConfig,
    phase_change_error_for_noise: InterestMap,
    dbm_sdev_for_noise: InterestMap,
    ncp_mean_for_noise: InterestMap,
    phase_change_error_for_signal: InterestMap,
    dbm_sdev_for_signal: InterestMap,
    cal_noise_dbm: ChannelValues<f64>,
    running: [RunningMedian; 4],
    location: NoiseLocation,
    samples: Vec<f64>,
}

impl InterestNoiseLocator {
    pub fn new(config: &NoiseConfig) -> MomentsResult<Self> {
        let capacity = config.ngates_for_running_median;
        Ok(Self {
            phase_change_error_for_noise: InterestMap::new(
                "phase_change_error_for_noise",
                &config.phase_change_error_for_noise,
            )?,
            dbm_sdev_for_noise: InterestMap::new("dbm_sdev_for_noise", &config.dbm_sdev_for_noise)?,
            ncp_mean_for_noise: InterestMap::new("ncp_mean_for_noise", &config.ncp_mean_for_noise)?,
            phase_change_error_for_signal: InterestMap::new(
                "phase_change_error_for_signal",
                &config.phase_change_error_for_signal,
            )?,
            dbm_sdev_for_signal: InterestMap::new(
                "dbm_sdev_for_signal",
                &config.dbm_sdev_for_signal,
            )?,
            config: config.clone(),
            cal_noise_dbm: ChannelValues::splat(0.0),
            running: [
                RunningMedian::new(capacity),
                RunningMedian::new(capacity),
                RunningMedian::new(capacity),
                RunningMedian::new(capacity),
            ],
            location: NoiseLocation::default(),
            samples: Vec::new(),
        })
    }

    fn accumulate_phase(&mut self, fields: &[PerGateFields]) {
        let phase = |gate: usize| fields[gate].phase_for_noise.unwrap_or_default();
        let mut sum = arg_deg(phase(0));
        self.location.accum_phase_change[0] = Some(sum);
        for gate in 1..fields.len() {
            sum += arg_deg(conjugate_product(phase(gate), phase(gate - 1)));
            self.location.accum_phase_change[gate] = Some(sum);
        }
    }

    /// Mean absolute departure of the accumulated phase from the straight
    /// line joining the window ends.
    fn phase_change_error(&self, start: usize, end: usize) -> Option<f64> {
        if end < start + 2 {
            return None;
        }
        let accum = &self.location.accum_phase_change;
        let phase_start = accum[start]?;
        let slope = (accum[end]? - phase_start) / (end - start) as f64;
        let mut sum_abs_error = 0.0;
        for (step, gate) in (start + 1..end).enumerate() {
            let linear = phase_start + slope * (step + 1) as f64;
            sum_abs_error += (accum[gate]? - linear).abs();
        }
        Some(sum_abs_error / (end - start - 1) as f64)
    }

    fn weighted_interest(terms: &[(Option<f64>, &InterestMap)]) -> Option<f64> {
        let mut sum = 0.0;
        let mut sum_weights = 0.0;
        for (value, map) in terms {
            if let Some(interest) = value.and_then(|value| map.interest(value)) {
                sum += interest * map.weight();
                sum_weights += map.weight();
            }
        }
        if sum_weights > 0.0 {
            Some(sum / sum_weights)
        } else {
            None
        }
    }

    fn classify(&mut self, fields: &[PerGateFields]) -> (Vec<bool>, Vec<bool>) {
        let n_gates = fields.len();
        let half = self.config.ngates_kernel / 2;
        let kernel = half * 2 + 1;
        let mut noise = vec![false; n_gates];
        let mut signal = vec![false; n_gates];
        if n_gates < kernel {
            return (noise, signal);
        }

        for gate in 0..n_gates {
            let start = gate.saturating_sub(half).min(n_gates - kernel);
            let end = start + kernel - 1;

            let pce = self.phase_change_error(start, end);
            self.samples.clear();
            self.samples
                .extend(fields[start..=end].iter().filter_map(|f| f.dbm_for_noise));
            let dbm_sdev = StatsHelper::sdev(&self.samples);
            self.samples.clear();
            self.samples
                .extend(fields[start..=end].iter().filter_map(|f| f.ncp));
            let ncp_mean = StatsHelper::mean(&self.samples);

            self.location.phase_change_error[gate] = pce;
            self.location.dbm_sdev[gate] = dbm_sdev;
            self.location.ncp_mean[gate] = ncp_mean;

            let noise_interest = Self::weighted_interest(&[
                (pce, &self.phase_change_error_for_noise),
                (dbm_sdev, &self.dbm_sdev_for_noise),
                (ncp_mean, &self.ncp_mean_for_noise),
            ]);
            let signal_interest = Self::weighted_interest(&[
                (pce, &self.phase_change_error_for_signal),
                (dbm_sdev, &self.dbm_sdev_for_signal),
            ]);
            noise[gate] =
                noise_interest.map_or(false, |v| v > self.config.interest_threshold_for_noise);
            signal[gate] =
                signal_interest.map_or(false, |v| v <= self.config.interest_threshold_for_signal);
        }

        // single gates take the state of their neighbours
        for gate in 1..n_gates - 1 {
            if noise[gate - 1] && noise[gate + 1] {
                noise[gate] = true;
            }
        }
        for gate in 1..n_gates - 1 {
            if !noise[gate - 1] && !noise[gate + 1] {
                noise[gate] = false;
            }
        }
        for gate in 1..n_gates - 1 {
            if !signal[gate - 1] && !signal[gate + 1] {
                signal[gate] = false;
            }
        }
        (noise, signal)
    }

    fn resolve_median(&mut self, channel: Channel, noise: &[bool], fields: &[PerGateFields]) -> Option<f64> {
        self.samples.clear();
        self.samples.extend(
            fields
                .iter()
                .zip(noise)
                .filter(|(_, is_noise)| **is_noise)
                .filter_map(|(f, _)| f.lag0_db(channel)),
        );
        match self.config.method {
            NoiseMethod::RayMedian => {
                if self.samples.len() >= self.config.min_ngates_for_ray_median {
                    StatsHelper::median(&self.samples)
                } else {
                    None
                }
            }
            NoiseMethod::RunningMedian => {
                let running = &mut self.running[channel_index(channel)];
                for value in &self.samples {
                    running.push(*value);
                }
                running.latest
            }
        }
    }
}

impl NoiseLocator for InterestNoiseLocator {
    fn set_ray_props(&mut self, _context: &RayContext, calibration: &Calibration) {
        self.cal_noise_dbm = calibration.noise_dbm;
    }

    fn locate(&mut self, channels: &[Channel], fields: &[PerGateFields]) -> &NoiseLocation {
        let n_gates = fields.len();
        self.location.reset(n_gates);
        if n_gates == 0 {
            return &self.location;
        }
        self.accumulate_phase(fields);

        let (noise, signal) = self.classify(fields);
        for gate in 0..n_gates {
            self.location.noise_flag[gate] = Some(noise[gate]);
            self.location.signal_flag[gate] = Some(signal[gate]);
        }

        for &channel in channels {
            let median = self.resolve_median(channel, &noise, fields);
            self.location.median_noise_dbm.set(channel, median);
        }

        let cal = self.cal_noise_dbm;
        if self.config.equal_bias_in_all_channels && channels.contains(&Channel::Hc) {
            let bias_hc = self
                .location
                .median_noise_dbm
                .hc
                .map(|median| median - cal.hc);
            for &channel in channels {
                self.location
                    .noise_bias_db
                    .set(channel, Some(bias_hc.unwrap_or(0.0)));
                self.location
                    .median_noise_dbm
                    .set(channel, bias_hc.map(|bias| cal.get(channel) + bias));
            }
        } else {
            for &channel in channels {
                // an unresolved channel falls back to the calibrated noise
                let bias = self
                    .location
                    .median_noise_dbm
                    .get(channel)
                    .map_or(0.0, |median| median - cal.get(channel));
                self.location.noise_bias_db.set(channel, Some(bias));
            }
        }
        &self.location
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{calibration, context};
    use num_complex::Complex64;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise_gates(n: usize, dbm: f64, rng: &mut StdRng) -> Vec<PerGateFields> {
        (0..n)
            .map(|_| {
                let db = dbm + rng.gen_range(-0.05..0.05);
                PerGateFields {
                    lag0_hc_db: Some(db),
                    lag0_vc_db: Some(db - 0.5),
                    dbm_for_noise: Some(db),
                    phase_for_noise: Some(Complex64::from_polar(
                        1.0e-8,
                        rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI),
                    )),
                    ncp: Some(0.05),
                    ..Default::default()
                }
            })
            .collect()
    }

    fn signal_gates(n: usize) -> Vec<PerGateFields> {
        (0..n)
            .map(|gate| {
                let db = if gate % 2 == 0 { -40.0 } else { -45.0 };
                PerGateFields {
                    lag0_hc_db: Some(db),
                    dbm_for_noise: Some(db),
                    phase_for_noise: Some(Complex64::from_polar(
                        1.0e-4,
                        (gate as f64 * 20.0).to_radians(),
                    )),
                    ncp: Some(0.9),
                    ..Default::default()
                }
            })
            .collect()
    }

    fn locator(config: &NoiseConfig) -> InterestNoiseLocator {
        let mut locator = InterestNoiseLocator::new(config).unwrap();
        locator.set_ray_props(&context(100), &calibration(1.0));
        locator
    }

    #[test]
    fn random_phase_gates_are_noise_and_yield_a_median() {
        let mut rng = StdRng::seed_from_u64(7);
        let fields = noise_gates(100, -80.0, &mut rng);
        let mut locator = locator(&NoiseConfig::default());
        let location = locator.locate(&[Channel::Hc], &fields);
        let n_noise = location.noise_flag.iter().filter(|f| **f == Some(true)).count();
        assert!(n_noise >= 80, "only {n_noise} noise gates");
        let median = location.median_noise_dbm.hc.unwrap();
        assert!((median + 80.0).abs() < 0.1);
        let bias = location.noise_bias_db.hc.unwrap();
        assert!((bias - (median + 77.0)).abs() < 1e-9);
        assert!(location.median_noise_dbm.vc.is_none());
    }

    #[test]
    fn coherent_gates_are_signal() {
        let fields = signal_gates(60);
        let mut locator = locator(&NoiseConfig::default());
        let location = locator.locate(&[Channel::Hc], &fields);
        assert!(location.noise_flag.iter().all(|f| *f == Some(false)));
        assert!(location.signal_flag.iter().all(|f| *f == Some(true)));
        assert!(location.median_noise_dbm.hc.is_none());
        assert_eq!(location.noise_bias_db.hc, Some(0.0));
        for pce in &location.phase_change_error {
            assert!(pce.unwrap() < 1e-6);
        }
    }

    #[test]
    fn ray_shorter_than_kernel_keeps_stats_missing() {
        let fields = signal_gates(5);
        let mut locator = locator(&NoiseConfig::default());
        let location = locator.locate(&[Channel::Hc], &fields);
        assert!(location.phase_change_error.iter().all(Option::is_none));
        assert!(location.noise_flag.iter().all(|f| *f == Some(false)));
        assert!(location.accum_phase_change.iter().all(Option::is_some));
    }

    #[test]
    fn running_median_persists_across_rays() {
        let config = NoiseConfig {
            method: NoiseMethod::RunningMedian,
            ngates_for_running_median: 20,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let mut locator = locator(&config);
        let noise = noise_gates(100, -82.0, &mut rng);
        let first = locator.locate(&[Channel::Hc], &noise).median_noise_dbm.hc;
        assert!((first.unwrap() + 82.0).abs() < 0.1);

        let second = locator
            .locate(&[Channel::Hc], &signal_gates(40))
            .median_noise_dbm
            .hc;
        assert_eq!(first, second);
    }

    #[test]
    fn equal_bias_copies_the_hc_bias() {
        let config = NoiseConfig {
            equal_bias_in_all_channels: true,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let fields = noise_gates(100, -79.0, &mut rng);
        let mut locator = locator(&config);
        let location = locator.locate(&[Channel::Hc, Channel::Vc], &fields);
        assert_eq!(location.noise_bias_db.hc, location.noise_bias_db.vc);
        let bias = location.noise_bias_db.hc.unwrap();
        let vc = location.median_noise_dbm.vc.unwrap();
        assert!((vc - (-77.0 + bias)).abs() < 1e-9);
    }
}
