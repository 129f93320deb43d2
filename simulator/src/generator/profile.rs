use anyhow::{ensure, Context};
use cov2momcore::math::ComplexFieldDecoder;
use cov2momcore::ray_interface::{CovarianceFieldId, CovarianceRay, RayContext};
use num_complex::Complex64;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A single Gaussian rain cell along every ray.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StormProfile {
    /// Peak signal power at the receiver, dBm.
    pub peak_power_dbm: f64,
    pub center_km: f64,
    pub width_km: f64,
    pub velocity_mps: f64,
    pub spectrum_width_mps: f64,
    pub zdr_db: f64,
    pub ldr_db: f64,
    pub rhohv: f64,
    /// Specific differential phase inside the cell, deg/km.
    pub kdp_deg_per_km: f64,
}

impl Default for StormProfile {
    fn default() -> Self {
        Self {
            peak_power_dbm: -50.0,
            center_km: 40.0,
            width_km: 12.0,
            velocity_mps: 8.0,
            spectrum_width_mps: 1.5,
            zdr_db: 1.0,
            ldr_db: -25.0,
            rhohv: 0.98,
            kdp_deg_per_km: 0.8,
        }
    }
}

/// Configuration for generating a synthetic covariance volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub gate_count: usize,
    pub rays_per_sweep: usize,
    pub elevations_deg: Vec<f64>,
    pub start_range_km: f64,
    pub gate_spacing_km: f64,
    pub nyquist_mps: f64,
    pub wavelength_m: f64,
    pub pulse_width_us: f64,
    pub n_samples: usize,
    /// Receiver noise floor, dBm.
    pub noise_dbm: f64,
    pub system_phidp_deg: f64,
    pub seed: u64,
    pub storm: StormProfile,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            gate_count: 500,
            rays_per_sweep: 36,
            elevations_deg: vec![0.5, 1.5],
            start_range_km: 0.15,
            gate_spacing_km: 0.15,
            nyquist_mps: 26.0,
            wavelength_m: 0.1068,
            pulse_width_us: 1.0,
            n_samples: 64,
            noise_dbm: -77.0,
            system_phidp_deg: -60.0,
            seed: 0,
            storm: StormProfile::default(),
        }
    }
}

/// Expected second-order statistics of one gate.
#[derive(Debug, Clone, Copy)]
struct GateTruth {
    signal_h: f64,
    signal_v: f64,
    noise: f64,
    rho: f64,
    rhohv: f64,
    ldr: f64,
    /// Doppler phase shift per pulse, radians.
    doppler: f64,
    /// Differential phase, radians.
    phidp: f64,
}

impl GeneratorConfig {
    fn truth(&self, range_km: f64, phidp_deg: f64) -> GateTruth {
        let storm = &self.storm;
        let offset = (range_km - storm.center_km) / storm.width_km;
        let signal_dbm = storm.peak_power_dbm - 10.0 * offset * offset;
        let signal_h = ComplexFieldDecoder::power(signal_dbm);
        let normalized_width = storm.spectrum_width_mps / self.nyquist_mps;
        GateTruth {
            signal_h,
            signal_v: signal_h / ComplexFieldDecoder::power(storm.zdr_db),
            noise: ComplexFieldDecoder::power(self.noise_dbm),
            rho: (-2.0 * (PI * normalized_width).powi(2)).exp(),
            rhohv: storm.rhohv,
            ldr: ComplexFieldDecoder::power(storm.ldr_db),
            doppler: -PI * storm.velocity_mps / self.nyquist_mps,
            phidp: phidp_deg.to_radians(),
        }
    }

    fn context(&self, sweep_index: usize, ray_index: usize) -> RayContext {
        let rays = self.rays_per_sweep.max(1);
        RayContext {
            gate_count: self.gate_count,
            start_range_km: self.start_range_km,
            gate_spacing_km: self.gate_spacing_km,
            azimuth_deg: ray_index as f64 * 360.0 / rays as f64,
            elevation_deg: self.elevations_deg[sweep_index],
            time_secs: 1_700_000_000 + (sweep_index * rays + ray_index) as i64,
            nano_secs: 0,
            nyquist_mps: self.nyquist_mps,
            prt_sec: self.wavelength_m / (4.0 * self.nyquist_mps),
            n_samples: self.n_samples,
            pulse_width_us: self.pulse_width_us,
            wavelength_m: self.wavelength_m,
            radar_height_km: 0.5,
            meas_xmit_power_dbm_h: None,
            meas_xmit_power_dbm_v: None,
            sweep_index,
            ray_index,
        }
    }
}

/// Sample estimate of a correlation: the expected value plus an error
/// that shrinks with the number of pulses.
fn estimate(rng: &mut StdRng, expected: Complex64, power: f64, n_samples: usize) -> Complex64 {
    let spread = power / (n_samples.max(1) as f64).sqrt();
    let error = Complex64::from_polar(spread * rng.gen_range(0.0..1.0), rng.gen_range(-PI..PI));
    expected + error
}

/// Covariance fields for one gate, keyed by field id.
fn gate_fields(
    config: &GeneratorConfig,
    truth: &GateTruth,
    rng: &mut StdRng,
) -> Vec<(CovarianceFieldId, f64)> {
    use CovarianceFieldId::*;
    let n = config.n_samples;
    let t = truth;
    let hc = t.signal_h + t.noise;
    let vc = t.signal_v + t.noise;
    let hx = t.signal_v * t.ldr + t.noise;
    let vx = t.signal_h * t.ldr + t.noise;
    let sh = t.signal_h;
    let sv = t.signal_v;
    let shv = (sh * sv).sqrt();
    let doppler = |lag: i32| Complex64::from_polar(1.0, f64::from(lag) * t.doppler);
    let rho = |lag: i32| t.rho.powi(lag * lag);
    let phidp = Complex64::from_polar(1.0, t.phidp);

    let mut complexes = vec![
        (Lag1HcDb, estimate(rng, doppler(1) * sh * rho(1), hc, n)),
        (Lag2HcDb, estimate(rng, doppler(2) * sh * rho(2), hc, n)),
        (Lag3HcDb, estimate(rng, doppler(3) * sh * rho(3), hc, n)),
        (Lag1VcDb, estimate(rng, doppler(1) * sv * rho(1), vc, n)),
        (Lag2VcDb, estimate(rng, doppler(2) * sv * rho(2), vc, n)),
        (Lag3VcDb, estimate(rng, doppler(3) * sv * rho(3), vc, n)),
        (Rvvhh0Db, estimate(rng, phidp * shv * t.rhohv, (hc * vc).sqrt(), n)),
    ];
    // alternating transmit: consecutive pulses switch polarization
    let alt = doppler(1) * shv * t.rhohv * rho(1);
    complexes.push((Lag1VchcDb, estimate(rng, alt * phidp, (hc * vc).sqrt(), n)));
    complexes.push((Lag1HcvcDb, estimate(rng, alt * phidp.conj(), (hc * vc).sqrt(), n)));
    complexes.push((Lag0VchxDb, estimate(rng, phidp * shv * t.ldr, (vc * hx).sqrt(), n)));
    complexes.push((Lag0HcvxDb, estimate(rng, phidp * shv * t.ldr, (hc * vx).sqrt(), n)));
    let cross_lag1 = doppler(1) * shv * t.ldr * rho(1);
    complexes.push((Lag1VxhxDb, estimate(rng, cross_lag1, (hx * vx).sqrt(), n)));

    let mut values = vec![
        (Lag0HcDb, ComplexFieldDecoder::power_to_db(hc)),
        (Lag0VcDb, ComplexFieldDecoder::power_to_db(vc)),
        (Lag0HxDb, ComplexFieldDecoder::power_to_db(hx)),
        (Lag0VxDb, ComplexFieldDecoder::power_to_db(vx)),
    ];
    for (db_id, value) in complexes {
        let (db, phase) = ComplexFieldDecoder::complex_to_db_phase(value);
        values.push((db_id, db));
        values.push((phase_id(db_id), phase));
    }
    values
}

fn phase_id(db_id: CovarianceFieldId) -> CovarianceFieldId {
    use CovarianceFieldId::*;
    match db_id {
        Lag0HcvxDb => Lag0HcvxPhase,
        Lag0VchxDb => Lag0VchxPhase,
        Lag1HcDb => Lag1HcPhase,
        Lag1VcDb => Lag1VcPhase,
        Lag1HcvcDb => Lag1HcvcPhase,
        Lag1VchcDb => Lag1VchcPhase,
        Lag1VxhxDb => Lag1VxhxPhase,
        Lag2HcDb => Lag2HcPhase,
        Lag2VcDb => Lag2VcPhase,
        Lag3HcDb => Lag3HcPhase,
        Lag3VcDb => Lag3VcPhase,
        Rvvhh0Db => Rvvhh0Phase,
        other => other,
    }
}

/// Builds one ray carrying every covariance field under its default name.
fn build_ray(
    config: &GeneratorConfig,
    sweep_index: usize,
    ray_index: usize,
    rng: &mut StdRng,
) -> CovarianceRay {
    let context = config.context(sweep_index, ray_index);
    let mut columns: Vec<(CovarianceFieldId, Vec<f32>)> = CovarianceFieldId::ALL
        .iter()
        .map(|id| (*id, Vec::with_capacity(config.gate_count)))
        .collect();

    let mut phidp_deg = config.system_phidp_deg;
    for gate in 0..config.gate_count {
        let range_km = context.range_km(gate);
        if (range_km - config.storm.center_km).abs() < config.storm.width_km {
            phidp_deg += 2.0 * config.storm.kdp_deg_per_km * config.gate_spacing_km;
        }
        let truth = config.truth(range_km, phidp_deg);
        for (id, value) in gate_fields(config, &truth, rng) {
            if let Some((_, column)) = columns.iter_mut().find(|(column_id, _)| *column_id == id) {
                column.push(value as f32);
            }
        }
    }

    let mut ray = CovarianceRay::new(context);
    for (id, column) in columns {
        ray.add_field(id.as_str(), column);
    }
    ray
}

/// Synthesizes a full volume, sweep by sweep.
pub fn build_volume(config: &GeneratorConfig) -> anyhow::Result<Vec<CovarianceRay>> {
    ensure!(config.gate_count > 0, "generator needs at least one gate");
    ensure!(!config.elevations_deg.is_empty(), "generator needs at least one elevation");
    let ray_count = config
        .rays_per_sweep
        .checked_mul(config.elevations_deg.len())
        .context("overflow computing ray count for generator")?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut rays = Vec::with_capacity(ray_count);
    for sweep_index in 0..config.elevations_deg.len() {
        for ray_index in 0..config.rays_per_sweep {
            rays.push(build_ray(config, sweep_index, ray_index, &mut rng));
        }
    }
    Ok(rays)
}
