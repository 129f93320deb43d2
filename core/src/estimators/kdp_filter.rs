use std::f64::consts::PI;

use ndarray::Array1;

use super::{KdpFilter, KdpInputs, KdpOutput};
use crate::config::{AttenuationCoefficients, AttenuationCorrection, KdpConfig};
use crate::math::StatsHelper;
use crate::ray_interface::RayContext;

const KDP_ZZDR_MEDIAN_LEN: usize = 5;
const MAX_KDP_FOR_ATTENUATION: f64 = 20.0;
const MIN_SELF_CONSISTENCY_SUM: f64 = 0.5;

/// Phidp as a point on the unit circle, with window statistics.
#[derive(Debug, Clone, Copy, Default)]
struct GateState {
    present: bool,
    xx: f64,
    yy: f64,
    dist_from_prev: f64,
    mean_xx: f64,
    mean_yy: f64,
}

/// Inclusive range of gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    begin: usize,
    end: usize,
}

impl Run {
    fn len(&self) -> usize {
        self.end + 1 - self.begin
    }
}

/// KDP from FIR-filtered, unfolded phidp.
///
/// Phidp is unfolded using circular window statistics, smoothed with a
/// normalized Hamming FIR filter, conditioned to remove backscatter phase
/// bumps and differentiated over a reflectivity-dependent range interval.
pub struct FirKdpFilter {
    config: KdpConfig,
    taps: Vec<f64>,
    states: Vec<GateState>,
    output: KdpOutput,
}

impl FirKdpFilter {
    pub fn new(config: &KdpConfig) -> Self {
        Self {
            taps: hamming_taps(config.fir_length.taps() + 1),
            config: config.clone(),
            states: Vec::new(),
            output: KdpOutput::default(),
        }
    }

    fn stats_half(&self) -> usize {
        self.config.ngates_stats / 2
    }

    fn snr_ok(&self, snr: f64) -> bool {
        snr >= self.config.snr_threshold_db
    }

    fn reset_output(&mut self, snr: &Array1<f64>) {
        let n_gates = snr.len();
        let missing = || Array1::from_elem(n_gates, f64::NAN);
        let zero_or_missing: Array1<f64> = snr.mapv(|snr| if self.snr_ok(snr) { 0.0 } else { f64::NAN });
        self.output = KdpOutput {
            kdp: zero_or_missing.clone(),
            phidp_cond: missing(),
            phidp_filt: missing(),
            phidp_sdev: missing(),
            phidp_jitter: missing(),
            zdr_sdev: missing(),
            psob: zero_or_missing,
            dbz_atten_correction: missing(),
            zdr_atten_correction: missing(),
        };
    }

    /// Folds at ±90 when every phidp lies inside that interval, otherwise
    /// at ±180. Data on [0, 360) is shifted down.
    fn folding(phidp: &mut Array1<f64>) -> (bool, f64) {
        let (min, max) = phidp
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        let folds_at_90 = min > -90.0 && max < 90.0;
        if min >= 0.0 && max > 180.0 {
            phidp.mapv_inplace(|v| v - 180.0);
        }
        let fold_range = if folds_at_90 { 180.0 } else { 360.0 };
        (folds_at_90, fold_range)
    }

    fn init_states(&mut self, phidp: &Array1<f64>, folds_at_90: bool) {
        let n_gates = phidp.len();
        self.states.clear();
        self.states.resize(n_gates, GateState::default());
        for (state, phase) in self.states.iter_mut().zip(phidp.iter()) {
            if phase.is_finite() {
                let phase = if folds_at_90 { phase * 2.0 } else { *phase };
                let (sin, cos) = phase.to_radians().sin_cos();
                *state = GateState {
                    present: true,
                    xx: cos,
                    yy: sin,
                    ..GateState::default()
                };
            }
        }
        for gate in 1..n_gates {
            let (prev, this) = (self.states[gate - 1], self.states[gate]);
            if prev.present && this.present {
                self.states[gate].dist_from_prev = (this.xx - prev.xx).hypot(this.yy - prev.yy);
            }
        }
    }

    /// Circular mean, jitter and spread of phidp around `gate`.
    fn phidp_stats(&mut self, gate: usize, folds_at_90: bool) -> Option<f64> {
        let half = self.stats_half();
        let scale = if folds_at_90 { 0.5 } else { 1.0 };
        let range = window(gate, half, self.states.len());
        let (mut count, mut sum_xx, mut sum_yy, mut sum_dist, mut sum_dist_sq) =
            (0usize, 0.0, 0.0, 0.0, 0.0);
        for state in self.states[range].iter().filter(|s| s.present) {
            sum_xx += state.xx;
            sum_yy += state.yy;
            sum_dist += state.dist_from_prev;
            sum_dist_sq += state.dist_from_prev * state.dist_from_prev;
            count += 1;
        }
        if count <= half {
            return None;
        }
        let count_f = count as f64;
        let state = &mut self.states[gate];
        state.mean_xx = sum_xx / count_f;
        state.mean_yy = sum_yy / count_f;
        let mean = state.mean_yy.atan2(state.mean_xx).to_degrees() * scale;

        let mean_dist = sum_dist / count_f;
        self.output.phidp_jitter[gate] = mean_dist.to_degrees() * scale;
        if count > 2 {
            let variance = sum_dist_sq / count_f - mean_dist * mean_dist;
            if variance >= 0.0 {
                self.output.phidp_sdev[gate] = variance.sqrt().to_degrees() * scale;
            }
        }
        Some(mean)
    }

    fn zdr_sdev(&self, gate: usize, zdr: &Array1<f64>) -> f64 {
        let half = self.stats_half();
        let values: Vec<f64> = zdr
            .slice(ndarray::s![window(gate, half, zdr.len())])
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        if values.len() <= half {
            return f64::NAN;
        }
        StatsHelper::sdev(&values).unwrap_or(f64::NAN)
    }

    fn is_gate_valid(&self, gate: usize, mean: f64, inputs: &KdpInputs) -> bool {
        let out = &self.output;
        mean.is_finite()
            && self.snr_ok(inputs.snr[gate])
            && !exceeds(out.phidp_sdev[gate], self.config.phidp_sdev_max)
            && !exceeds(out.phidp_jitter[gate], self.config.phidp_jitter_max)
            && !(self.config.check_zdr_sdev && exceeds(out.zdr_sdev[gate], self.config.zdr_sdev_max))
            && !exceeds(self.config.rhohv_threshold, inputs.rhohv[gate])
    }

    /// Runs of valid gates long enough to filter, trimmed at each end.
    fn valid_runs(&self, valid: &[bool]) -> Vec<Run> {
        let stats = self.config.ngates_stats;
        let half = self.stats_half();
        let n_gates = valid.len();

        let mut runs: Vec<Run> = Vec::new();
        let mut run_len = 0;
        for (gate, is_valid) in valid.iter().enumerate() {
            if *is_valid {
                run_len += 1;
                if gate == n_gates - 1 && run_len > stats {
                    runs.push(Run { begin: gate + 1 - run_len, end: gate });
                }
            } else {
                if run_len > stats {
                    runs.push(Run { begin: gate - run_len, end: gate - 1 });
                }
                run_len = 0;
            }
        }

        let mut combined: Vec<Run> = Vec::with_capacity(runs.len());
        for run in runs {
            match combined.last_mut() {
                Some(last) if run.begin - last.end - 1 <= half => last.end = run.end,
                _ => combined.push(run),
            }
        }

        combined
            .into_iter()
            .filter(|run| run.len() >= stats * 2)
            .map(|run| Run {
                begin: run.begin + half,
                end: run.end - half,
            })
            .collect()
    }

    /// Unfolded mean phidp over the whole ray.
    fn unfold_mean(&mut self, mean: &Array1<f64>, runs: &[Run], fold_range: f64) -> Array1<f64> {
        let n_gates = mean.len();
        let gaps: Vec<Run> = runs
            .windows(2)
            .map(|pair| Run {
                begin: pair[0].end + 1,
                end: pair[1].begin - 1,
            })
            .collect();

        let mut mean_valid = mean.clone();
        for gap in &gaps {
            let mid = (gap.begin + gap.end) / 2;
            for gate in gap.begin..mid {
                mean_valid[gate] = mean_valid[gap.begin - 1];
                self.states[gate] = self.states[gap.begin - 1];
            }
            for gate in mid..=gap.end {
                mean_valid[gate] = mean_valid[gap.end + 1];
                self.states[gate] = self.states[gap.end + 1];
            }
        }

        let first = runs[0].begin + 2;
        let last = runs[runs.len() - 1].end - 2;
        let mut unfolded = Array1::from_elem(n_gates, f64::NAN);
        let mut sum_fold = 0.0;
        for gate in first..=last {
            let (prev, this) = (self.states[gate - 1], self.states[gate]);
            if prev.mean_xx < 0.0 && this.mean_xx < 0.0 {
                if prev.mean_yy < 0.0 && this.mean_yy > 0.0 {
                    sum_fold -= 1.0;
                } else if prev.mean_yy > 0.0 && this.mean_yy < 0.0 {
                    sum_fold += 1.0;
                }
            }
            unfolded[gate] = mean_valid[gate] + sum_fold * fold_range;
        }

        for gap in &gaps {
            let before = unfolded[gap.begin - 1];
            let delta = (unfolded[gap.end + 1] - before) / gap.len() as f64;
            for (step, gate) in (gap.begin..=gap.end).enumerate() {
                unfolded[gate] = before + delta * (step + 1) as f64;
            }
        }

        // merged runs can hold the odd gate without a mean
        let mut prev = unfolded[first];
        for gate in first..=last {
            if unfolded[gate].is_finite() {
                prev = unfolded[gate];
            } else {
                unfolded[gate] = prev;
            }
        }
        for gate in 0..first {
            unfolded[gate] = unfolded[first];
        }
        for gate in last + 1..n_gates {
            unfolded[gate] = unfolded[last];
        }
        unfolded
    }

    fn apply_fir(&self, input: &Array1<f64>) -> Array1<f64> {
        let n_gates = input.len() as isize;
        let half = (self.taps.len() / 2) as isize;
        Array1::from_shape_fn(input.len(), |gate| {
            self.taps
                .iter()
                .enumerate()
                .map(|(tap, coeff)| {
                    let index = (gate as isize - half + tap as isize).clamp(0, n_gates - 1);
                    coeff * input[index as usize]
                })
                .sum()
        })
    }

    fn filter_iterations(&self, input: &Array1<f64>, iterations: usize) -> Array1<f64> {
        let mut work = input.clone();
        for _ in 0..iterations {
            work = self.apply_fir(&work);
        }
        work
    }

    /// Filtered phidp with backscatter phase bumps removed.
    fn conditioned(&self, filt: &Array1<f64>, runs: &[Run]) -> Array1<f64> {
        let iterations = self.config.n_filt_iterations_conditioned;
        if self.config.use_iterative_filtering {
            let mut work = filt.clone();
            for _ in 0..iterations {
                let smoothed = self.apply_fir(&work);
                for ((work, smoothed), original) in
                    work.iter_mut().zip(smoothed.iter()).zip(filt.iter())
                {
                    *work = if (smoothed - *work).abs() < self.config.phidp_difference_threshold {
                        *original
                    } else {
                        *smoothed
                    };
                }
            }
            work
        } else {
            self.filter_iterations(&remove_bumps(filt, runs), iterations)
        }
    }

    fn load_kdp(&mut self, context: &RayContext, inputs: &KdpInputs, cond: &Array1<f64>, valid: &[bool]) {
        let n_gates = cond.len();
        let half = self.stats_half();
        for gate in 0..n_gates {
            if !self.snr_ok(inputs.snr[gate]) {
                continue;
            }
            let dbz_max = inputs
                .dbz
                .slice(ndarray::s![window(gate, half, n_gates)])
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .fold(f64::NAN, f64::max);
            let adaptive_len = if dbz_max.is_nan() || dbz_max < 20.0 {
                8
            } else if dbz_max < 35.0 {
                4
            } else {
                2
            };
            let i0 = gate.saturating_sub(adaptive_len);
            let i1 = (gate + adaptive_len).min(n_gates - 1);
            let len = i1 - i0;
            let mut kdp = if len < 1 {
                0.0
            } else {
                (cond[i1] - cond[i0]) / (context.gate_spacing_km * len as f64) / 2.0
            };
            if !valid[gate] || kdp.abs() < self.config.min_valid_abs_kdp {
                kdp = 0.0;
            }
            self.output.kdp[gate] = kdp;
        }
    }

    /// Measured KDP rescaled to follow the Z/ZDR estimate within each
    /// positive-KDP run.
    fn self_consistent_kdp(&self, context: &RayContext, inputs: &KdpInputs) -> Array1<f64> {
        let wavelength_cm = context.wavelength_m * 100.0;
        let dbz = median_filter(&inputs.dbz, KDP_ZZDR_MEDIAN_LEN);
        let zdr = median_filter(&inputs.zdr, KDP_ZZDR_MEDIAN_LEN);
        let kdp = &self.output.kdp;
        let kdp_zzdr = Array1::from_shape_fn(kdp.len(), |gate| {
            if kdp[gate].is_finite() {
                kdp_from_z_zdr(dbz[gate], zdr[gate], wavelength_cm)
            } else {
                f64::NAN
            }
        });

        let mut kdp_sc = kdp.mapv(|v| if v.is_finite() { 0.0 } else { f64::NAN });
        let mut run_start: Option<usize> = None;
        for gate in 0..=kdp.len() {
            let positive = gate < kdp.len()
                && kdp[gate] > self.config.kdp_min_for_self_consistency
                && kdp_zzdr[gate].is_finite();
            match (positive, run_start) {
                (true, None) => run_start = Some(gate),
                (false, Some(start)) => {
                    let end = gate - 1;
                    if end - start >= 3 {
                        let sum_kdp: f64 = kdp.slice(ndarray::s![start..=end]).sum();
                        let sum_zzdr: f64 = kdp_zzdr.slice(ndarray::s![start..=end]).sum();
                        if sum_zzdr >= MIN_SELF_CONSISTENCY_SUM {
                            let factor = sum_kdp / sum_zzdr;
                            for g in start..=end {
                                kdp_sc[g] = kdp_zzdr[g] * factor;
                            }
                        }
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
        kdp_sc
    }

    fn attenuation(
        &mut self,
        context: &RayContext,
        inputs: &KdpInputs,
        valid: &[bool],
    ) {
        let (coefficients, use_self_consistency) = match self.config.attenuation {
            AttenuationCorrection::None => return,
            AttenuationCorrection::Kdp { coefficients } => (coefficients, false),
            AttenuationCorrection::SelfConsistency { coefficients } => (coefficients, true),
        };
        let coeffs = coefficients.unwrap_or_else(|| {
            AttenuationCoefficients::for_wavelength_cm(context.wavelength_m * 100.0)
        });
        let source = if use_self_consistency {
            self.self_consistent_kdp(context, inputs)
        } else {
            self.output.kdp.clone()
        };

        let (mut sum_dbz, mut sum_zdr) = (0.0, 0.0);
        for gate in 0..source.len() {
            let kdp = source[gate].min(MAX_KDP_FOR_ATTENUATION);
            if valid[gate] && kdp > 0.0 {
                sum_dbz += coeffs.dbz_coeff * kdp.powf(coeffs.dbz_expon) * context.gate_spacing_km;
                sum_zdr += coeffs.zdr_coeff * kdp.powf(coeffs.zdr_expon) * context.gate_spacing_km;
            }
            self.output.dbz_atten_correction[gate] = sum_dbz;
            self.output.zdr_atten_correction[gate] = sum_zdr;
        }
    }
}

impl KdpFilter for FirKdpFilter {
    fn compute(&mut self, context: &RayContext, inputs: &KdpInputs) -> &KdpOutput {
        let n_gates = inputs.phidp.len();
        self.reset_output(&inputs.snr);
        if n_gates == 0 {
            return &self.output;
        }

        let mut phidp = inputs.phidp.clone();
        let (folds_at_90, fold_range) = Self::folding(&mut phidp);
        self.init_states(&phidp, folds_at_90);

        let half = self.stats_half();
        let mut mean = Array1::from_elem(n_gates, f64::NAN);
        for gate in half..n_gates.saturating_sub(half) {
            if let Some(gate_mean) = self.phidp_stats(gate, folds_at_90) {
                mean[gate] = gate_mean;
            }
            self.output.zdr_sdev[gate] = self.zdr_sdev(gate, &inputs.zdr);
        }

        let valid_gates: Vec<bool> = (0..n_gates)
            .map(|gate| self.is_gate_valid(gate, mean[gate], inputs))
            .collect();
        let runs = self.valid_runs(&valid_gates);
        let Some((first, last)) = runs.first().zip(runs.last()) else {
            return &self.output;
        };
        if first.begin + 2 > last.end.saturating_sub(2) {
            return &self.output;
        }

        let mut valid_for_kdp = vec![false; n_gates];
        for run in &runs {
            valid_for_kdp[run.begin..=run.end].fill(true);
        }
        for pair in runs.windows(2) {
            let gap = Run {
                begin: pair[0].end + 1,
                end: pair[1].begin - 1,
            };
            if pair[0].len() > gap.len() && pair[1].len() > gap.len() {
                valid_for_kdp[gap.begin..=gap.end].fill(true);
            }
        }

        let unfolded = self.unfold_mean(&mean, &runs, fold_range);
        let filt = self.filter_iterations(&unfolded, self.config.n_filt_iterations_unfolded);
        let cond = self.conditioned(&filt, &runs);

        self.load_kdp(context, inputs, &cond, &valid_for_kdp);
        for gate in 0..n_gates {
            let psob = filt[gate] - cond[gate];
            if valid_for_kdp[gate] && psob > 0.0 {
                self.output.psob[gate] = psob;
            }
        }
        self.output.phidp_filt = filt;
        self.output.phidp_cond = cond;

        self.attenuation(context, inputs, &valid_for_kdp);
        &self.output
    }
}

/// False when either side is missing.
fn exceeds(value: f64, limit: f64) -> bool {
    value > limit
}

/// Gate range of the stats window centred on `gate`, clipped to the ray.
fn window(gate: usize, half: usize, n_gates: usize) -> std::ops::Range<usize> {
    gate.saturating_sub(half)..(gate + half + 1).min(n_gates)
}

/// Normalized Hamming window.
fn hamming_taps(len: usize) -> Vec<f64> {
    if len < 2 {
        return vec![1.0; len];
    }
    let taps: Vec<f64> = (0..len)
        .map(|k| 0.54 - 0.46 * (2.0 * PI * k as f64 / (len - 1) as f64).cos())
        .collect();
    let sum: f64 = taps.iter().sum();
    taps.into_iter().map(|t| t / sum).collect()
}

/// Flattens each fall-and-recover of filtered phidp to the level at
/// which it recovers.
fn remove_bumps(filt: &Array1<f64>, runs: &[Run]) -> Array1<f64> {
    let mut cond = filt.clone();
    for run in runs {
        let mut increasing = false;
        let mut decreasing = false;
        let mut prev_diff = 0.0;
        let mut top: Option<usize> = None;
        let mut bumps: Vec<(usize, usize)> = Vec::new();
        for gate in run.begin + 1..=run.end {
            let diff = filt[gate] - filt[gate - 1];
            if diff > 0.0 && prev_diff > 0.0 {
                if !increasing {
                    increasing = true;
                    if let Some(top) = top {
                        bumps.push((top, gate - 2));
                    }
                }
            } else {
                increasing = false;
            }
            if diff < 0.0 && prev_diff < 0.0 {
                if !decreasing {
                    decreasing = true;
                    top = Some(gate - 2);
                }
            } else {
                decreasing = false;
            }
            prev_diff = diff;
        }

        let mut prev_bottom = 0;
        for (top, bottom) in bumps {
            let bottom_val = filt[bottom];
            let below = (prev_bottom..=top).rev().find(|g| filt[*g] < bottom_val);
            match below {
                Some(gate) => {
                    for g in gate + 1..bottom {
                        cond[g] = bottom_val;
                    }
                }
                None if prev_bottom > 0 => {
                    let prev_val = filt[prev_bottom];
                    if let Some(gate) = (prev_bottom + 1..=bottom).find(|g| filt[*g] <= prev_val) {
                        for g in prev_bottom + 1..gate {
                            cond[g] = prev_val;
                        }
                    }
                }
                None => {}
            }
            prev_bottom = bottom;
        }
    }
    cond
}

fn median_filter(values: &Array1<f64>, len: usize) -> Array1<f64> {
    let half = len / 2;
    let mut window_values = Vec::with_capacity(len);
    Array1::from_shape_fn(values.len(), |gate| {
        if !values[gate].is_finite() {
            return f64::NAN;
        }
        window_values.clear();
        window_values.extend(
            values
                .slice(ndarray::s![window(gate, half, values.len())])
                .iter()
                .copied()
                .filter(|v| v.is_finite()),
        );
        StatsHelper::median(&window_values).unwrap_or(f64::NAN)
    })
}

/// KDP expected from reflectivity and ZDR in rain.
fn kdp_from_z_zdr(dbz: f64, zdr: f64, wavelength_cm: f64) -> f64 {
    let z_lin = 10f64.powf(dbz / 10.0);
    let zdr_lin = 10f64.powf(zdr.max(0.1) / 10.0);
    3.32e-5 * (10.0 / wavelength_cm) * z_lin * zdr_lin.powf(-2.05)
}
