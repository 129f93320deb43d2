use super::PerGateFields;
use crate::config::{CensoringConfig, CensoringMode};

/// Gate runs of this length or shorter are un-censored.
const MAX_SPECKLE_LEN: usize = 2;
/// Uncensored gaps of this length or shorter may be filled.
const MAX_GAP_LEN: usize = 3;

/// Derives, despeckles and applies the per-gate censor mask.
#[derive(Debug, Clone)]
pub struct CensoringEngine {
    config: CensoringConfig,
}

impl CensoringEngine {
    pub fn new(config: &CensoringConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.config.mode != CensoringMode::None
    }

    /// Fills `mask` and resets every censored gate. Returns false when
    /// censoring is off, leaving `fields` untouched and `mask` all clear.
    pub fn run(&self, fields: &mut [PerGateFields], mask: &mut Vec<bool>) -> bool {
        mask.clear();
        mask.resize(fields.len(), false);
        if !self.is_active() {
            return false;
        }
        self.candidates(fields, mask);
        despeckle(mask);
        apply(fields, mask);
        true
    }

    pub fn candidates(&self, fields: &[PerGateFields], mask: &mut [bool]) {
        let snr_threshold = self.config.snr_threshold_db;
        let ncp_threshold = self.config.ncp_threshold;
        for (flag, gate) in mask.iter_mut().zip(fields) {
            *flag = match self.config.mode {
                CensoringMode::None => false,
                CensoringMode::ByNoiseFlag => gate.is_noise(),
                // missing snr or ncp counts as below threshold
                CensoringMode::BySnrAndNcp => {
                    gate.snr.map_or(true, |snr| snr < snr_threshold)
                        && gate.ncp.map_or(true, |ncp| ncp < ncp_threshold)
                }
            };
        }
    }
}

pub fn despeckle(mask: &mut [bool]) {
    close_small_runs(mask);
    fill_small_gaps(mask);
}

/// Length of the contiguous block of `state` gates containing each gate,
/// zero for gates not in `state`.
fn block_lengths(mask: &[bool], state: bool) -> Vec<usize> {
    let mut counts = Vec::with_capacity(mask.len());
    let mut running = 0;
    for flag in mask {
        running = if *flag == state { running + 1 } else { 0 };
        counts.push(running);
    }
    for gate in (0..mask.len().saturating_sub(1)).rev() {
        if counts[gate] != 0 && counts[gate] < counts[gate + 1] {
            counts[gate] = counts[gate + 1];
        }
    }
    counts
}

/// Un-censors interior gates in censored runs of one or two gates.
pub fn close_small_runs(mask: &mut [bool]) {
    let n_gates = mask.len();
    if n_gates < 3 {
        return;
    }
    let runs = block_lengths(mask, true);
    for gate in 1..n_gates - 1 {
        if (1..=MAX_SPECKLE_LEN).contains(&runs[gate]) {
            mask[gate] = false;
        }
    }
}

/// Censors interior gates in short uncensored gaps whose neighbouring
/// censored runs are at least as long as the gap.
pub fn fill_small_gaps(mask: &mut [bool]) {
    let n_gates = mask.len();
    if n_gates < 3 {
        return;
    }
    let runs = block_lengths(mask, true);
    let gaps = block_lengths(mask, false);
    for gate in 1..n_gates - 1 {
        let gap = gaps[gate];
        if !(1..=MAX_GAP_LEN).contains(&gap) {
            continue;
        }
        let lowest = gate.saturating_sub(gap);
        let highest = (gate + gap).min(n_gates - 1);
        let below = (lowest..gate)
            .rev()
            .map(|g| runs[g])
            .find(|len| *len != 0)
            .unwrap_or(0);
        let above = (gate + 1..=highest)
            .map(|g| runs[g])
            .find(|len| *len != 0)
            .unwrap_or(0);
        if below.min(above) >= gap {
            mask[gate] = true;
        }
    }
}

/// Resets every censored gate's record to missing.
pub fn apply(fields: &mut [PerGateFields], mask: &[bool]) {
    for (gate, censored) in fields.iter_mut().zip(mask) {
        if *censored {
            gate.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn mask(pattern: &str) -> Vec<bool> {
        pattern.chars().map(|c| c == '1').collect()
    }

    fn pattern(mask: &[bool]) -> String {
        mask.iter().map(|f| if *f { '1' } else { '0' }).collect()
    }

    #[test]
    fn despeckles_mixed_pattern() {
        let mut flags = mask("11011100111");
        despeckle(&mut flags);
        assert_eq!(pattern(&flags), "10011111111");
    }

    #[test]
    fn isolated_gate_is_uncensored() {
        let mut flags = mask("0001000");
        close_small_runs(&mut flags);
        assert_eq!(pattern(&flags), "0000000");
    }

    #[test]
    fn runs_of_three_survive_closing() {
        let mut flags = mask("0011100111100");
        close_small_runs(&mut flags);
        assert_eq!(pattern(&flags), "0011100111100");
    }

    #[test]
    fn edge_gates_are_never_changed() {
        let mut flags = mask("1000001");
        despeckle(&mut flags);
        assert_eq!(pattern(&flags), "1000001");
    }

    #[test]
    fn gaps_fill_only_between_long_enough_runs() {
        for (input, expected) in [
            ("01110111000", "01111111000"),
            ("0111001110", "0111111110"),
            ("01110001110", "01111111110"),
            ("0110001110", "0110001110"),
            ("01100111", "01111111"),
            ("011000111", "011000111"),
        ] {
            let mut flags = mask(input);
            fill_small_gaps(&mut flags);
            assert_eq!(pattern(&flags), expected, "{input}");
        }
    }

    #[test]
    fn despeckling_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let len = rng.gen_range(0..40);
            let mut flags: Vec<bool> = (0..len).map(|_| rng.gen_bool(0.5)).collect();
            despeckle(&mut flags);
            let once = flags.clone();
            despeckle(&mut flags);
            assert_eq!(flags, once, "{}", pattern(&once));
        }
    }

    #[test]
    fn snr_ncp_candidates_need_both_below_threshold() {
        let engine = CensoringEngine::new(&CensoringConfig {
            mode: CensoringMode::BySnrAndNcp,
            snr_threshold_db: 3.0,
            ncp_threshold: 0.2,
            write_censor_flag: true,
        });
        let gate = |snr: Option<f64>, ncp: Option<f64>| PerGateFields {
            snr,
            ncp,
            ..Default::default()
        };
        let fields = vec![
            gate(Some(0.0), Some(0.1)),
            gate(Some(10.0), Some(0.1)),
            gate(Some(0.0), Some(0.5)),
            gate(None, Some(0.1)),
            gate(None, None),
            gate(None, Some(0.5)),
            gate(Some(10.0), None),
        ];
        let mut flags = vec![false; 7];
        engine.candidates(&fields, &mut flags);
        assert_eq!(flags, vec![true, false, false, true, true, false, false]);
    }

    #[test]
    fn run_resets_censored_gates() {
        let engine = CensoringEngine::new(&CensoringConfig {
            mode: CensoringMode::ByNoiseFlag,
            ..Default::default()
        });
        let mut fields: Vec<PerGateFields> = "00011111000"
            .chars()
            .map(|c| PerGateFields {
                dbz: Some(12.0),
                vel: Some(-3.0),
                noise_flag: Some(c == '1'),
                ..Default::default()
            })
            .collect();
        let mut flags = Vec::new();
        assert!(engine.run(&mut fields, &mut flags));
        assert_eq!(pattern(&flags), "00011111000");
        for (gate, censored) in fields.iter().zip(&flags) {
            if *censored {
                assert_eq!(*gate, PerGateFields::default());
            } else {
                assert_eq!(gate.dbz, Some(12.0));
            }
        }
    }

    #[test]
    fn inactive_censoring_is_a_no_op() {
        let engine = CensoringEngine::new(&CensoringConfig::default());
        let mut fields = vec![
            PerGateFields {
                noise_flag: Some(true),
                ..Default::default()
            };
            5
        ];
        let before = fields.clone();
        let mut flags = vec![true; 2];
        assert!(!engine.run(&mut fields, &mut flags));
        assert_eq!(flags, vec![false; 5]);
        assert_eq!(fields, before);
    }
}
