use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::prelude::{Channel, ChannelValues, MomentsError, MomentsResult};

/// Read-only calibration for one pulse width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub pulse_width_us: f64,
    /// Measured noise power per channel, receiver gain included.
    pub noise_dbm: ChannelValues<f64>,
    pub receiver_gain_db: ChannelValues<f64>,
    pub radar_constant_h_db: f64,
    pub radar_constant_v_db: f64,
    pub system_phidp_deg: f64,
    #[serde(default)]
    pub zdr_correction_db: f64,
    #[serde(default)]
    pub ldr_correction_db_h: f64,
    #[serde(default)]
    pub ldr_correction_db_v: f64,
    #[serde(default)]
    pub dbz_correction: f64,
    #[serde(default)]
    pub xmit_power_dbm_h: Option<f64>,
    #[serde(default)]
    pub xmit_power_dbm_v: Option<f64>,
}

impl Calibration {
    /// Reflectivity at 1 km for a signal equal to the noise floor.
    pub fn base_dbz_1km(&self, channel: Channel) -> f64 {
        let radar_constant = match channel {
            Channel::Hc | Channel::Hx => self.radar_constant_h_db,
            Channel::Vc | Channel::Vx => self.radar_constant_v_db,
        };
        self.noise_dbm.get(channel) - self.receiver_gain_db.get(channel) + radar_constant
    }

    pub fn noise_power(&self, channel: Channel) -> f64 {
        10f64.powf(self.noise_dbm.get(channel) / 10.0)
    }
}

/// Calibrations for every pulse width in a volume.
#[derive(Debug, Default)]
pub struct CalibrationSet {
    entries: Vec<(Arc<Calibration>, bool)>,
}

impl CalibrationSet {
    pub fn new(calibrations: Vec<Calibration>) -> MomentsResult<Self> {
        if calibrations.is_empty() {
            return Err(MomentsError::Configuration(
                "at least one calibration is required".into(),
            ));
        }
        Ok(Self {
            entries: calibrations
                .into_iter()
                .map(|cal| (Arc::new(cal), false))
                .collect(),
        })
    }

    /// Calibration with the pulse width closest to `pulse_width_us`.
    pub fn select(&mut self, pulse_width_us: f64) -> Arc<Calibration> {
        let mut best = 0;
        let mut best_diff = f64::MAX;
        for (index, (cal, _)) in self.entries.iter().enumerate() {
            let diff = (pulse_width_us - cal.pulse_width_us).abs();
            if diff < best_diff {
                best_diff = diff;
                best = index;
            }
        }
        let entry = &mut self.entries[best];
        entry.1 = true;
        Arc::clone(&entry.0)
    }

    /// Calibrations handed out since construction.
    pub fn used(&self) -> Vec<Arc<Calibration>> {
        self.entries
            .iter()
            .filter(|(_, used)| *used)
            .map(|(cal, _)| Arc::clone(cal))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::calibration;

    #[test]
    fn select_picks_closest_pulse_width_and_marks_it_used() {
        let mut set =
            CalibrationSet::new(vec![calibration(0.5), calibration(1.0), calibration(2.0)])
                .unwrap();
        let cal = set.select(0.9);
        assert_eq!(cal.pulse_width_us, 1.0);
        let cal = set.select(1.8);
        assert_eq!(cal.pulse_width_us, 2.0);
        let used: Vec<f64> = set.used().iter().map(|c| c.pulse_width_us).collect();
        assert_eq!(used, vec![1.0, 2.0]);
    }

    #[test]
    fn empty_set_is_a_configuration_error() {
        assert!(CalibrationSet::new(Vec::new()).is_err());
    }

    #[test]
    fn base_dbz_combines_noise_gain_and_constant() {
        let cal = calibration(1.0);
        assert!((cal.base_dbz_1km(Channel::Hc) - (-77.0 - 37.0 - 68.0)).abs() < 1e-12);
    }
}
